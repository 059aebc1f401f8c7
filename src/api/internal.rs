//! Service-to-service routes used by the order and matching services.
//!
//! Order-tagged operations answer `{"duplicate": true}` for a replay instead of failing,
//! so callers can retry freely.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::api::wallet::{PositionDto, WalletDto};
use crate::api::AppState;
use crate::domain::{Money, OrderEvent, OrderId, Symbol, Transaction, UserId, WalletId};
use crate::engine::{parse_side, Compensation, CompensationRequest, Outcome, SettlementRequest};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse<T> {
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<T>,
}

impl<T> OrderResponse<T> {
    fn duplicate() -> Self {
        Self {
            duplicate: true,
            transaction: None,
            wallet: None,
            position: None,
        }
    }
}

pub async fn get_wallet_for_user(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<WalletDto>, AppError> {
    if user_id <= 0 {
        return Err(AppError::BadRequest(format!("Invalid user id: {}", user_id)));
    }
    let wallet = state.ledger.get_wallet(UserId::new(user_id)).await?;
    Ok(Json(wallet.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub order_id: OrderId,
}

pub async fn reserve_funds(
    State(state): State<AppState>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<OrderResponse<PositionDto>>, AppError> {
    let outcome = state
        .ledger
        .reserve_funds(req.wallet_id, req.amount, req.order_id)
        .await?;
    Ok(Json(match outcome {
        Outcome::Applied(hold) => OrderResponse {
            duplicate: false,
            transaction: Some(hold),
            wallet: None,
            position: None,
        },
        Outcome::Duplicate => OrderResponse::duplicate(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub wallet_id: WalletId,
    pub order_id: OrderId,
    pub side: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: Money,
    #[serde(default)]
    pub total_amount: Option<Money>,
}

pub async fn settle_order(
    State(state): State<AppState>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<OrderResponse<PositionDto>>, AppError> {
    let request = SettlementRequest {
        wallet_id: req.wallet_id,
        order_id: req.order_id,
        side: parse_side(&req.side, req.order_id)?,
        symbol: Symbol::from_str(&req.symbol)?,
        quantity: req.quantity,
        price: req.price,
        total_amount: req.total_amount,
    };
    let outcome = state.settlement.settle(&request).await?;
    Ok(Json(match outcome {
        Outcome::Applied(settlement) => OrderResponse {
            duplicate: false,
            transaction: Some(settlement.transaction),
            wallet: Some(settlement.wallet.into()),
            position: Some(settlement.position.into()),
        },
        Outcome::Duplicate => OrderResponse::duplicate(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensateRequest {
    pub wallet_id: WalletId,
    pub order_id: OrderId,
    pub side: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub amount: Money,
    #[serde(default)]
    pub reason: String,
}

pub async fn compensate_order(
    State(state): State<AppState>,
    Json(req): Json<CompensateRequest>,
) -> Result<Json<OrderResponse<PositionDto>>, AppError> {
    let symbol = match req.symbol.as_deref() {
        Some(raw) => Some(Symbol::from_str(raw)?),
        None => None,
    };
    let request = CompensationRequest {
        wallet_id: req.wallet_id,
        order_id: req.order_id,
        side: parse_side(&req.side, req.order_id)?,
        symbol,
        quantity: req.quantity,
        amount: req.amount,
        reason: req.reason,
    };
    let outcome = state.compensation.compensate(&request).await?;
    Ok(Json(compensation_response(outcome)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub wallet_id: WalletId,
    pub amount: Money,
    pub order_id: OrderId,
}

pub async fn refund_order(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<OrderResponse<PositionDto>>, AppError> {
    let outcome = state
        .compensation
        .refund_cancelled_order(req.wallet_id, req.amount, req.order_id)
        .await?;
    Ok(Json(compensation_response(outcome)))
}

fn compensation_response(outcome: Outcome<Compensation>) -> OrderResponse<PositionDto> {
    match outcome {
        Outcome::Applied(compensation) => OrderResponse {
            duplicate: false,
            transaction: compensation.transaction,
            wallet: Some(compensation.wallet.into()),
            position: compensation.position.map(PositionDto::from),
        },
        Outcome::Duplicate => OrderResponse::duplicate(),
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub applied: usize,
    pub duplicates: usize,
}

/// Apply one order event synchronously.
pub async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<OrderEvent>,
) -> Result<Json<EventResponse>, AppError> {
    let report = state.intake.handle(&event).await?;
    Ok(Json(EventResponse {
        applied: report.applied,
        duplicates: report.duplicates,
    }))
}

/// Queue one order event for the background intake loop.
pub async fn enqueue_event(
    State(state): State<AppState>,
    Json(event): Json<OrderEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let sender = state
        .event_sender
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Event queue is not running".into()))?;
    let kind = event.kind();
    let delivery_id = sender.send(event).await.map_err(|e| {
        warn!(event = kind, error = %e, "Failed to enqueue event");
        AppError::Unavailable(e.to_string())
    })?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "deliveryId": delivery_id })),
    ))
}
