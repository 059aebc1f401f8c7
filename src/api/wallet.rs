//! Client-facing wallet routes. The caller is identified by the gateway's `X-User-Id` header.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{Currency, Money, Position, Symbol, Transaction, UserId, Wallet, WalletId};
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// User id forwarded by the API gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for GatewayUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::BadRequest("Missing X-User-Id header".into()))?
            .to_str()
            .map_err(|_| AppError::BadRequest("Invalid X-User-Id header".into()))?;
        let id = raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::BadRequest("Invalid X-User-Id header".into()))?;
        Ok(GatewayUser(UserId::new(id)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub id: WalletId,
    pub currency: Currency,
    pub available_balance: Money,
    pub reserved_balance: Money,
}

impl From<Wallet> for WalletDto {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            currency: wallet.currency,
            available_balance: wallet.available_balance,
            reserved_balance: wallet.reserved_balance,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub symbol: Symbol,
    pub quantity: i64,
    pub total_cost: Money,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub average_cost: Option<Money>,
}

impl From<Position> for PositionDto {
    fn from(position: Position) -> Self {
        Self {
            average_cost: position.cost_per_share(),
            symbol: position.symbol,
            quantity: position.quantity,
            total_cost: position.total_cost,
        }
    }
}

/// Body of credit and debit. `amount` is a decimal string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountRequest {
    pub amount: Money,
    pub idempotency_key: String,
}

pub async fn get_my_wallet(
    GatewayUser(user_id): GatewayUser,
    State(state): State<AppState>,
) -> Result<Json<WalletDto>, AppError> {
    let wallet = state.ledger.get_wallet(user_id).await?;
    Ok(Json(wallet.into()))
}

pub async fn list_transactions(
    GatewayUser(user_id): GatewayUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.ledger.list_transactions(user_id).await?))
}

pub async fn list_positions(
    GatewayUser(user_id): GatewayUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<PositionDto>>, AppError> {
    let positions = state.ledger.list_positions(user_id).await?;
    Ok(Json(positions.into_iter().map(PositionDto::from).collect()))
}

pub async fn credit(
    GatewayUser(user_id): GatewayUser,
    State(state): State<AppState>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Transaction>, AppError> {
    let ledger = &state.ledger;
    let tx = state
        .idempotency
        .dedupe(&req.idempotency_key, user_id, || async {
            ledger.credit(user_id, req.amount).await
        })
        .await?;
    Ok(Json(tx))
}

pub async fn debit(
    GatewayUser(user_id): GatewayUser,
    State(state): State<AppState>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Transaction>, AppError> {
    let ledger = &state.ledger;
    let tx = state
        .idempotency
        .dedupe(&req.idempotency_key, user_id, || async {
            ledger.debit(user_id, req.amount).await
        })
        .await?;
    Ok(Json(tx))
}
