use crate::domain::{Money, OrderId, Side, Symbol};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failure of a ledger operation.
///
/// Validation and business-rule variants are rejected before anything is written.
/// `NegativeBalance` and `Corrupt` indicate a defect and abort the unit of work.
/// `Store` and `StoreTimeout` are transient: the unit rolled back and the caller may retry.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient funds: available={available}, requested={requested}")]
    InsufficientFunds { available: Money, requested: Money },
    #[error("Insufficient reserve: reserved={reserved}, requested={requested}")]
    InsufficientReserve { reserved: Money, requested: Money },
    #[error("Insufficient shares of {symbol}: held={held}, requested={requested}")]
    InsufficientShares {
        symbol: Symbol,
        held: i64,
        requested: i64,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Wallet balance cannot be negative: available={available}, reserved={reserved}")]
    NegativeBalance { available: Money, reserved: Money },
    #[error("Invalid order side: {0}")]
    InvalidOrderSide(String),
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Store operation timed out")]
    StoreTimeout,
    #[error("Corrupt stored value for {field}: {value}")]
    Corrupt { field: &'static str, value: String },
    /// One leg of a two-sided match failed; classification follows the leg's error.
    #[error("{side} leg of order {order_id} failed: {source}")]
    MatchedLeg {
        order_id: OrderId,
        side: Side,
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// True when the whole unit may succeed if attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Store(_) | LedgerError::StoreTimeout => true,
            LedgerError::MatchedLeg { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Stable machine-readable code reported to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InsufficientReserve { .. } => "INSUFFICIENT_RESERVE",
            LedgerError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::NegativeBalance { .. } => "NEGATIVE_BALANCE",
            LedgerError::InvalidOrderSide(_) => "INVALID_ORDER_SIDE",
            LedgerError::Store(_) => "STORE_ERROR",
            LedgerError::StoreTimeout => "STORE_TIMEOUT",
            LedgerError::Corrupt { .. } => "CORRUPT_STATE",
            LedgerError::MatchedLeg { source, .. } => source.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unprocessable: {code}: {message}")]
    Unprocessable { code: &'static str, message: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => AppError::BadRequest(msg),
            LedgerError::InvalidOrderSide(side) => {
                AppError::BadRequest(format!("Invalid order side: {}", side))
            }
            LedgerError::NotFound(msg) => AppError::NotFound(msg),
            e @ (LedgerError::InsufficientFunds { .. }
            | LedgerError::InsufficientReserve { .. }
            | LedgerError::InsufficientShares { .. }) => AppError::Unprocessable {
                code: e.code(),
                message: e.to_string(),
            },
            LedgerError::StoreTimeout => {
                AppError::Unavailable("Ledger store timed out, retry later".into())
            }
            e @ (LedgerError::NegativeBalance { .. }
            | LedgerError::Store(_)
            | LedgerError::Corrupt { .. }) => AppError::Internal(e.to_string()),
            LedgerError::MatchedLeg { source, .. } => AppError::from(*source),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::Unprocessable { code, message } => {
                (StatusCode::UNPROCESSABLE_ENTITY, code, message)
            }
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
