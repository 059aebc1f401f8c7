//! Ledger services: balance operations, position book, settlement and compensation.
//!
//! Every mutation runs inside one [`WalletUnit`](crate::db::WalletUnit) bounded by the
//! configured store timeout. A timed-out unit is dropped, which rolls it back.

use crate::config::{Config, CreditLimits};
use crate::domain::{Currency, OrderId, Side};
use crate::error::LedgerError;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

pub mod compensation;
pub mod ledger;
pub mod position_book;
pub mod settlement;

pub use compensation::{Compensation, CompensationCoordinator, CompensationRequest};
pub use ledger::Ledger;
pub use settlement::{Settlement, SettlementCoordinator, SettlementRequest};

/// Result of an order-tagged operation under at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation changed the ledger.
    Applied(T),
    /// The order-side was already processed; nothing changed.
    Duplicate,
}

impl<T> Outcome<T> {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Outcome::Duplicate)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Duplicate => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::Duplicate => Outcome::Duplicate,
        }
    }
}

/// Settings shared by the ledger services.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub default_currency: Currency,
    pub store_timeout: Duration,
    pub credit_limits: CreditLimits,
}

impl LedgerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_currency: config.default_currency.clone(),
            store_timeout: config.store_timeout,
            credit_limits: config.credit_limits,
        }
    }
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            default_currency: Currency::usd(),
            store_timeout: Duration::from_secs(5),
            credit_limits: CreditLimits::default(),
        }
    }
}

/// Run a unit of work with a deadline. On expiry the unit is dropped and rolled back.
pub(crate) async fn with_timeout<T, F>(limit: Duration, unit: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, unit).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::StoreTimeout),
    }
}

/// Parse an order side from the wire. Unknown sides are an upstream protocol bug.
pub(crate) fn parse_side(raw: &str, order_id: OrderId) -> Result<Side, LedgerError> {
    Side::from_str(raw).map_err(|e| {
        error!(order_id = %order_id, side = raw, "Invalid order side from upstream");
        e
    })
}
