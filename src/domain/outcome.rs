//! Per order-side outcome records: the apply-at-most-once boundary for order events.

use crate::domain::{Money, OrderId, Side, WalletId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

/// Stage an order side has reached in this wallet.
///
/// `Settled` and `Compensated` are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStage {
    Reserved,
    Settled,
    Compensated,
}

impl OrderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStage::Reserved => "reserved",
            OrderStage::Settled => "settled",
            OrderStage::Compensated => "compensated",
        }
    }
}

impl FromStr for OrderStage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(OrderStage::Reserved),
            "settled" => Ok(OrderStage::Settled),
            "compensated" => Ok(OrderStage::Compensated),
            other => Err(LedgerError::Corrupt {
                field: "order_outcomes.outcome",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOutcomeRecord {
    pub order_id: OrderId,
    pub side: Side,
    pub stage: OrderStage,
    pub wallet_id: WalletId,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
