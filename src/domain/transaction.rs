//! Transaction log entries.

use crate::domain::{Money, OrderId, WalletId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(TransactionType::Credit),
            "DEBIT" => Ok(TransactionType::Debit),
            other => Err(LedgerError::Validation(format!(
                "Unsupported transaction type: {}",
                other
            ))),
        }
    }
}

/// PENDING leaves exactly once, to SETTLED or FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Settled,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Settled => "SETTLED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "SETTLED" => Ok(TransactionStatus::Settled),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(LedgerError::Validation(format!(
                "Unsupported transaction status: {}",
                other
            ))),
        }
    }
}

/// One entry of the append-only transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: WalletId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub order_id: Option<OrderId>,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub settled_at: Option<DateTime<Utc>>,
    pub is_settled: bool,
}

/// A transaction about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub wallet_id: WalletId,
    pub order_id: Option<OrderId>,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Money,
}

impl NewTransaction {
    pub fn settled(
        wallet_id: WalletId,
        tx_type: TransactionType,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> Result<Self, LedgerError> {
        Self::build(wallet_id, tx_type, TransactionStatus::Settled, amount, order_id)
    }

    pub fn pending(
        wallet_id: WalletId,
        tx_type: TransactionType,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> Result<Self, LedgerError> {
        Self::build(wallet_id, tx_type, TransactionStatus::Pending, amount, order_id)
    }

    fn build(
        wallet_id: WalletId,
        tx_type: TransactionType,
        status: TransactionStatus,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> Result<Self, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::Validation(format!(
                "Transaction amount must be positive, got {}",
                amount
            )));
        }
        Ok(NewTransaction {
            wallet_id,
            order_id,
            tx_type,
            status,
            amount,
        })
    }
}
