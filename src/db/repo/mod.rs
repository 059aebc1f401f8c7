//! Repository layer for the wallet store.
//!
//! This module provides the `Repository` struct for all read paths and lazy wallet creation.
//! Mutations of a single wallet go through [`WalletUnit`](crate::db::WalletUnit).
//! Methods are organized across submodules by aggregate:
//! - `wallets.rs` - Wallet lookup and race-free creation
//! - `positions.rs` - Position listing
//! - `transactions.rs` - Transaction log and order outcome reads
//! - `idempotency.rs` - Cached client responses keyed by idempotency key

mod idempotency;
mod positions;
mod transactions;
mod wallets;

use crate::db::unit::WalletUnit;
use crate::domain::{
    Currency, Money, OrderId, Position, Symbol, Transaction, UserId, Wallet, WalletId,
};
use crate::error::LedgerError;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a unit of work holding the write lock for `wallet_id`.
    ///
    /// # Errors
    /// `NotFound` if the wallet does not exist, `Store` if the database fails.
    pub async fn begin_wallet(&self, wallet_id: WalletId) -> Result<WalletUnit, LedgerError> {
        WalletUnit::begin(&self.pool, wallet_id).await
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn time_from_ms(field: &'static str, ms: i64) -> Result<DateTime<Utc>, LedgerError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| LedgerError::Corrupt {
            field,
            value: ms.to_string(),
        })
}

/// Stored amounts are canonical decimal text. Anything else is a defect, not a default.
pub(crate) fn parse_money(field: &'static str, raw: &str) -> Result<Money, LedgerError> {
    Money::from_str(raw).map_err(|_| LedgerError::Corrupt {
        field,
        value: raw.to_string(),
    })
}

pub(crate) fn wallet_from_row(row: &SqliteRow) -> Result<Wallet, LedgerError> {
    let currency: String = row.try_get("currency")?;
    let available: String = row.try_get("available_balance")?;
    let reserved: String = row.try_get("reserved_balance")?;
    Ok(Wallet {
        id: WalletId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        currency: Currency::from_str(&currency).map_err(|_| LedgerError::Corrupt {
            field: "wallets.currency",
            value: currency.clone(),
        })?,
        available_balance: parse_money("wallets.available_balance", &available)?,
        reserved_balance: parse_money("wallets.reserved_balance", &reserved)?,
        version: row.try_get("version")?,
    })
}

pub(crate) fn position_from_row(row: &SqliteRow) -> Result<Position, LedgerError> {
    let symbol: String = row.try_get("symbol")?;
    let total_cost: String = row.try_get("total_cost")?;
    Ok(Position {
        id: Some(row.try_get("id")?),
        wallet_id: WalletId::new(row.try_get("wallet_id")?),
        symbol: Symbol::from_str(&symbol).map_err(|_| LedgerError::Corrupt {
            field: "positions.symbol",
            value: symbol.clone(),
        })?,
        quantity: row.try_get("quantity")?,
        total_cost: parse_money("positions.total_cost", &total_cost)?,
    })
}

pub(crate) fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, LedgerError> {
    let tx_type: String = row.try_get("tx_type")?;
    let status: String = row.try_get("status")?;
    let amount: String = row.try_get("amount")?;
    let settled_at: Option<i64> = row.try_get("settled_at")?;
    let settled_at = settled_at
        .map(|ms| time_from_ms("transactions.settled_at", ms))
        .transpose()?;
    Ok(Transaction {
        id: row.try_get("id")?,
        wallet_id: WalletId::new(row.try_get("wallet_id")?),
        order_id: row.try_get::<Option<i64>, _>("order_id")?.map(OrderId::new),
        tx_type: tx_type.parse().map_err(|_| LedgerError::Corrupt {
            field: "transactions.tx_type",
            value: tx_type.clone(),
        })?,
        status: status.parse().map_err(|_| LedgerError::Corrupt {
            field: "transactions.status",
            value: status.clone(),
        })?,
        amount: parse_money("transactions.amount", &amount)?,
        created_at: time_from_ms("transactions.created_at", row.try_get("created_at")?)?,
        is_settled: settled_at.is_some(),
        settled_at,
    })
}
