//! Per-wallet unit of work.
//!
//! A `WalletUnit` is one SQLite transaction scoped to a single wallet aggregate
//! (the wallet row, its positions and its transaction log). The first statement bumps
//! the wallet's version, so the connection holds the database write lock before it
//! reads anything. Concurrent units for any wallet queue behind `busy_timeout`.
//!
//! Nothing is visible to other connections until [`WalletUnit::commit`]. Dropping the
//! unit without committing rolls everything back.

use crate::db::repo::{now_ms, position_from_row, time_from_ms, transaction_from_row, wallet_from_row};
use crate::domain::{
    Money, NewTransaction, OrderId, OrderStage, Position, Side, Symbol, Transaction,
    TransactionStatus, TransactionType, Wallet, WalletId,
};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool};
use tracing::error;

pub struct WalletUnit {
    tx: sqlx::Transaction<'static, Sqlite>,
    wallet: Wallet,
    now_ms: i64,
}

impl WalletUnit {
    /// Start a unit for `wallet_id`.
    ///
    /// # Errors
    /// `NotFound` if no such wallet exists.
    pub async fn begin(pool: &SqlitePool, wallet_id: WalletId) -> Result<Self, LedgerError> {
        let now_ms = now_ms();
        let mut tx = pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE wallets SET version = version + 1, updated_at = ?
            WHERE id = ?
            RETURNING id, user_id, currency, available_balance, reserved_balance, version
            "#,
        )
        .bind(now_ms)
        .bind(wallet_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match row {
            Some(row) => wallet_from_row(&row)?,
            None => return Err(LedgerError::NotFound(format!("Wallet {}", wallet_id))),
        };

        Ok(WalletUnit { tx, wallet, now_ms })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Balance changes made here are written on commit.
    pub fn wallet_mut(&mut self) -> &mut Wallet {
        &mut self.wallet
    }

    /// Timestamp shared by every row this unit writes.
    pub fn now(&self) -> DateTime<Utc> {
        time_from_ms("unit.now", self.now_ms).unwrap_or_else(|_| Utc::now())
    }

    pub async fn position(&mut self, symbol: &Symbol) -> Result<Option<Position>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_id, symbol, quantity, total_cost
            FROM positions
            WHERE wallet_id = ? AND symbol = ?
            "#,
        )
        .bind(self.wallet.id.as_i64())
        .bind(symbol.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    /// Insert a new position or overwrite an existing one. Sets `id` on insert.
    pub async fn save_position(&mut self, position: &mut Position) -> Result<(), LedgerError> {
        self.require_own_wallet(position.wallet_id)?;
        match position.id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE positions SET quantity = ?, total_cost = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(position.quantity)
                .bind(position.total_cost.to_canonical_string())
                .bind(self.now_ms)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;
            }
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO positions (wallet_id, symbol, quantity, total_cost, updated_at)
                    VALUES (?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(position.wallet_id.as_i64())
                .bind(position.symbol.as_str())
                .bind(position.quantity)
                .bind(position.total_cost.to_canonical_string())
                .bind(self.now_ms)
                .fetch_one(&mut *self.tx)
                .await?;
                position.id = Some(id);
            }
        }
        Ok(())
    }

    /// Append to the transaction log. SETTLED entries are stamped with the unit's time.
    pub async fn append_transaction(
        &mut self,
        new: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        self.require_own_wallet(new.wallet_id)?;
        let settled_at = (new.status == TransactionStatus::Settled).then_some(self.now_ms);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (wallet_id, order_id, tx_type, status, amount, created_at, settled_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(new.wallet_id.as_i64())
        .bind(new.order_id.map(|o| o.as_i64()))
        .bind(new.tx_type.as_str())
        .bind(new.status.as_str())
        .bind(new.amount.to_canonical_string())
        .bind(self.now_ms)
        .bind(settled_at)
        .fetch_one(&mut *self.tx)
        .await?;

        let created_at = time_from_ms("transactions.created_at", self.now_ms)?;
        Ok(Transaction {
            id,
            wallet_id: new.wallet_id,
            order_id: new.order_id,
            tx_type: new.tx_type,
            status: new.status,
            amount: new.amount,
            created_at,
            settled_at: settled_at.map(|_| created_at),
            is_settled: settled_at.is_some(),
        })
    }

    /// The PENDING entry of `tx_type` tagged with `order_id`, if any.
    pub async fn pending_order_transaction(
        &mut self,
        order_id: OrderId,
        tx_type: TransactionType,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_id, order_id, tx_type, status, amount, created_at, settled_at
            FROM transactions
            WHERE wallet_id = ? AND order_id = ? AND tx_type = ? AND status = 'PENDING'
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(self.wallet.id.as_i64())
        .bind(order_id.as_i64())
        .bind(tx_type.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    /// Move a PENDING entry to its terminal status, fixing its final amount.
    ///
    /// # Errors
    /// `Validation` if the target status is PENDING or the entry already left PENDING.
    pub async fn finalize_transaction(
        &mut self,
        id: i64,
        status: TransactionStatus,
        amount: Money,
    ) -> Result<Transaction, LedgerError> {
        if status == TransactionStatus::Pending {
            return Err(LedgerError::Validation(
                "A transaction can only leave PENDING".to_string(),
            ));
        }
        crate::domain::wallet::require_positive(amount)?;
        let settled_at = (status == TransactionStatus::Settled).then_some(self.now_ms);

        let row = sqlx::query(
            r#"
            UPDATE transactions SET status = ?, amount = ?, settled_at = ?
            WHERE id = ? AND wallet_id = ? AND status = 'PENDING'
            RETURNING id, wallet_id, order_id, tx_type, status, amount, created_at, settled_at
            "#,
        )
        .bind(status.as_str())
        .bind(amount.to_canonical_string())
        .bind(settled_at)
        .bind(id)
        .bind(self.wallet.id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => transaction_from_row(&row),
            None => Err(LedgerError::Validation(format!(
                "Transaction {} is not pending",
                id
            ))),
        }
    }

    /// Record that an order-side reached `stage`. Returns false if it already had.
    pub async fn record_outcome(
        &mut self,
        order_id: OrderId,
        side: Side,
        stage: OrderStage,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO order_outcomes (order_id, side, outcome, wallet_id, amount, reason, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id, side, outcome) DO NOTHING
            "#,
        )
        .bind(order_id.as_i64())
        .bind(side.as_str())
        .bind(stage.as_str())
        .bind(self.wallet.id.as_i64())
        .bind(amount.map(|a| a.to_canonical_string()))
        .bind(reason)
        .bind(self.now_ms)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn has_outcome(
        &mut self,
        order_id: OrderId,
        side: Side,
        stage: OrderStage,
    ) -> Result<bool, LedgerError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM order_outcomes WHERE order_id = ? AND side = ? AND outcome = ?",
        )
        .bind(order_id.as_i64())
        .bind(side.as_str())
        .bind(stage.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(found.is_some())
    }

    /// Validate the wallet invariant, persist balances and commit.
    ///
    /// # Errors
    /// `NegativeBalance` aborts the unit; nothing it did becomes visible.
    pub async fn commit(mut self) -> Result<Wallet, LedgerError> {
        if let Err(e) = self.wallet.validate() {
            error!(wallet_id = %self.wallet.id, error = %e, "Wallet invariant violated, aborting unit");
            return Err(e);
        }

        sqlx::query(
            r#"
            UPDATE wallets SET available_balance = ?, reserved_balance = ?
            WHERE id = ?
            "#,
        )
        .bind(self.wallet.available_balance.to_canonical_string())
        .bind(self.wallet.reserved_balance.to_canonical_string())
        .bind(self.wallet.id.as_i64())
        .execute(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(self.wallet)
    }

    fn require_own_wallet(&self, wallet_id: WalletId) -> Result<(), LedgerError> {
        if wallet_id != self.wallet.id {
            return Err(LedgerError::Validation(format!(
                "Unit for wallet {} cannot write to wallet {}",
                self.wallet.id, wallet_id
            )));
        }
        Ok(())
    }
}
