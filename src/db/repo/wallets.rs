//! Wallet lookup and lazy creation.

use crate::domain::{Currency, UserId, Wallet, WalletId};
use crate::error::LedgerError;
use tracing::info;

use super::{now_ms, wallet_from_row, Repository};

impl Repository {
    /// Return the user's wallet, creating an empty one on first access.
    ///
    /// Concurrent first calls for the same user race on the `user_id` unique key;
    /// exactly one insert wins and every caller reads the same row back.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn get_or_create_wallet(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Wallet, LedgerError> {
        let now = now_ms();
        let result = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, currency, available_balance, reserved_balance, version, created_at, updated_at)
            VALUES (?, ?, '0', '0', 0, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_i64())
        .bind(currency.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!(user_id = %user_id, currency = %currency, "Created wallet");
        }

        self.find_wallet_by_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Wallet for user {}", user_id)))
    }

    pub async fn find_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, currency, available_balance, reserved_balance, version
            FROM wallets
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(wallet_from_row).transpose()
    }

    /// # Errors
    /// `NotFound` if no wallet has this id.
    pub async fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, currency, available_balance, reserved_balance, version
            FROM wallets
            WHERE id = ?
            "#,
        )
        .bind(wallet_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => wallet_from_row(&row),
            None => Err(LedgerError::NotFound(format!("Wallet {}", wallet_id))),
        }
    }
}
