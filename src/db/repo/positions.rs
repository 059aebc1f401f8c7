//! Position reads for the repository.

use crate::domain::{Position, Symbol, WalletId};
use crate::error::LedgerError;

use super::{position_from_row, Repository};

impl Repository {
    /// Open positions of a wallet, ordered by symbol. Flat positions are omitted.
    pub async fn list_positions(&self, wallet_id: WalletId) -> Result<Vec<Position>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, symbol, quantity, total_cost
            FROM positions
            WHERE wallet_id = ? AND quantity > 0
            ORDER BY symbol ASC
            "#,
        )
        .bind(wallet_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    /// Position row for a symbol, including a flat one.
    pub async fn find_position(
        &self,
        wallet_id: WalletId,
        symbol: &Symbol,
    ) -> Result<Option<Position>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, wallet_id, symbol, quantity, total_cost
            FROM positions
            WHERE wallet_id = ? AND symbol = ?
            "#,
        )
        .bind(wallet_id.as_i64())
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }
}
