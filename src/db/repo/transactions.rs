//! Transaction log and order outcome reads.

use crate::domain::{OrderId, OrderOutcomeRecord, OrderStage, Side, Transaction, WalletId};
use crate::error::LedgerError;
use sqlx::Row;
use std::str::FromStr;

use super::{parse_money, time_from_ms, transaction_from_row, Repository};

impl Repository {
    /// Transaction log of a wallet in append order.
    pub async fn list_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, order_id, tx_type, status, amount, created_at, settled_at
            FROM transactions
            WHERE wallet_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(wallet_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    /// Every transaction tagged with `order_id`, across wallets.
    pub async fn transactions_for_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, wallet_id, order_id, tx_type, status, amount, created_at, settled_at
            FROM transactions
            WHERE order_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    pub async fn find_outcome(
        &self,
        order_id: OrderId,
        side: Side,
        stage: OrderStage,
    ) -> Result<Option<OrderOutcomeRecord>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, side, outcome, wallet_id, amount, reason, recorded_at
            FROM order_outcomes
            WHERE order_id = ? AND side = ? AND outcome = ?
            "#,
        )
        .bind(order_id.as_i64())
        .bind(side.as_str())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let side_raw: String = row.try_get("side")?;
        let stage_raw: String = row.try_get("outcome")?;
        let amount: Option<String> = row.try_get("amount")?;
        Ok(Some(OrderOutcomeRecord {
            order_id: OrderId::new(row.try_get("order_id")?),
            side: Side::from_str(&side_raw).map_err(|_| LedgerError::Corrupt {
                field: "order_outcomes.side",
                value: side_raw.clone(),
            })?,
            stage: OrderStage::from_str(&stage_raw)?,
            wallet_id: WalletId::new(row.try_get("wallet_id")?),
            amount: amount
                .map(|raw| parse_money("order_outcomes.amount", &raw))
                .transpose()?,
            reason: row.try_get("reason")?,
            recorded_at: time_from_ms("order_outcomes.recorded_at", row.try_get("recorded_at")?)?,
        }))
    }
}
