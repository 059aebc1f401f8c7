//! Position book operations inside a wallet unit of work.
//!
//! Only the settlement and compensation coordinators call these; positions are never
//! written outside the unit that also writes the matching cash movement.

use crate::db::WalletUnit;
use crate::domain::{Money, Position, Symbol};
use crate::error::LedgerError;
use tracing::debug;

/// Add `qty` shares bought for `cost`, opening the position if needed.
pub async fn apply_buy(
    unit: &mut WalletUnit,
    symbol: &Symbol,
    qty: i64,
    cost: Money,
) -> Result<Position, LedgerError> {
    let mut position = match unit.position(symbol).await? {
        Some(mut existing) => {
            existing.apply_buy(qty, cost)?;
            existing
        }
        None => Position::open(unit.wallet().id, symbol.clone(), qty, cost)?,
    };
    unit.save_position(&mut position).await?;
    debug!(
        wallet_id = %unit.wallet().id,
        symbol = %symbol,
        quantity = position.quantity,
        total_cost = %position.total_cost,
        "Applied buy"
    );
    Ok(position)
}

/// Remove `qty` shares at average cost. Returns the position and the cost removed.
///
/// # Errors
/// `InsufficientShares` if the wallet holds fewer than `qty` shares of `symbol`.
pub async fn apply_sell(
    unit: &mut WalletUnit,
    symbol: &Symbol,
    qty: i64,
) -> Result<(Position, Money), LedgerError> {
    let Some(mut position) = unit.position(symbol).await? else {
        return Err(LedgerError::InsufficientShares {
            symbol: symbol.clone(),
            held: 0,
            requested: qty,
        });
    };
    let cost_removed = position.apply_sell(qty)?;
    unit.save_position(&mut position).await?;
    debug!(
        wallet_id = %unit.wallet().id,
        symbol = %symbol,
        quantity = position.quantity,
        cost_removed = %cost_removed,
        "Applied sell"
    );
    Ok((position, cost_removed))
}

/// Put back shares of a failed SELL. Cost basis is left as is.
///
/// # Errors
/// `NotFound` if the wallet never held `symbol`.
pub async fn restore_shares(
    unit: &mut WalletUnit,
    symbol: &Symbol,
    qty: i64,
) -> Result<Position, LedgerError> {
    let Some(mut position) = unit.position(symbol).await? else {
        return Err(LedgerError::NotFound(format!(
            "Position {} in wallet {}",
            symbol,
            unit.wallet().id
        )));
    };
    position.restore(qty)?;
    unit.save_position(&mut position).await?;
    Ok(position)
}
