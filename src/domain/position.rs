//! Share holdings with cost-basis tracking.

use crate::domain::{Money, Symbol, WalletId};
use crate::error::LedgerError;
use serde::Serialize;

/// Holding of one symbol in one wallet.
///
/// `id` is `None` until the row has been persisted. A position that returns to zero
/// quantity is kept with zero cost so a later restore can find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Option<i64>,
    pub wallet_id: WalletId,
    pub symbol: Symbol,
    pub quantity: i64,
    pub total_cost: Money,
}

impl Position {
    /// First BUY of a symbol.
    pub fn open(
        wallet_id: WalletId,
        symbol: Symbol,
        qty: i64,
        cost: Money,
    ) -> Result<Self, LedgerError> {
        require_qty(qty)?;
        require_cost(cost)?;
        Ok(Position {
            id: None,
            wallet_id,
            symbol,
            quantity: qty,
            total_cost: cost,
        })
    }

    pub fn apply_buy(&mut self, qty: i64, cost: Money) -> Result<(), LedgerError> {
        require_qty(qty)?;
        require_cost(cost)?;
        let quantity = self.quantity.checked_add(qty).ok_or_else(|| {
            LedgerError::Validation(format!("Quantity overflow for {}", self.symbol))
        })?;
        self.total_cost = self.total_cost.try_add(cost)?;
        self.quantity = quantity;
        Ok(())
    }

    /// Remove `qty` shares at average cost. Returns the cost removed.
    ///
    /// costPerShare = totalCost / quantity_before (half-up, 10 places),
    /// costRemoved = costPerShare * qty.
    pub fn apply_sell(&mut self, qty: i64) -> Result<Money, LedgerError> {
        require_qty(qty)?;
        if self.quantity < qty {
            return Err(LedgerError::InsufficientShares {
                symbol: self.symbol.clone(),
                held: self.quantity,
                requested: qty,
            });
        }

        let cost_per_share = self.cost_per_share().unwrap_or_default();
        let cost_removed = cost_per_share.try_times_qty(qty)?.round_cost();

        let remaining = self.quantity - qty;
        self.total_cost = if remaining == 0 {
            // rounding residue must not survive as phantom cost
            Money::zero()
        } else {
            let left = self.total_cost.try_sub(cost_removed)?;
            if left.is_negative() {
                Money::zero()
            } else {
                left
            }
        };
        self.quantity = remaining;
        Ok(cost_removed)
    }

    /// Put back shares of a failed SELL. Cost basis is not reconstructed.
    pub fn restore(&mut self, qty: i64) -> Result<(), LedgerError> {
        require_qty(qty)?;
        self.quantity = self.quantity.checked_add(qty).ok_or_else(|| {
            LedgerError::Validation(format!("Quantity overflow for {}", self.symbol))
        })?;
        Ok(())
    }

    /// `None` for an empty position.
    pub fn cost_per_share(&self) -> Option<Money> {
        self.total_cost.div_qty_half_up(self.quantity)
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

fn require_qty(qty: i64) -> Result<(), LedgerError> {
    if qty <= 0 {
        return Err(LedgerError::Validation(format!(
            "Quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}

fn require_cost(cost: Money) -> Result<(), LedgerError> {
    if !cost.is_positive() {
        return Err(LedgerError::Validation(format!(
            "Cost must be positive, got {}",
            cost
        )));
    }
    Ok(())
}
