//! Fixed-point money type backed by rust_decimal.
//!
//! Amounts are parsed from and persisted as canonical strings (never floats).
//! Division is the only lossy operation and always goes through
//! [`Money::div_qty_half_up`] so the rounding policy stays in one place.
//! Addition, subtraction and multiplication are overflow-checked; there are no
//! operator impls, since amounts arrive from callers and the decimal operators panic.

use crate::error::LedgerError;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Decimal places kept when a per-share cost is derived by division.
pub const COST_SCALE: u32 = 10;

/// Monetary amount in the wallet's currency.
///
/// Serializes to a JSON string so no precision is lost in transit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Money {
    pub fn new(value: RustDecimal) -> Self {
        Money(value)
    }

    /// Parse an amount from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Money)
    }

    /// Canonical string form: trailing zeros removed, no exponent notation.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// `self + rhs`, or `Validation` when the sum leaves the decimal range.
    pub fn try_add(self, rhs: Money) -> Result<Money, LedgerError> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or_else(|| overflow(format!("{} + {}", self, rhs)))
    }

    /// `self - rhs`, or `Validation` when the difference leaves the decimal range.
    pub fn try_sub(self, rhs: Money) -> Result<Money, LedgerError> {
        self.0
            .checked_sub(rhs.0)
            .map(Money)
            .ok_or_else(|| overflow(format!("{} - {}", self, rhs)))
    }

    /// Amount for `qty` units at this price. Exact, or `Validation` on overflow.
    pub fn try_times_qty(self, qty: i64) -> Result<Money, LedgerError> {
        self.0
            .checked_mul(RustDecimal::from(qty))
            .map(Money)
            .ok_or_else(|| overflow(format!("{} x {}", self, qty)))
    }

    /// Divide by a share count, rounding half-up to [`COST_SCALE`] places.
    ///
    /// Returns `None` when `qty` is zero.
    pub fn div_qty_half_up(&self, qty: i64) -> Option<Money> {
        if qty == 0 {
            return None;
        }
        let quotient = self.0.checked_div(RustDecimal::from(qty))?;
        Some(Money(quotient.round_dp_with_strategy(
            COST_SCALE,
            RoundingStrategy::MidpointAwayFromZero,
        )))
    }

    /// Round half-up to [`COST_SCALE`] places.
    pub fn round_cost(&self) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Money {
    fn from(value: RustDecimal) -> Self {
        Money(value)
    }
}

impl From<Money> for RustDecimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

fn overflow(expr: String) -> LedgerError {
    LedgerError::Validation(format!("Amount out of range: {}", expr))
}
