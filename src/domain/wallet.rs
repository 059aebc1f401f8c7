//! Wallet aggregate: the balance state machine.

use crate::domain::{Currency, Money, UserId, WalletId};
use crate::error::LedgerError;
use serde::Serialize;

/// A user's cash balances, split into available and reserved.
///
/// Balances change only through [`credit`](Wallet::credit), [`debit`](Wallet::debit),
/// [`reserve`](Wallet::reserve), [`release`](Wallet::release) and
/// [`commit_reserved`](Wallet::commit_reserved). A failed call leaves both balances untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: Currency,
    pub available_balance: Money,
    pub reserved_balance: Money,
    #[serde(skip)]
    pub version: i64,
}

impl Wallet {
    /// available += amount
    pub fn credit(&mut self, amount: Money) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.available_balance = self.available_balance.try_add(amount)?;
        Ok(())
    }

    /// available -= amount
    pub fn debit(&mut self, amount: Money) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.require_available(amount)?;
        self.available_balance = self.available_balance.try_sub(amount)?;
        Ok(())
    }

    /// Move `amount` from available to reserved.
    pub fn reserve(&mut self, amount: Money) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.require_available(amount)?;
        let available = self.available_balance.try_sub(amount)?;
        let reserved = self.reserved_balance.try_add(amount)?;
        self.available_balance = available;
        self.reserved_balance = reserved;
        Ok(())
    }

    /// Move `amount` from reserved back to available.
    pub fn release(&mut self, amount: Money) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.require_reserved(amount)?;
        let reserved = self.reserved_balance.try_sub(amount)?;
        let available = self.available_balance.try_add(amount)?;
        self.reserved_balance = reserved;
        self.available_balance = available;
        Ok(())
    }

    /// Spend reserved funds. Nothing returns to available.
    pub fn commit_reserved(&mut self, amount: Money) -> Result<(), LedgerError> {
        require_positive(amount)?;
        self.require_reserved(amount)?;
        self.reserved_balance = self.reserved_balance.try_sub(amount)?;
        Ok(())
    }

    pub fn total_exposure(&self) -> Result<Money, LedgerError> {
        self.available_balance.try_add(self.reserved_balance)
    }

    /// Post-mutation invariant: both balances non-negative.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.available_balance.is_negative() || self.reserved_balance.is_negative() {
            return Err(LedgerError::NegativeBalance {
                available: self.available_balance,
                reserved: self.reserved_balance,
            });
        }
        Ok(())
    }

    fn require_available(&self, amount: Money) -> Result<(), LedgerError> {
        if self.available_balance < amount {
            return Err(LedgerError::InsufficientFunds {
                available: self.available_balance,
                requested: amount,
            });
        }
        Ok(())
    }

    fn require_reserved(&self, amount: Money) -> Result<(), LedgerError> {
        if self.reserved_balance < amount {
            return Err(LedgerError::InsufficientReserve {
                reserved: self.reserved_balance,
                requested: amount,
            });
        }
        Ok(())
    }
}

pub(crate) fn require_positive(amount: Money) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::Validation(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn wallet(available: &str, reserved: &str) -> Wallet {
        Wallet {
            id: WalletId::new(1),
            user_id: UserId::new(100),
            currency: Currency::from_str("USD").unwrap(),
            available_balance: m(available),
            reserved_balance: m(reserved),
            version: 0,
        }
    }

    #[test]
    fn test_credit_and_debit() {
        let mut w = wallet("1000.00", "0");
        w.credit(m("500.00")).unwrap();
        assert_eq!(w.available_balance, m("1500"));
        w.debit(m("300.00")).unwrap();
        assert_eq!(w.available_balance, m("1200"));
    }

    #[test]
    fn test_credit_then_debit_restores_balance() {
        let mut w = wallet("42.17", "0");
        w.credit(m("13.01")).unwrap();
        w.debit(m("13.01")).unwrap();
        assert_eq!(w.available_balance, m("42.17"));
    }

    #[test]
    fn test_debit_insufficient_leaves_state() {
        let mut w = wallet("100", "0");
        let before = w.clone();
        match w.debit(m("200")) {
            Err(LedgerError::InsufficientFunds {
                available,
                requested,
            }) => {
                assert_eq!(available, m("100"));
                assert_eq!(requested, m("200"));
            }
            other => panic!("Expected InsufficientFunds, got {:?}", other),
        }
        assert_eq!(w, before);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut w = wallet("100", "100");
        let before = w.clone();
        assert!(matches!(w.credit(Money::zero()), Err(LedgerError::Validation(_))));
        assert!(matches!(w.debit(m("-5")), Err(LedgerError::Validation(_))));
        assert!(matches!(w.reserve(m("0")), Err(LedgerError::Validation(_))));
        assert!(matches!(w.release(m("-1")), Err(LedgerError::Validation(_))));
        assert!(matches!(
            w.commit_reserved(Money::zero()),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(w, before);
    }

    #[test]
    fn test_reserve_then_release_restores_balances() {
        let mut w = wallet("750.25", "10");
        let before = w.clone();
        w.reserve(m("500.25")).unwrap();
        assert_eq!(w.available_balance, m("250"));
        assert_eq!(w.reserved_balance, m("510.25"));
        w.release(m("500.25")).unwrap();
        assert_eq!(w, before);
    }

    #[test]
    fn test_reserve_then_commit_spends_funds() {
        let mut w = wallet("1000", "0");
        w.reserve(m("1000")).unwrap();
        let available_after_reserve = w.available_balance;
        w.commit_reserved(m("1000")).unwrap();
        assert_eq!(w.reserved_balance, Money::zero());
        assert_eq!(w.available_balance, available_after_reserve);
        assert_eq!(w.total_exposure().unwrap(), Money::zero());
    }

    #[test]
    fn test_reserve_requires_available() {
        let mut w = wallet("10", "0");
        assert!(matches!(
            w.reserve(m("10.01")),
            Err(LedgerError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_release_and_commit_require_reserve() {
        let mut w = wallet("1000", "50");
        assert!(matches!(
            w.release(m("51")),
            Err(LedgerError::InsufficientReserve { .. })
        ));
        assert!(matches!(
            w.commit_reserved(m("50.01")),
            Err(LedgerError::InsufficientReserve { .. })
        ));
        assert_eq!(w.reserved_balance, m("50"));
    }

    #[test]
    fn test_credit_overflow_rejected_without_change() {
        let mut w = wallet("50000000000000000000000000000", "0");
        let before = w.clone();
        assert!(matches!(
            w.credit(m("50000000000000000000000000000")),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(w, before);
    }

    #[test]
    fn test_release_overflow_leaves_both_balances() {
        let mut w = wallet("70000000000000000000000000000", "70000000000000000000000000000");
        let before = w.clone();
        assert!(matches!(
            w.release(m("70000000000000000000000000000")),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(w, before);
    }

    #[test]
    fn test_validate_detects_negative_balance() {
        let w = wallet("-0.01", "0");
        assert!(matches!(
            w.validate(),
            Err(LedgerError::NegativeBalance { .. })
        ));
        assert!(wallet("0", "0").validate().is_ok());
    }
}
