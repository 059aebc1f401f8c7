//! Ledger service: client balance operations and order reservations.

use crate::db::Repository;
use crate::domain::wallet::require_positive;
use crate::domain::{
    Money, NewTransaction, OrderId, OrderStage, Position, Side, Transaction, TransactionType,
    UserId, Wallet, WalletId,
};
use crate::engine::{with_timeout, LedgerOptions, Outcome};
use crate::error::LedgerError;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Ledger {
    repo: Arc<Repository>,
    options: LedgerOptions,
}

impl Ledger {
    pub fn new(repo: Arc<Repository>, options: LedgerOptions) -> Self {
        Self { repo, options }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// The user's wallet, created with the default currency on first access.
    pub async fn get_wallet(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        with_timeout(
            self.options.store_timeout,
            self.repo
                .get_or_create_wallet(user_id, &self.options.default_currency),
        )
        .await
    }

    pub async fn wallet_by_id(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        with_timeout(self.options.store_timeout, self.repo.get_wallet(wallet_id)).await
    }

    /// Add funds to available balance and log a SETTLED CREDIT.
    pub async fn credit(&self, user_id: UserId, amount: Money) -> Result<Transaction, LedgerError> {
        require_positive(amount)?;
        self.check_credit_limits(amount)?;
        let wallet = self.get_wallet(user_id).await?;

        let tx = with_timeout(self.options.store_timeout, async {
            let mut unit = self.repo.begin_wallet(wallet.id).await?;
            unit.wallet_mut().credit(amount)?;
            let tx = unit
                .append_transaction(NewTransaction::settled(
                    wallet.id,
                    TransactionType::Credit,
                    amount,
                    None,
                )?)
                .await?;
            unit.commit().await?;
            Ok(tx)
        })
        .await?;

        info!(user_id = %user_id, wallet_id = %wallet.id, amount = %amount, "Credited wallet");
        Ok(tx)
    }

    /// Remove funds from available balance and log a SETTLED DEBIT.
    ///
    /// # Errors
    /// `InsufficientFunds` if available < amount; the wallet is left unchanged.
    pub async fn debit(&self, user_id: UserId, amount: Money) -> Result<Transaction, LedgerError> {
        require_positive(amount)?;
        let wallet = self.get_wallet(user_id).await?;

        let result = with_timeout(self.options.store_timeout, async {
            let mut unit = self.repo.begin_wallet(wallet.id).await?;
            unit.wallet_mut().debit(amount)?;
            let tx = unit
                .append_transaction(NewTransaction::settled(
                    wallet.id,
                    TransactionType::Debit,
                    amount,
                    None,
                )?)
                .await?;
            unit.commit().await?;
            Ok(tx)
        })
        .await;

        match result {
            Ok(tx) => {
                info!(user_id = %user_id, wallet_id = %wallet.id, amount = %amount, "Debited wallet");
                Ok(tx)
            }
            Err(e @ LedgerError::InsufficientFunds { .. }) => {
                warn!(user_id = %user_id, wallet_id = %wallet.id, error = %e, "Debit rejected");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Set funds aside for a BUY order and log the PENDING DEBIT hold.
    ///
    /// A repeated reservation for the same order is a no-op. Reserving for an order
    /// that already settled or was compensated is rejected.
    pub async fn reserve_funds(
        &self,
        wallet_id: WalletId,
        amount: Money,
        order_id: OrderId,
    ) -> Result<Outcome<Transaction>, LedgerError> {
        require_positive(amount)?;

        let outcome = with_timeout(self.options.store_timeout, async {
            let mut unit = self.repo.begin_wallet(wallet_id).await?;

            for terminal in [OrderStage::Settled, OrderStage::Compensated] {
                if unit.has_outcome(order_id, Side::Buy, terminal).await? {
                    return Err(LedgerError::Validation(format!(
                        "Order {} is already {}",
                        order_id,
                        terminal.as_str()
                    )));
                }
            }
            if !unit
                .record_outcome(order_id, Side::Buy, OrderStage::Reserved, Some(amount), None)
                .await?
            {
                return Ok(Outcome::Duplicate);
            }

            unit.wallet_mut().reserve(amount)?;
            let hold = unit
                .append_transaction(NewTransaction::pending(
                    wallet_id,
                    TransactionType::Debit,
                    amount,
                    Some(order_id),
                )?)
                .await?;
            unit.commit().await?;
            Ok(Outcome::Applied(hold))
        })
        .await?;

        match &outcome {
            Outcome::Applied(_) => {
                info!(wallet_id = %wallet_id, order_id = %order_id, amount = %amount, "Reserved funds")
            }
            Outcome::Duplicate => {
                info!(wallet_id = %wallet_id, order_id = %order_id, "Duplicate reservation ignored")
            }
        }
        Ok(outcome)
    }

    pub async fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        let wallet = self.get_wallet(user_id).await?;
        with_timeout(
            self.options.store_timeout,
            self.repo.list_transactions(wallet.id),
        )
        .await
    }

    pub async fn list_positions(&self, user_id: UserId) -> Result<Vec<Position>, LedgerError> {
        let wallet = self.get_wallet(user_id).await?;
        with_timeout(self.options.store_timeout, self.repo.list_positions(wallet.id)).await
    }

    fn check_credit_limits(&self, amount: Money) -> Result<(), LedgerError> {
        let limits = &self.options.credit_limits;
        if let Some(min) = limits.min {
            if amount < min {
                return Err(LedgerError::Validation(format!(
                    "Credit amount must be at least {}",
                    min
                )));
            }
        }
        if let Some(max) = limits.max {
            if amount > max {
                return Err(LedgerError::Validation(format!(
                    "Credit amount must not exceed {}",
                    max
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditLimits;
    use crate::db::migrations::init_db;
    use crate::domain::TransactionStatus;
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn setup_ledger(options: LedgerOptions) -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Ledger::new(Arc::new(Repository::new(pool)), options), temp_dir)
    }

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_credit_then_debit_restores_balance() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);

        ledger.credit(user, m("1000.00")).await.unwrap();
        ledger.credit(user, m("500.00")).await.unwrap();
        let debit = ledger.debit(user, m("500.00")).await.unwrap();
        assert_eq!(debit.tx_type, TransactionType::Debit);
        assert_eq!(debit.status, TransactionStatus::Settled);
        assert!(debit.order_id.is_none());

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.available_balance, m("1000"));
        assert_eq!(ledger.list_transactions(user).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_debit_insufficient_funds_leaves_wallet() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);
        ledger.credit(user, m("100")).await.unwrap();

        match ledger.debit(user, m("200")).await {
            Err(LedgerError::InsufficientFunds {
                available,
                requested,
            }) => {
                assert_eq!(available, m("100"));
                assert_eq!(requested, m("200"));
            }
            other => panic!("Expected InsufficientFunds, got {:?}", other),
        }

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.available_balance, m("100"));
        assert_eq!(ledger.list_transactions(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);
        assert!(matches!(
            ledger.credit(user, Money::zero()).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ledger.debit(user, m("-5")).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_past_decimal_range_rejected() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);
        let huge = m("50000000000000000000000000000");

        ledger.credit(user, huge).await.unwrap();
        assert!(matches!(
            ledger.credit(user, huge).await,
            Err(LedgerError::Validation(_))
        ));

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.available_balance, huge);
        assert_eq!(ledger.list_transactions(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_limits_enforced() {
        let options = LedgerOptions {
            credit_limits: CreditLimits {
                min: Some(m("10.00")),
                max: Some(m("10000.00")),
            },
            ..LedgerOptions::default()
        };
        let (ledger, _temp) = setup_ledger(options).await;
        let user = UserId::new(1);

        assert!(matches!(
            ledger.credit(user, m("9.99")).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            ledger.credit(user, m("10000.01")).await,
            Err(LedgerError::Validation(_))
        ));
        ledger.credit(user, m("10.00")).await.unwrap();
        ledger.credit(user, m("10000.00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_order() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);
        ledger.credit(user, m("1000")).await.unwrap();
        let wallet = ledger.get_wallet(user).await.unwrap();

        let first = ledger
            .reserve_funds(wallet.id, m("400"), OrderId::new(7))
            .await
            .unwrap();
        let hold = first.applied().expect("first reservation applies");
        assert_eq!(hold.status, TransactionStatus::Pending);
        assert_eq!(hold.order_id, Some(OrderId::new(7)));

        let second = ledger
            .reserve_funds(wallet.id, m("400"), OrderId::new(7))
            .await
            .unwrap();
        assert!(second.is_duplicate());

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.available_balance, m("600"));
        assert_eq!(wallet.reserved_balance, m("400"));
    }

    #[tokio::test]
    async fn test_reserve_insufficient_funds_records_nothing() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        let user = UserId::new(1);
        ledger.credit(user, m("100")).await.unwrap();
        let wallet = ledger.get_wallet(user).await.unwrap();

        assert!(matches!(
            ledger
                .reserve_funds(wallet.id, m("500"), OrderId::new(3))
                .await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        ledger.credit(user, m("400")).await.unwrap();
        let retried = ledger
            .reserve_funds(wallet.id, m("500"), OrderId::new(3))
            .await
            .unwrap();
        assert!(!retried.is_duplicate());
    }

    #[tokio::test]
    async fn test_reserve_unknown_wallet_not_found() {
        let (ledger, _temp) = setup_ledger(LedgerOptions::default()).await;
        assert!(matches!(
            ledger
                .reserve_funds(WalletId::new(99), m("1"), OrderId::new(1))
                .await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
