//! Settlement coordinator: applies an executed order side to one wallet exactly once.
//!
//! BUY: reserved funds are spent, shares are added, and the order's PENDING hold becomes
//! the SETTLED DEBIT (a fresh SETTLED DEBIT is appended when there is no hold).
//! SELL: proceeds are credited, shares are removed at average cost, and a SETTLED
//! CREDIT is appended.
//!
//! The `settled` outcome row is written first inside the unit. If it already exists the
//! unit is rolled back and the call reports [`Outcome::Duplicate`]. `WalletSettled` is
//! published only after commit and only for applied settlements.

use crate::db::Repository;
use crate::domain::{
    Money, NewTransaction, OrderExecuted, OrderId, OrderStage, Position, Side, Symbol,
    Transaction, TransactionStatus, TransactionType, Wallet, WalletId, WalletSettled,
};
use crate::engine::{parse_side, position_book, with_timeout, Outcome};
use crate::error::LedgerError;
use crate::eventbus::EventPublisher;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A validated order side ready to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    pub wallet_id: WalletId,
    pub order_id: OrderId,
    pub side: Side,
    pub symbol: Symbol,
    pub quantity: i64,
    pub price: Money,
    /// Amount reported by the caller. Must equal price × quantity when present.
    pub total_amount: Option<Money>,
}

impl SettlementRequest {
    pub fn from_event(event: &OrderExecuted) -> Result<Self, LedgerError> {
        Ok(Self {
            wallet_id: event.wallet_id,
            order_id: event.order_id,
            side: parse_side(&event.side, event.order_id)?,
            symbol: Symbol::from_str(&event.symbol)?,
            quantity: event.quantity,
            price: event.price,
            total_amount: Some(event.total_amount),
        })
    }

    /// Executed amount: price × quantity.
    pub fn amount(&self) -> Result<Money, LedgerError> {
        self.price.try_times_qty(self.quantity)
    }

    fn validate(&self) -> Result<Money, LedgerError> {
        if self.quantity <= 0 {
            return Err(LedgerError::Validation(format!(
                "Quantity must be positive, got {}",
                self.quantity
            )));
        }
        if !self.price.is_positive() {
            return Err(LedgerError::Validation(format!(
                "Price must be positive, got {}",
                self.price
            )));
        }
        let amount = self.amount()?;
        if let Some(total) = self.total_amount {
            if total != amount {
                return Err(LedgerError::Validation(format!(
                    "Total amount {} does not match price x quantity {}",
                    total, amount
                )));
            }
        }
        Ok(amount)
    }
}

/// State after an applied settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub wallet: Wallet,
    pub position: Position,
    pub transaction: Transaction,
}

#[derive(Clone)]
pub struct SettlementCoordinator {
    repo: Arc<Repository>,
    publisher: Arc<dyn EventPublisher>,
    store_timeout: Duration,
}

impl SettlementCoordinator {
    pub fn new(
        repo: Arc<Repository>,
        publisher: Arc<dyn EventPublisher>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            publisher,
            store_timeout,
        }
    }

    /// Settle one order side. Redelivery of an already settled side is a no-op.
    ///
    /// # Errors
    /// `Validation` for malformed requests or an order side that was already compensated,
    /// business-rule errors when reserve or shares are short, `StoreTimeout`/`Store`
    /// when the unit could not complete. Nothing is written on error.
    pub async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<Outcome<Settlement>, LedgerError> {
        let amount = request.validate()?;

        let outcome = with_timeout(self.store_timeout, self.apply(request, amount)).await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, LedgerError::NegativeBalance { .. }) {
                    error!(order_id = %request.order_id, error = %e, "Settlement aborted on invariant violation");
                }
                return Err(e);
            }
        };

        match &outcome {
            Outcome::Applied(settlement) => {
                info!(
                    wallet_id = %request.wallet_id,
                    order_id = %request.order_id,
                    side = %request.side,
                    symbol = %request.symbol,
                    quantity = request.quantity,
                    amount = %amount,
                    "Order settled"
                );
                self.publish(request, amount, settlement).await;
            }
            Outcome::Duplicate => {
                info!(
                    wallet_id = %request.wallet_id,
                    order_id = %request.order_id,
                    side = %request.side,
                    "Duplicate settlement ignored"
                );
            }
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        request: &SettlementRequest,
        amount: Money,
    ) -> Result<Outcome<Settlement>, LedgerError> {
        let mut unit = self.repo.begin_wallet(request.wallet_id).await?;

        if unit
            .has_outcome(request.order_id, request.side, OrderStage::Compensated)
            .await?
        {
            warn!(order_id = %request.order_id, side = %request.side, "Settlement after compensation rejected");
            return Err(LedgerError::Validation(format!(
                "Order {} {} was already compensated",
                request.order_id, request.side
            )));
        }
        if !unit
            .record_outcome(
                request.order_id,
                request.side,
                OrderStage::Settled,
                Some(amount),
                None,
            )
            .await?
        {
            return Ok(Outcome::Duplicate);
        }

        let (position, transaction) = match request.side {
            Side::Buy => {
                let hold = unit
                    .pending_order_transaction(request.order_id, TransactionType::Debit)
                    .await?;
                unit.wallet_mut().commit_reserved(amount)?;
                if let Some(hold) = &hold {
                    // price improvement leaves part of the hold unspent
                    if hold.amount > amount {
                        unit.wallet_mut().release(hold.amount.try_sub(amount)?)?;
                    }
                }
                let position =
                    position_book::apply_buy(&mut unit, &request.symbol, request.quantity, amount)
                        .await?;
                let transaction = match hold {
                    Some(hold) => {
                        unit.finalize_transaction(hold.id, TransactionStatus::Settled, amount)
                            .await?
                    }
                    None => {
                        unit.append_transaction(NewTransaction::settled(
                            request.wallet_id,
                            TransactionType::Debit,
                            amount,
                            Some(request.order_id),
                        )?)
                        .await?
                    }
                };
                (position, transaction)
            }
            Side::Sell => {
                unit.wallet_mut().credit(amount)?;
                let (position, _cost_removed) =
                    position_book::apply_sell(&mut unit, &request.symbol, request.quantity)
                        .await?;
                let transaction = unit
                    .append_transaction(NewTransaction::settled(
                        request.wallet_id,
                        TransactionType::Credit,
                        amount,
                        Some(request.order_id),
                    )?)
                    .await?;
                (position, transaction)
            }
        };

        let wallet = unit.commit().await?;
        Ok(Outcome::Applied(Settlement {
            wallet,
            position,
            transaction,
        }))
    }

    async fn publish(&self, request: &SettlementRequest, amount: Money, settlement: &Settlement) {
        let event = WalletSettled {
            event_id: Uuid::new_v4(),
            order_id: request.order_id,
            wallet_id: request.wallet_id,
            side: request.side,
            symbol: request.symbol.clone(),
            quantity: request.quantity,
            price: request.price,
            total_amount: amount,
            settled_at: settlement
                .transaction
                .settled_at
                .unwrap_or(settlement.transaction.created_at),
        };
        if let Err(e) = self.publisher.publish_settled(&event).await {
            error!(
                order_id = %request.order_id,
                wallet_id = %request.wallet_id,
                error = %e,
                "Failed to publish WalletSettled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::UserId;
    use crate::engine::{Ledger, LedgerOptions};
    use crate::eventbus::RecordingPublisher;
    use tempfile::TempDir;

    struct Fixture {
        ledger: Ledger,
        coordinator: SettlementCoordinator,
        publisher: Arc<RecordingPublisher>,
        wallet_id: WalletId,
        _temp: TempDir,
    }

    async fn setup(publisher: RecordingPublisher) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let publisher = Arc::new(publisher);
        let ledger = Ledger::new(repo.clone(), LedgerOptions::default());
        let coordinator =
            SettlementCoordinator::new(repo, publisher.clone(), Duration::from_secs(5));
        let wallet = ledger.get_wallet(UserId::new(1)).await.unwrap();
        Fixture {
            ledger,
            coordinator,
            publisher,
            wallet_id: wallet.id,
            _temp: temp_dir,
        }
    }

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn request(wallet_id: WalletId, side: Side, order: i64, qty: i64, price: &str) -> SettlementRequest {
        SettlementRequest {
            wallet_id,
            order_id: OrderId::new(order),
            side,
            symbol: Symbol::from_str("AAPL").unwrap(),
            quantity: qty,
            price: m(price),
            total_amount: None,
        }
    }

    #[tokio::test]
    async fn test_buy_settlement_spends_reserve_and_settles_hold() {
        let f = setup(RecordingPublisher::new()).await;
        f.ledger.credit(UserId::new(1), m("1000.00")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("1000"), OrderId::new(7))
            .await
            .unwrap();

        let settlement = f
            .coordinator
            .settle(&request(f.wallet_id, Side::Buy, 7, 10, "100.00"))
            .await
            .unwrap()
            .applied()
            .expect("applied");

        assert_eq!(settlement.wallet.available_balance, Money::zero());
        assert_eq!(settlement.wallet.reserved_balance, Money::zero());
        assert_eq!(settlement.position.quantity, 10);
        assert_eq!(settlement.position.total_cost, m("1000"));
        assert_eq!(settlement.transaction.status, TransactionStatus::Settled);
        assert_eq!(settlement.transaction.tx_type, TransactionType::Debit);

        let order_txs = f.ledger.repo().transactions_for_order(OrderId::new(7)).await.unwrap();
        assert_eq!(order_txs.len(), 1);
        assert_eq!(f.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_settlement_is_noop() {
        let f = setup(RecordingPublisher::new()).await;
        f.ledger.credit(UserId::new(1), m("500")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("500"), OrderId::new(1))
            .await
            .unwrap();

        let req = request(f.wallet_id, Side::Buy, 1, 5, "100");
        assert!(!f.coordinator.settle(&req).await.unwrap().is_duplicate());
        assert!(f.coordinator.settle(&req).await.unwrap().is_duplicate());

        let wallet = f.ledger.wallet_by_id(f.wallet_id).await.unwrap();
        assert_eq!(wallet.reserved_balance, Money::zero());
        let settled: Vec<_> = f
            .ledger
            .repo()
            .transactions_for_order(OrderId::new(1))
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TransactionStatus::Settled)
            .collect();
        assert_eq!(settled.len(), 1);
        assert_eq!(f.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_price_improvement_releases_unspent_hold() {
        let f = setup(RecordingPublisher::new()).await;
        f.ledger.credit(UserId::new(1), m("1000")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("1000"), OrderId::new(2))
            .await
            .unwrap();

        let settlement = f
            .coordinator
            .settle(&request(f.wallet_id, Side::Buy, 2, 10, "95"))
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(settlement.wallet.available_balance, m("50"));
        assert_eq!(settlement.wallet.reserved_balance, Money::zero());
        assert_eq!(settlement.transaction.amount, m("950"));
    }

    #[tokio::test]
    async fn test_sell_settlement_credits_and_reduces_position() {
        let f = setup(RecordingPublisher::new()).await;
        f.ledger.credit(UserId::new(1), m("1000")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("1000"), OrderId::new(1))
            .await
            .unwrap();
        f.coordinator
            .settle(&request(f.wallet_id, Side::Buy, 1, 10, "100"))
            .await
            .unwrap();

        let settlement = f
            .coordinator
            .settle(&request(f.wallet_id, Side::Sell, 2, 4, "120"))
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(settlement.wallet.available_balance, m("480"));
        assert_eq!(settlement.position.quantity, 6);
        assert_eq!(settlement.position.total_cost, m("600"));
        assert_eq!(settlement.transaction.tx_type, TransactionType::Credit);
    }

    #[tokio::test]
    async fn test_sell_without_shares_rolls_back() {
        let f = setup(RecordingPublisher::new()).await;

        assert!(matches!(
            f.coordinator
                .settle(&request(f.wallet_id, Side::Sell, 3, 1, "10"))
                .await,
            Err(LedgerError::InsufficientShares { .. })
        ));

        let wallet = f.ledger.wallet_by_id(f.wallet_id).await.unwrap();
        assert_eq!(wallet.available_balance, Money::zero());
        assert!(f
            .ledger
            .repo()
            .find_outcome(OrderId::new(3), Side::Sell, OrderStage::Settled)
            .await
            .unwrap()
            .is_none());
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_total_amount_mismatch_rejected() {
        let f = setup(RecordingPublisher::new()).await;
        let mut req = request(f.wallet_id, Side::Buy, 4, 10, "100");
        req.total_amount = Some(m("999"));
        assert!(matches!(
            f.coordinator.settle(&req).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_amount_rejected() {
        let f = setup(RecordingPublisher::new()).await;
        let req = request(f.wallet_id, Side::Sell, 6, 2, "79228162514264337593543950335");
        assert!(matches!(
            f.coordinator.settle(&req).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(f
            .ledger
            .repo()
            .find_outcome(OrderId::new(6), Side::Sell, OrderStage::Settled)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_settlement() {
        let f = setup(RecordingPublisher::failing()).await;
        f.ledger.credit(UserId::new(1), m("100")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("100"), OrderId::new(5))
            .await
            .unwrap();

        let outcome = f
            .coordinator
            .settle(&request(f.wallet_id, Side::Buy, 5, 1, "100"))
            .await
            .unwrap();
        assert!(!outcome.is_duplicate());
        let position = f
            .ledger
            .repo()
            .find_position(f.wallet_id, &Symbol::from_str("AAPL").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.quantity, 1);
    }

    #[test]
    fn test_request_from_event_rejects_bad_side() {
        let event = OrderExecuted {
            order_id: OrderId::new(1),
            wallet_id: WalletId::new(1),
            side: "SHORT".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 1,
            price: m("1"),
            total_amount: m("1"),
        };
        assert!(matches!(
            SettlementRequest::from_event(&event),
            Err(LedgerError::InvalidOrderSide(_))
        ));
    }
}
