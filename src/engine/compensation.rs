//! Compensation coordinator: reverses what a failed order set aside.

use crate::db::Repository;
use crate::domain::{
    Money, NewTransaction, OrderFailed, OrderId, OrderStage, Position, Side, Symbol,
    Transaction, TransactionStatus, TransactionType, Wallet, WalletId,
};
use crate::engine::{parse_side, position_book, with_timeout, Outcome};
use crate::error::LedgerError;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reason recorded for refunds of cancelled orders.
pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensationRequest {
    pub wallet_id: WalletId,
    pub order_id: OrderId,
    pub side: Side,
    /// Required for SELL.
    pub symbol: Option<Symbol>,
    pub quantity: i64,
    /// Cash to release for BUY.
    pub amount: Money,
    pub reason: String,
}

impl CompensationRequest {
    pub fn from_event(event: &OrderFailed) -> Result<Self, LedgerError> {
        Ok(Self {
            wallet_id: event.wallet_id,
            order_id: event.order_id,
            side: parse_side(&event.side, event.order_id)?,
            symbol: Some(Symbol::from_str(&event.symbol)?),
            quantity: event.quantity,
            amount: event.total_amount,
            reason: event.reason.clone(),
        })
    }

    /// Refund of a BUY order cancelled before execution.
    pub fn cancelled_buy(wallet_id: WalletId, order_id: OrderId, amount: Money) -> Self {
        Self {
            wallet_id,
            order_id,
            side: Side::Buy,
            symbol: None,
            quantity: 0,
            amount,
            reason: CANCELLED_REASON.to_string(),
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        match self.side {
            Side::Buy if !self.amount.is_positive() => Err(LedgerError::Validation(format!(
                "Compensation amount must be positive, got {}",
                self.amount
            ))),
            Side::Sell if self.symbol.is_none() => Err(LedgerError::Validation(
                "Symbol is required to compensate a SELL".to_string(),
            )),
            Side::Sell if self.quantity <= 0 => Err(LedgerError::Validation(format!(
                "Quantity must be positive, got {}",
                self.quantity
            ))),
            _ => Ok(()),
        }
    }
}

/// State after an applied compensation.
///
/// BUY yields the CREDIT compensation transaction, SELL the restored position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compensation {
    pub wallet: Wallet,
    pub transaction: Option<Transaction>,
    pub position: Option<Position>,
}

#[derive(Clone)]
pub struct CompensationCoordinator {
    repo: Arc<Repository>,
    store_timeout: Duration,
}

impl CompensationCoordinator {
    pub fn new(repo: Arc<Repository>, store_timeout: Duration) -> Self {
        Self {
            repo,
            store_timeout,
        }
    }

    /// Reverse a failed order side. Replays are no-ops.
    ///
    /// # Errors
    /// `Validation` if the order side already settled or a BUY's amount differs from its
    /// PENDING hold, `InsufficientReserve` when nothing is reserved for a BUY, `NotFound`
    /// when a SELL's position does not exist.
    pub async fn compensate(
        &self,
        request: &CompensationRequest,
    ) -> Result<Outcome<Compensation>, LedgerError> {
        request.validate()?;

        let outcome = with_timeout(self.store_timeout, self.apply(request)).await?;
        match &outcome {
            Outcome::Applied(_) => info!(
                wallet_id = %request.wallet_id,
                order_id = %request.order_id,
                side = %request.side,
                reason = %request.reason,
                "Order compensated"
            ),
            Outcome::Duplicate => info!(
                wallet_id = %request.wallet_id,
                order_id = %request.order_id,
                side = %request.side,
                "Duplicate compensation ignored"
            ),
        }
        Ok(outcome)
    }

    /// Return the hold of a cancelled BUY order to available balance.
    pub async fn refund_cancelled_order(
        &self,
        wallet_id: WalletId,
        amount: Money,
        order_id: OrderId,
    ) -> Result<Outcome<Compensation>, LedgerError> {
        self.compensate(&CompensationRequest::cancelled_buy(wallet_id, order_id, amount))
            .await
    }

    async fn apply(
        &self,
        request: &CompensationRequest,
    ) -> Result<Outcome<Compensation>, LedgerError> {
        let mut unit = self.repo.begin_wallet(request.wallet_id).await?;

        if unit
            .has_outcome(request.order_id, request.side, OrderStage::Settled)
            .await?
        {
            warn!(order_id = %request.order_id, side = %request.side, "Compensation after settlement rejected");
            return Err(LedgerError::Validation(format!(
                "Order {} {} was already settled",
                request.order_id, request.side
            )));
        }
        let amount = (request.side == Side::Buy).then_some(request.amount);
        let reason = (!request.reason.is_empty()).then_some(request.reason.as_str());
        if !unit
            .record_outcome(
                request.order_id,
                request.side,
                OrderStage::Compensated,
                amount,
                reason,
            )
            .await?
        {
            return Ok(Outcome::Duplicate);
        }

        let (transaction, position) = match request.side {
            Side::Buy => {
                let hold = unit
                    .pending_order_transaction(request.order_id, TransactionType::Debit)
                    .await?;
                // the order's own hold decides what goes back, never the caller's figure
                let released = match &hold {
                    Some(hold) if hold.amount != request.amount => {
                        warn!(
                            order_id = %request.order_id,
                            held = %hold.amount,
                            requested = %request.amount,
                            "Compensation amount does not match the order's hold"
                        );
                        return Err(LedgerError::Validation(format!(
                            "Compensation amount {} does not match hold {} for order {}",
                            request.amount, hold.amount, request.order_id
                        )));
                    }
                    Some(hold) => hold.amount,
                    None => request.amount,
                };
                unit.wallet_mut().release(released)?;
                if let Some(hold) = hold {
                    unit.finalize_transaction(hold.id, TransactionStatus::Failed, hold.amount)
                        .await?;
                }
                let credit = unit
                    .append_transaction(NewTransaction::settled(
                        request.wallet_id,
                        TransactionType::Credit,
                        released,
                        Some(request.order_id),
                    )?)
                    .await?;
                (Some(credit), None)
            }
            Side::Sell => {
                let symbol = request.symbol.as_ref().ok_or_else(|| {
                    LedgerError::Validation("Symbol is required to compensate a SELL".to_string())
                })?;
                let position =
                    position_book::restore_shares(&mut unit, symbol, request.quantity).await?;
                (None, Some(position))
            }
        };

        let wallet = unit.commit().await?;
        Ok(Outcome::Applied(Compensation {
            wallet,
            transaction,
            position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::UserId;
    use crate::engine::{Ledger, LedgerOptions, SettlementCoordinator, SettlementRequest};
    use crate::eventbus::LoggingPublisher;
    use tempfile::TempDir;

    struct Fixture {
        ledger: Ledger,
        compensation: CompensationCoordinator,
        settlement: SettlementCoordinator,
        wallet_id: WalletId,
        _temp: TempDir,
    }

    async fn setup() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let ledger = Ledger::new(repo.clone(), LedgerOptions::default());
        let wallet = ledger.get_wallet(UserId::new(1)).await.unwrap();
        Fixture {
            compensation: CompensationCoordinator::new(repo.clone(), Duration::from_secs(5)),
            settlement: SettlementCoordinator::new(
                repo,
                Arc::new(LoggingPublisher),
                Duration::from_secs(5),
            ),
            ledger,
            wallet_id: wallet.id,
            _temp: temp_dir,
        }
    }

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn buy_failure(wallet_id: WalletId, order: i64, amount: &str) -> CompensationRequest {
        CompensationRequest {
            wallet_id,
            order_id: OrderId::new(order),
            side: Side::Buy,
            symbol: Some(Symbol::from_str("AAPL").unwrap()),
            quantity: 5,
            amount: m(amount),
            reason: "rejected".to_string(),
        }
    }

    #[tokio::test]
    async fn test_buy_compensation_restores_pre_reserve_balances() {
        let f = setup().await;
        f.ledger.credit(UserId::new(1), m("800")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("500"), OrderId::new(9))
            .await
            .unwrap();

        let comp = f
            .compensation
            .compensate(&buy_failure(f.wallet_id, 9, "500"))
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(comp.wallet.available_balance, m("800"));
        assert_eq!(comp.wallet.reserved_balance, Money::zero());
        let credit = comp.transaction.unwrap();
        assert_eq!(credit.tx_type, TransactionType::Credit);
        assert_eq!(credit.status, TransactionStatus::Settled);

        let replay = f
            .compensation
            .compensate(&buy_failure(f.wallet_id, 9, "500"))
            .await
            .unwrap();
        assert!(replay.is_duplicate());

        let txs = f.ledger.repo().transactions_for_order(OrderId::new(9)).await.unwrap();
        let statuses: Vec<_> = txs.iter().map(|t| (t.tx_type, t.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (TransactionType::Debit, TransactionStatus::Failed),
                (TransactionType::Credit, TransactionStatus::Settled),
            ]
        );
    }

    #[tokio::test]
    async fn test_buy_compensation_must_match_hold() {
        let f = setup().await;
        f.ledger.credit(UserId::new(1), m("800")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("500"), OrderId::new(9))
            .await
            .unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("200"), OrderId::new(10))
            .await
            .unwrap();

        // releasing more than order 9 holds would eat into order 10's reserve
        assert!(matches!(
            f.compensation
                .compensate(&buy_failure(f.wallet_id, 9, "600"))
                .await,
            Err(LedgerError::Validation(_))
        ));
        let wallet = f.ledger.wallet_by_id(f.wallet_id).await.unwrap();
        assert_eq!(wallet.reserved_balance, m("700"));
        assert!(f
            .ledger
            .repo()
            .find_outcome(OrderId::new(9), Side::Buy, OrderStage::Compensated)
            .await
            .unwrap()
            .is_none());

        let comp = f
            .compensation
            .compensate(&buy_failure(f.wallet_id, 9, "500"))
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(comp.wallet.available_balance, m("600"));
        assert_eq!(comp.wallet.reserved_balance, m("200"));
        assert_eq!(comp.transaction.unwrap().amount, m("500"));
    }

    #[tokio::test]
    async fn test_sell_compensation_restores_shares_only() {
        let f = setup().await;
        f.ledger.credit(UserId::new(1), m("1000")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("1000"), OrderId::new(1))
            .await
            .unwrap();
        f.settlement
            .settle(&SettlementRequest {
                wallet_id: f.wallet_id,
                order_id: OrderId::new(1),
                side: Side::Buy,
                symbol: Symbol::from_str("AAPL").unwrap(),
                quantity: 10,
                price: m("100"),
                total_amount: None,
            })
            .await
            .unwrap();

        let request = CompensationRequest {
            side: Side::Sell,
            quantity: 3,
            ..buy_failure(f.wallet_id, 2, "300")
        };
        let comp = f.compensation.compensate(&request).await.unwrap().applied().unwrap();
        assert!(comp.transaction.is_none());
        assert_eq!(comp.position.unwrap().quantity, 13);
        assert_eq!(comp.wallet.available_balance, Money::zero());

        let record = f
            .ledger
            .repo()
            .find_outcome(OrderId::new(2), Side::Sell, OrderStage::Compensated)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reason.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn test_sell_compensation_without_position_not_found() {
        let f = setup().await;
        let request = CompensationRequest {
            side: Side::Sell,
            ..buy_failure(f.wallet_id, 2, "1")
        };
        assert!(matches!(
            f.compensation.compensate(&request).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compensation_after_settlement_rejected() {
        let f = setup().await;
        f.ledger.credit(UserId::new(1), m("100")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("100"), OrderId::new(4))
            .await
            .unwrap();
        f.settlement
            .settle(&SettlementRequest {
                wallet_id: f.wallet_id,
                order_id: OrderId::new(4),
                side: Side::Buy,
                symbol: Symbol::from_str("AAPL").unwrap(),
                quantity: 1,
                price: m("100"),
                total_amount: Some(m("100")),
            })
            .await
            .unwrap();

        assert!(matches!(
            f.compensation
                .compensate(&buy_failure(f.wallet_id, 4, "100"))
                .await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_refund_cancelled_order() {
        let f = setup().await;
        f.ledger.credit(UserId::new(1), m("250")).await.unwrap();
        f.ledger
            .reserve_funds(f.wallet_id, m("250"), OrderId::new(6))
            .await
            .unwrap();

        let comp = f
            .compensation
            .refund_cancelled_order(f.wallet_id, m("250"), OrderId::new(6))
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(comp.wallet.available_balance, m("250"));

        let record = f
            .ledger
            .repo()
            .find_outcome(OrderId::new(6), Side::Buy, OrderStage::Compensated)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.reason.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(record.amount, Some(m("250")));
    }

    #[test]
    fn test_from_event_invalid_side() {
        let event = OrderFailed {
            order_id: OrderId::new(1),
            wallet_id: WalletId::new(1),
            side: "HOLD".to_string(),
            symbol: "AAPL".to_string(),
            quantity: 1,
            total_amount: m("10"),
            reason: String::new(),
        };
        assert!(matches!(
            CompensationRequest::from_event(&event),
            Err(LedgerError::InvalidOrderSide(_))
        ));
    }
}
