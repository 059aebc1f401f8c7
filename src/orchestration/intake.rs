//! Event intake: routes inbound order events to the coordinators.
//!
//! Delivery is at-least-once and unordered. Redelivered events are absorbed by the
//! coordinators' outcome checks. Transient failures are nacked so the whole event is
//! redelivered; failures that can never succeed are logged and dead-lettered.

use crate::domain::{OrderEvent, OrderExecuted, Side};
use crate::engine::{
    CompensationCoordinator, CompensationRequest, Outcome, Settlement, SettlementCoordinator,
    SettlementRequest,
};
use crate::error::LedgerError;
use crate::eventbus::{Delivery, EventBusError, EventSource};
use std::future::Future;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    EventBus(#[from] EventBusError),
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub applied: usize,
    pub duplicates: usize,
}

impl IntakeReport {
    fn record<T>(&mut self, outcome: &Outcome<T>) {
        if outcome.is_duplicate() {
            self.duplicates += 1;
        } else {
            self.applied += 1;
        }
    }

    /// True when nothing changed: every leg had already been processed.
    pub fn is_duplicate(&self) -> bool {
        self.applied == 0
    }
}

/// Counters for one run of the consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub delivered: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

#[derive(Clone)]
pub struct EventIntake {
    settlement: SettlementCoordinator,
    compensation: CompensationCoordinator,
}

impl EventIntake {
    pub fn new(settlement: SettlementCoordinator, compensation: CompensationCoordinator) -> Self {
        Self {
            settlement,
            compensation,
        }
    }

    /// Apply one event.
    ///
    /// `OrderMatched` settles its BUY and SELL legs independently: both are always
    /// attempted, each in its own unit, so one wallet's rejection never holds back the
    /// other. A transient leg failure wins over a fatal one, so the event is redelivered
    /// while any leg can still succeed; the committed leg replays as a duplicate.
    pub async fn handle(&self, event: &OrderEvent) -> Result<IntakeReport, LedgerError> {
        let mut report = IntakeReport::default();
        match event {
            OrderEvent::OrderExecuted(executed) => {
                let request = SettlementRequest::from_event(executed)?;
                report.record(&self.settlement.settle(&request).await?);
            }
            OrderEvent::OrderFailed(failed) => {
                let request = CompensationRequest::from_event(failed)?;
                report.record(&self.compensation.compensate(&request).await?);
            }
            OrderEvent::OrderMatched(matched) => {
                let mut transient = None;
                let mut fatal = None;
                // legs() yields the BUY leg then the SELL leg
                for (side, leg) in [Side::Buy, Side::Sell].into_iter().zip(matched.legs()) {
                    match self.settle_leg(side, &leg).await {
                        Ok(outcome) => report.record(&outcome),
                        Err(e) if e.is_retryable() => {
                            transient.get_or_insert(e);
                        }
                        Err(e) => {
                            fatal.get_or_insert(e);
                        }
                    }
                }
                if let Some(e) = transient.or(fatal) {
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    async fn settle_leg(
        &self,
        side: Side,
        leg: &OrderExecuted,
    ) -> Result<Outcome<Settlement>, LedgerError> {
        let result = match SettlementRequest::from_event(leg) {
            Ok(request) => self.settlement.settle(&request).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            warn!(
                order_id = %leg.order_id,
                side = %side,
                error = %e,
                "Matched leg failed"
            );
            LedgerError::MatchedLeg {
                order_id: leg.order_id,
                side,
                source: Box::new(e),
            }
        })
    }

    /// Consume `source` until it is exhausted.
    pub async fn run<S>(&self, source: &S) -> Result<IntakeStats, IntakeError>
    where
        S: EventSource + ?Sized,
    {
        self.run_until(source, std::future::pending()).await
    }

    /// Consume `source` until it is exhausted or `shutdown` resolves.
    pub async fn run_until<S, F>(&self, source: &S, shutdown: F) -> Result<IntakeStats, IntakeError>
    where
        S: EventSource + ?Sized,
        F: Future<Output = ()>,
    {
        let mut stats = IntakeStats::default();
        tokio::pin!(shutdown);

        loop {
            let delivery = tokio::select! {
                _ = &mut shutdown => {
                    info!("Event intake shutting down");
                    break;
                }
                next = source.next() => match next? {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            stats.delivered += 1;
            self.process(source, delivery, &mut stats).await?;
        }

        info!(
            delivered = stats.delivered,
            applied = stats.applied,
            duplicates = stats.duplicates,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Event intake stopped"
        );
        Ok(stats)
    }

    async fn process<S>(
        &self,
        source: &S,
        delivery: Delivery,
        stats: &mut IntakeStats,
    ) -> Result<(), IntakeError>
    where
        S: EventSource + ?Sized,
    {
        match self.handle(&delivery.event).await {
            Ok(report) => {
                stats.applied += report.applied;
                stats.duplicates += report.duplicates;
                source.ack(&delivery.id).await?;
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    delivery_id = %delivery.id,
                    event = delivery.event.kind(),
                    error = %e,
                    "Transient failure handling event, requesting redelivery"
                );
                stats.retried += 1;
                source.nack(&delivery.id).await?;
            }
            Err(e) => {
                error!(
                    delivery_id = %delivery.id,
                    event = delivery.event.kind(),
                    code = e.code(),
                    error = %e,
                    "Event can never be applied, dead-lettering"
                );
                stats.dead_lettered += 1;
                source.dead_letter(&delivery, &e.to_string()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::db::Repository;
    use crate::domain::{Money, OrderExecuted, OrderFailed, OrderId, UserId, WalletId};
    use crate::engine::{Ledger, LedgerOptions};
    use crate::eventbus::{MockEventSource, RecordingPublisher};
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (EventIntake, Ledger, Arc<RecordingPublisher>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let publisher = Arc::new(RecordingPublisher::new());
        let timeout = Duration::from_secs(5);
        let intake = EventIntake::new(
            SettlementCoordinator::new(repo.clone(), publisher.clone(), timeout),
            CompensationCoordinator::new(repo.clone(), timeout),
        );
        let ledger = Ledger::new(repo, LedgerOptions::default());
        (intake, ledger, publisher, temp_dir)
    }

    fn m(s: &str) -> Money {
        Money::from_str(s).unwrap()
    }

    fn executed(wallet_id: WalletId, order: i64, side: &str) -> OrderEvent {
        OrderEvent::OrderExecuted(OrderExecuted {
            order_id: OrderId::new(order),
            wallet_id,
            side: side.to_string(),
            symbol: "AAPL".to_string(),
            quantity: 2,
            price: m("50"),
            total_amount: m("100"),
        })
    }

    #[tokio::test]
    async fn test_run_acks_applied_and_duplicate_deliveries() {
        let (intake, ledger, publisher, _temp) = setup().await;
        ledger.credit(UserId::new(1), m("100")).await.unwrap();
        let wallet = ledger.get_wallet(UserId::new(1)).await.unwrap();
        ledger
            .reserve_funds(wallet.id, m("100"), OrderId::new(1))
            .await
            .unwrap();

        let source = MockEventSource::new()
            .with_event("d-1", executed(wallet.id, 1, "BUY"))
            .with_event("d-2", executed(wallet.id, 1, "BUY"));

        let stats = intake.run(&source).await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(source.acked(), vec!["d-1", "d-2"]);
        assert_eq!(publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_run_dead_letters_invalid_side() {
        let (intake, ledger, _publisher, _temp) = setup().await;
        let wallet = ledger.get_wallet(UserId::new(1)).await.unwrap();

        let source = MockEventSource::new().with_event(
            "bad",
            OrderEvent::OrderFailed(OrderFailed {
                order_id: OrderId::new(3),
                wallet_id: wallet.id,
                side: "SIDEWAYS".to_string(),
                symbol: "AAPL".to_string(),
                quantity: 1,
                total_amount: m("10"),
                reason: "x".to_string(),
            }),
        );

        let stats = intake.run(&source).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(source.dead_lettered(), vec!["bad"]);
        assert!(source.nacked().is_empty());
    }

    #[tokio::test]
    async fn test_business_rejection_is_not_retried() {
        let (intake, ledger, _publisher, _temp) = setup().await;
        let wallet = ledger.get_wallet(UserId::new(1)).await.unwrap();

        // nothing reserved, so the BUY cannot commit its reserve
        let source = MockEventSource::new().with_event("d-1", executed(wallet.id, 8, "BUY"));
        let stats = intake.run(&source).await.unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.retried, 0);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let (intake, _ledger, _publisher, _temp) = setup().await;
        let (_sender, source) =
            crate::eventbus::event_channel(4, Duration::from_millis(10));

        let stats = intake
            .run_until(&source, tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(stats, IntakeStats::default());
    }
}
