pub mod health;
pub mod internal;
pub mod wallet;

use crate::config::Config;
use crate::db::Repository;
use crate::engine::{CompensationCoordinator, Ledger, LedgerOptions, SettlementCoordinator};
use crate::eventbus::{EventPublisher, EventSender};
use crate::orchestration::{EventIntake, IdempotencyGuard, IdempotencyStore};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub ledger: Arc<Ledger>,
    pub settlement: Arc<SettlementCoordinator>,
    pub compensation: Arc<CompensationCoordinator>,
    pub intake: Arc<EventIntake>,
    pub idempotency: Arc<IdempotencyGuard>,
    pub event_sender: Option<EventSender>,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        config: Config,
        publisher: Arc<dyn EventPublisher>,
        idempotency_store: Arc<dyn IdempotencyStore>,
    ) -> Self {
        let options = LedgerOptions::from_config(&config);
        let settlement =
            SettlementCoordinator::new(repo.clone(), publisher, config.store_timeout);
        let compensation = CompensationCoordinator::new(repo.clone(), config.store_timeout);
        let intake = EventIntake::new(settlement.clone(), compensation.clone());
        Self {
            ledger: Arc::new(Ledger::new(repo.clone(), options)),
            settlement: Arc::new(settlement),
            compensation: Arc::new(compensation),
            intake: Arc::new(intake),
            idempotency: Arc::new(IdempotencyGuard::new(
                idempotency_store,
                config.idempotency_ttl,
            )),
            event_sender: None,
            repo,
            config,
        }
    }

    /// Route `POST /internal/events/enqueue` onto an in-process event channel.
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/wallet/me", get(wallet::get_my_wallet))
        .route("/v1/wallet/transactions", get(wallet::list_transactions))
        .route("/v1/wallet/positions", get(wallet::list_positions))
        .route("/v1/wallet/credit", post(wallet::credit))
        .route("/v1/wallet/debit", post(wallet::debit))
        .route("/internal/wallet/reserve", post(internal::reserve_funds))
        .route("/internal/wallet/settle", post(internal::settle_order))
        .route("/internal/wallet/compensate", post(internal::compensate_order))
        .route("/internal/wallet/refund", post(internal::refund_order))
        .route("/internal/wallet/:user_id", get(internal::get_wallet_for_user))
        .route("/internal/events", post(internal::handle_event))
        .route("/internal/events/enqueue", post(internal::enqueue_event))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
