pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod eventbus;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Currency, Money, OrderEvent, OrderId, Position, Side, Symbol, Transaction, UserId, Wallet,
    WalletId,
};
pub use engine::{CompensationCoordinator, Ledger, Outcome, SettlementCoordinator};
pub use error::{AppError, LedgerError};
pub use eventbus::{EventPublisher, EventSource};
