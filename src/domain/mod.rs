//! Domain types for the wallet ledger.
//!
//! This module provides:
//! - Fixed-point `Money` with a single rounding policy
//! - Identifiers and validated primitives: UserId, WalletId, OrderId, Symbol, Currency, Side
//! - The Wallet balance state machine and Position cost-basis arithmetic
//! - Transaction log entries and order-lifecycle events

pub mod events;
pub mod money;
pub mod outcome;
pub mod position;
pub mod primitives;
pub mod transaction;
pub mod wallet;

pub use events::{OrderEvent, OrderExecuted, OrderFailed, OrderMatched, WalletSettled};
pub use money::{Money, COST_SCALE};
pub use outcome::{OrderOutcomeRecord, OrderStage};
pub use position::Position;
pub use primitives::{Currency, OrderId, Side, Symbol, UserId, WalletId};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionType};
pub use wallet::Wallet;
