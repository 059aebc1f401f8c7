//! Request-level orchestration around the ledger engine.

pub mod idempotency;
pub mod intake;

pub use idempotency::{
    IdempotencyError, IdempotencyGuard, IdempotencyStore, InMemoryIdempotencyStore,
    SqliteIdempotencyStore,
};
pub use intake::{EventIntake, IntakeError, IntakeReport, IntakeStats};
