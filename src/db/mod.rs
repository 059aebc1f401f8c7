//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for reads and lazy wallet creation
//! - The per-wallet unit of work used for every balance mutation

pub mod migrations;
pub mod repo;
pub mod unit;

pub use migrations::init_db;
pub use repo::Repository;
pub use unit::WalletUnit;
