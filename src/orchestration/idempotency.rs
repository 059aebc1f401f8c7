//! Idempotency guard for client-facing credit/debit.
//!
//! A successful result is cached per `(user, key)` for a fixed TTL and replayed for any
//! later call with the same key, whatever its arguments. Failures are never cached.
//! The cache lives outside the ledger's consistency domain: if it is unavailable the
//! guard degrades to "not cached" and the operation runs.

use crate::db::Repository;
use crate::domain::{Transaction, UserId};
use crate::error::LedgerError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const LOCK_STRIPES: usize = 64;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Cached response could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for cached operation results.
#[async_trait]
pub trait IdempotencyStore: Send + Sync + fmt::Debug {
    /// Cached result for `(key, user)` if present and not expired.
    async fn lookup(
        &self,
        key: &str,
        user_id: UserId,
    ) -> Result<Option<Transaction>, IdempotencyError>;

    /// Cache `result` for `(key, user)` for `ttl`.
    async fn store(
        &self,
        key: &str,
        user_id: UserId,
        result: &Transaction,
        ttl: Duration,
    ) -> Result<(), IdempotencyError>;
}

/// Digest used as the stored key, so arbitrary client keys have a bounded size.
pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// SQLite-backed store sharing the wallet database.
#[derive(Debug, Clone)]
pub struct SqliteIdempotencyStore {
    repo: Arc<Repository>,
}

impl SqliteIdempotencyStore {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn lookup(
        &self,
        key: &str,
        user_id: UserId,
    ) -> Result<Option<Transaction>, IdempotencyError> {
        let now = chrono::Utc::now().timestamp_millis();
        let cached = self
            .repo
            .find_idempotency_record(user_id, &key_digest(key), now)
            .await?;
        match cached {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        key: &str,
        user_id: UserId,
        result: &Transaction,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        let now = chrono::Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let body = serde_json::to_string(result)?;

        let purged = self.repo.purge_expired_idempotency(now).await?;
        if purged > 0 {
            debug!(purged, "Purged expired idempotency records");
        }
        self.repo
            .upsert_idempotency_record(user_id, &key_digest(key), &body, now.saturating_add(ttl_ms))
            .await?;
        Ok(())
    }
}

/// Process-local store. Entries vanish on restart.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<(UserId, String), (Instant, Transaction)>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(
        &self,
        key: &str,
        user_id: UserId,
    ) -> Result<Option<Transaction>, IdempotencyError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(user_id, key.to_string()))
            .filter(|(expires_at, _)| *expires_at > Instant::now())
            .map(|(_, tx)| tx.clone()))
    }

    async fn store(
        &self,
        key: &str,
        user_id: UserId,
        result: &Transaction,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        entries.insert((user_id, key.to_string()), (now + ttl, result.clone()));
        Ok(())
    }
}

/// Runs an operation at most once per `(key, user)` within the TTL.
///
/// Concurrent calls with the same key are serialized on a lock stripe, so the second
/// caller waits for the first and then sees its cached result.
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    stripes: Vec<tokio::sync::Mutex<()>>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            stripes: (0..LOCK_STRIPES).map(|_| tokio::sync::Mutex::new(())).collect(),
        }
    }

    pub async fn dedupe<F, Fut>(
        &self,
        key: &str,
        user_id: UserId,
        operation: F,
    ) -> Result<Transaction, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Transaction, LedgerError>>,
    {
        let key = key.trim();
        if key.is_empty() {
            return Err(LedgerError::Validation(
                "Idempotency key is required".to_string(),
            ));
        }

        let _guard = self.stripes[self.stripe(key, user_id)].lock().await;

        match self.store.lookup(key, user_id).await {
            Ok(Some(cached)) => {
                warn!(user_id = %user_id, transaction_id = cached.id, "Idempotent replay, returning cached result");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Idempotency lookup failed, proceeding uncached");
            }
        }

        let result = operation().await?;

        if let Err(e) = self.store.store(key, user_id, &result, self.ttl).await {
            warn!(user_id = %user_id, error = %e, "Failed to cache idempotent result");
        }
        Ok(result)
    }

    fn stripe(&self, key: &str, user_id: UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }
}

impl fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish()
    }
}
