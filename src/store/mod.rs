//! Shared counter stores.
//!
//! The limiter keeps no counter state of its own. Every count lives in a
//! [`CounterStore`], which must make `increment` atomic per key and expire
//! keys on its own clock.

mod memory;
#[cfg(test)]
pub(crate) mod mocks;
#[cfg(feature = "redis-store")]
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

/// Errors reported by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist (or has already expired).
    #[error("key not found: {0}")]
    KeyMissing(String),

    /// The value at the key cannot be treated as a counter.
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),

    /// Incrementing would overflow the counter.
    #[error("counter at {0} would overflow")]
    Overflow(String),

    /// The call did not complete within the allotted time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Expiry state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// No such key.
    Missing,
    /// The key exists but never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Time left before expiry, if the key has one.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(remaining) => Some(*remaining),
            _ => None,
        }
    }
}

/// Capabilities the rate limiter needs from a shared key-value store.
///
/// Implementations must be safe for concurrent use: one instance is shared
/// by every caller of a limiter. Dropping a returned future abandons the call.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one to `key`, creating it at 1 if absent, and return the
    /// new value.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Increment `key` and, only if this created it, expire it after `ttl`,
    /// as a single atomic step.
    ///
    /// Returns `Ok(None)` when the store has no such primitive.
    async fn increment_with_ttl(&self, _key: &str, _ttl: Duration) -> StoreResult<Option<i64>> {
        Ok(None)
    }

    /// Set or overwrite the expiry of an existing key.
    ///
    /// Fails with [`StoreError::KeyMissing`] if the key does not exist.
    async fn set_ttl(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Read the expiry state of `key`.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Read the raw value of `key`. Not used on the decision path.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
}

/// Open the store described by `config`.
pub async fn open(config: &StoreConfig) -> crate::error::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!(
                purge_interval = ?config.purge_interval(),
                "Using in-process memory counter store"
            );
            let store = Arc::new(MemoryStore::new());
            store.spawn_purge(config.purge_interval());
            Ok(store)
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            info!(url = %config.url, "Connecting to Redis counter store");
            let store = RedisStore::connect(&config.url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => Err(crate::error::TallygateError::Config(
            "redis backend requested but tallygate was built without the redis-store feature"
                .to_string(),
        )),
    }
}
