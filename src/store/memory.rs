//! In-process counter store.
//!
//! Useful for a single instance and for tests. Expiry is lazy: an expired
//! entry is treated as absent on access and dropped by the next write to the
//! same key or by [`MemoryStore::purge_expired`], which
//! [`MemoryStore::spawn_purge`] runs periodically. Time is read from
//! `tokio::time::Instant`, so a paused test clock controls expiry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{CounterStore, KeyTtl, StoreError, StoreResult};

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A `DashMap`-backed [`CounterStore`].
///
/// Each key's read-modify-write runs under its shard lock, which makes
/// `increment` atomic per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `key` with `value`, optionally expiring after `ttl`.
    pub fn set(&self, key: &str, value: i64, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.slots
            .insert(key.to_string(), Slot { value, expires_at });
    }

    /// Remove `key`, returning whether a live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.slots
            .remove(key)
            .is_some_and(|(_, slot)| slot.is_live(now))
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.slots.len())
    }

    /// Purge expired entries every `every` on a background task.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_purge(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.slots.len(), "Purged expired counters");
                }
            }
        })
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared read-modify-write path for both increment flavours.
    fn bump(&self, key: &str, ttl_if_new: Option<Duration>) -> StoreResult<i64> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot {
            value: 0,
            expires_at: None,
        });

        if !slot.is_live(now) {
            *slot = Slot {
                value: 0,
                expires_at: None,
            };
        }

        slot.value = slot
            .value
            .checked_add(1)
            .ok_or_else(|| StoreError::Overflow(key.to_string()))?;

        if slot.value == 1 {
            if let Some(ttl) = ttl_if_new {
                slot.expires_at = Some(now + ttl);
            }
        }

        Ok(slot.value)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.bump(key, None)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<Option<i64>> {
        self.bump(key, Some(ttl)).map(Some)
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                slot.expires_at = Some(now + ttl);
                Ok(())
            }
            _ => Err(StoreError::KeyMissing(key.to_string())),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let now = Instant::now();
        let ttl = match self.slots.get(key) {
            Some(slot) if slot.is_live(now) => match slot.expires_at {
                Some(at) => KeyTtl::Expires(at - now),
                None => KeyTtl::Persistent,
            },
            _ => KeyTtl::Missing,
        };
        Ok(ttl)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.to_string()))
    }
}
