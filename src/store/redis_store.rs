//! Redis-backed counter store.
//!
//! Counters are plain Redis integers under the limiter's keys:
//! - `INCR` for the atomic increment
//! - `PEXPIRE` / `PTTL` for the window expiry
//! - a Lua script for the single-step "increment, expire if new" variant
//!
//! Redis applies expiry on its own clock, so window boundaries never depend on
//! the clocks of the hosts running the limiter.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::{CounterStore, KeyTtl, StoreError, StoreResult};

const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// A [`CounterStore`] over a shared Redis instance.
///
/// The underlying `ConnectionManager` multiplexes one reconnecting connection
/// and is cloned per call, so concurrent callers never wait on a local lock.
pub struct RedisStore {
    connection: ConnectionManager,
    incr_with_ttl: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            incr_with_ttl: Script::new(INCR_WITH_TTL),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Overwrite `key` with `value`, optionally expiring after `ttl`.
    pub async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn.pset_ex::<_, _, ()>(key, value, millis(ttl) as u64).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    /// Delete every key starting with `prefix`, returning how many were removed.
    pub async fn flush_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Redis takes integer milliseconds; round sub-millisecond windows up.
fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn();
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<Option<i64>> {
        let mut conn = self.conn();
        let count: i64 = self
            .incr_with_ttl
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(Some(count))
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let applied: bool = conn.pexpire(key, millis(ttl)).await?;
        if applied {
            Ok(())
        } else {
            Err(StoreError::KeyMissing(key.to_string()))
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.conn();
        let remaining_ms: i64 = conn.pttl(key).await?;
        let ttl = match remaining_ms {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
        };
        Ok(ttl)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
