//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use super::context::CallContext;
use super::identity::{Identity, IdentityError, IntoIdentity};
use super::policy::Policy;
use crate::store::{CounterStore, KeyTtl, StoreError, StoreResult};

/// Default bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Requests recorded for the identity in the current window, this one included.
    pub current_count: u64,
    /// Whether `current_count` is above the threshold.
    pub exceeded: bool,
}

impl Decision {
    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    /// Requests still allowed in this window under `threshold`.
    pub fn remaining(&self, threshold: u64) -> u64 {
        threshold.saturating_sub(self.current_count)
    }
}

/// Errors returned by [`RateLimiter`].
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The identity could not be normalized. No store call was made.
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// A store call failed or timed out. No decision is available.
    #[error("counter store unavailable during {op}: {source}")]
    StoreUnavailable {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// The request was counted but the window expiry could not be installed.
    ///
    /// The decision is valid; only the next window reset is at risk.
    #[error("window expiry not installed at count {}: {source}", .decision.current_count)]
    TtlInstallFailed {
        decision: Decision,
        #[source]
        source: StoreError,
    },

    /// The caller's context fired before the store answered.
    #[error("rate limit call cancelled")]
    Cancelled,

    /// Threshold or window rejected at construction.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

impl LimiterError {
    /// The decision reached despite the error, if any.
    pub fn decision(&self) -> Option<Decision> {
        match self {
            LimiterError::TtlInstallFailed { decision, .. } => Some(*decision),
            _ => None,
        }
    }
}

/// Tunables that do not change what a window admits.
#[derive(Debug, Clone)]
pub struct LimiterOptions {
    /// Prepended to every identity to form the store key.
    pub key_prefix: String,
    /// Bound on each store round trip; hitting it is a store error.
    pub store_timeout: Duration,
    /// Use the store's single-step increment-with-expiry when it has one.
    pub prefer_atomic_ttl: bool,
    /// On an exceeded decision, give a key that has lost its expiry a fresh one.
    pub repair_missing_ttl: bool,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            prefer_atomic_ttl: true,
            repair_missing_ttl: true,
        }
    }
}

/// Fixed-window rate limiter over a shared [`CounterStore`].
///
/// The limiter holds no counter state and takes no local locks: every count
/// is produced by the store's atomic increment, so any number of limiter
/// instances sharing one store agree on each identity's count.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: Policy,
    options: LimiterOptions,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter allowing `threshold` requests per `window`.
    ///
    /// Does not touch the store.
    pub fn new(
        store: Arc<dyn CounterStore>,
        threshold: u64,
        window: Duration,
    ) -> Result<Self, LimiterError> {
        let policy = Policy::new(threshold, window)?;
        Ok(Self::with_options(store, policy, LimiterOptions::default()))
    }

    /// Create a limiter from a validated policy and explicit options.
    pub fn with_options(
        store: Arc<dyn CounterStore>,
        policy: Policy,
        options: LimiterOptions,
    ) -> Self {
        Self {
            store,
            policy,
            options,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn options(&self) -> &LimiterOptions {
        &self.options
    }

    /// The store key used for `identity`.
    pub fn key_for(&self, identity: &Identity) -> String {
        format!("{}{}", self.options.key_prefix, identity)
    }

    /// Record one request from `identity` and report whether it is now over
    /// the limit.
    ///
    /// On [`LimiterError::TtlInstallFailed`] the request was still counted and
    /// the error carries the decision.
    pub async fn check<I: IntoIdentity>(
        &self,
        ctx: &CallContext,
        identity: I,
    ) -> Result<Decision, LimiterError> {
        let identity = identity.into_identity()?;
        let key = self.key_for(&identity);

        trace!(key = %key, "Checking rate limit");

        let (count, opened_window) = self.increment(ctx, &key).await?;
        let decision = self.policy.decide(count);

        // The request is counted from here on: expiry bookkeeping is bounded by
        // the store timeout only, never by the caller's context.
        if opened_window {
            self.install_ttl(&key, decision).await?;
        } else if decision.exceeded {
            debug!(
                key = %key,
                count = decision.current_count,
                threshold = self.policy.threshold(),
                "Rate limit exceeded"
            );
            if self.options.repair_missing_ttl {
                self.repair_ttl(&key, decision).await?;
            }
        }

        Ok(decision)
    }

    /// Time until `identity`'s window resets, or `None` if it has no active
    /// counter.
    pub async fn time_until_reset<I: IntoIdentity>(
        &self,
        ctx: &CallContext,
        identity: I,
    ) -> Result<Option<Duration>, LimiterError> {
        let identity = identity.into_identity()?;
        let key = self.key_for(&identity);

        match self.call(ctx, "ttl", self.store.ttl(&key)).await? {
            KeyTtl::Expires(remaining) => Ok(Some(remaining)),
            KeyTtl::Missing => Ok(None),
            KeyTtl::Persistent => {
                warn!(key = %key, "Counter has no expiry");
                Ok(None)
            }
        }
    }

    /// Current count for `identity` without recording a request.
    pub async fn current_count<I: IntoIdentity>(
        &self,
        ctx: &CallContext,
        identity: I,
    ) -> Result<u64, LimiterError> {
        let identity = identity.into_identity()?;
        let key = self.key_for(&identity);

        let Some(raw) = self.call(ctx, "get", self.store.get(&key)).await? else {
            return Ok(0);
        };

        raw.parse::<i64>()
            .map(clamp_count)
            .map_err(|_| LimiterError::StoreUnavailable {
                op: "get",
                source: StoreError::NotAnInteger(key),
            })
    }

    /// Increment the key, returning the new count and whether the caller
    /// still has to install the window expiry.
    async fn increment(&self, ctx: &CallContext, key: &str) -> Result<(u64, bool), LimiterError> {
        if self.options.prefer_atomic_ttl {
            let window = self.policy.window();
            let atomic = self
                .call(ctx, "increment", self.store.increment_with_ttl(key, window))
                .await?;
            if let Some(count) = atomic {
                if count == 1 {
                    debug!(key = %key, window = ?window, "Opened new window");
                }
                return Ok((clamp_count(count), false));
            }
        }

        let count = clamp_count(self.call(ctx, "increment", self.store.increment(key)).await?);
        Ok((count, count == 1))
    }

    /// Second step of the two-step protocol: expire a key whose first
    /// increment just happened.
    async fn install_ttl(&self, key: &str, decision: Decision) -> Result<(), LimiterError> {
        let window = self.policy.window();
        debug!(key = %key, window = ?window, "Opened new window");

        self.bounded(self.store.set_ttl(key, window))
            .await
            .map_err(|source| {
                error!(
                    key = %key,
                    error = %source,
                    "Failed to install window expiry after first increment"
                );
                LimiterError::TtlInstallFailed { decision, source }
            })
    }

    /// Give an over-limit key that never received an expiry its window, so a
    /// lost expiry cannot block an identity forever. Existing expiries are
    /// left alone.
    async fn repair_ttl(&self, key: &str, decision: Decision) -> Result<(), LimiterError> {
        let ttl = self
            .bounded(self.store.ttl(key))
            .await
            .map_err(|source| LimiterError::TtlInstallFailed { decision, source })?;

        if ttl == KeyTtl::Persistent {
            warn!(
                key = %key,
                count = decision.current_count,
                "Counter has no expiry, reinstalling window"
            );
            self.install_ttl(key, decision).await?;
        }

        Ok(())
    }

    /// Run one store call under the caller's context and the per-call timeout.
    async fn call<T, F>(&self, ctx: &CallContext, op: &'static str, fut: F) -> Result<T, LimiterError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = ctx.done() => {
                debug!(op, "Store call cancelled by caller");
                Err(LimiterError::Cancelled)
            }
            result = self.bounded(fut) => {
                result.map_err(|source| LimiterError::StoreUnavailable { op, source })
            }
        }
    }

    /// Run one store call under the per-call timeout only.
    async fn bounded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let timeout = self.options.store_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)))
    }
}

/// Counters are never negative unless something outside the limiter wrote
/// to the key; treat such values as an empty window.
fn clamp_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
