//! Tallygate - Shared-Store Rate Limiting
//!
//! This crate implements a fixed-window request rate limiter. Counts live in a
//! shared counter store (Redis, or an in-process map for a single instance),
//! so any number of service instances can enforce one quota per identity
//! without coordinating with each other.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tallygate::ratelimit::{CallContext, RateLimiter};
//! use tallygate::store::RedisStore;
//!
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1/").await?);
//! let limiter = RateLimiter::new(store, 3, Duration::from_secs(60))?;
//!
//! let decision = limiter.check(&CallContext::background(), "192.168.1.54").await?;
//! if decision.exceeded {
//!     // reject
//! }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
