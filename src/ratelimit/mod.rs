//! Rate limiting logic.

mod context;
mod identity;
mod limiter;
mod policy;

pub use context::CallContext;
pub use identity::{Identity, IdentityError, IntoIdentity, MAX_OPAQUE_LEN};
pub use limiter::{Decision, LimiterError, LimiterOptions, RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use policy::{Policy, TimeUnit};
