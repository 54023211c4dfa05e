//! Rate limiting module
//!
//! Answers "may this operation proceed right now?" for a key under a
//! [`RateLimitPolicy`], and records admitted operations:
//!
//! - **Sliding window log**: exact counting against a shared store (Redis
//!   sorted sets updated by one Lua script, or an in-process log)
//! - **Fixed window**: process-local fallback used for any call the shared
//!   store cannot answer in time
//!
//! # Example
//!
//! ```rust,no_run
//! use sparkle_ratelimit::rate_limit::{LocalStoreSettings, PolicyPreset, RateLimiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Local-only rate limiter
//!     let limiter = RateLimiter::local_only(LocalStoreSettings::default());
//!
//!     // Or Redis-backed with local fallback
//!     // let limiter = RateLimiter::with_redis(
//!     //     "redis://localhost:6379",
//!     //     "sparkle:ratelimit:",
//!     //     LocalStoreSettings::default(),
//!     // ).await.unwrap();
//!
//!     let decision = limiter
//!         .check_preset(PolicyPreset::Auth, "user123")
//!         .await
//!         .unwrap();
//!     assert!(decision.is_admitted());
//! }
//! ```

pub mod clock;
pub mod local;
pub mod lua_scripts;
pub mod memory;
pub mod middleware;
pub mod presets;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::{LocalCounterStore, LocalStoreSettings};
pub use memory::MemoryLogStore;
pub use middleware::{rate_limit_middleware, AuthenticatedSubject, RateLimitMiddleware};
pub use presets::{PolicyPreset, PresetLimits, PresetTable};
pub use self::redis::DistributedCounterStore;
pub use service::RateLimiter;
pub use store::{CounterStore, StoreError};
pub use types::{Decision, RateLimitKey, RateLimitPolicy, MAX_WINDOW_MILLIS};
