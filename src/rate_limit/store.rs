//! Counter store abstraction shared by the distributed and local backends.

use super::types::{Decision, RateLimitKey, RateLimitPolicy};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures of a counter store round-trip.
///
/// These never reach callers of the limiter; any of them makes the limiter
/// answer the current call from the local fallback.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unexpected store reply: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Timeout(_) => "timeout",
            StoreError::Redis(_) => "redis",
            StoreError::Protocol(_) => "protocol",
        }
    }
}

/// Backing store that decides and records admissions for a key.
///
/// Implementations must run the whole read-check-record sequence for one key
/// as a single atomic unit, so concurrent callers on the same key can never
/// be admitted past `max_operations`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Decide for `key` at `now_millis` and record the event when admitted
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_millis: u64,
    ) -> Result<Decision, StoreError>;

    /// Drop all recorded state for `key`
    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError>;

    /// Purge records whose window has ended, returning how many were dropped.
    ///
    /// Stores with native key expiry have nothing to do here.
    async fn sweep(&self, _now_millis: u64) -> usize {
        0
    }

    /// Name used in logs, metrics and health output
    fn name(&self) -> &'static str;
}
