use super::store::{CounterStore, StoreError};
use super::types::{Decision, RateLimitKey, RateLimitPolicy};
use super::window;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct EventLog {
    events: VecDeque<u64>,
    /// Mirrors the Redis key expiry: refreshed to `now + window` on access
    expires_at_millis: u64,
}

/// In-process sliding window store.
///
/// Same contract as the Redis store, for single-node deployments where no
/// distributed store is configured to be shared. Each key's log is mutated
/// under its map shard's write lock, which makes check-and-record atomic.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    logs: Arc<DashMap<String, EventLog>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a live log
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryLogStore {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_millis: u64,
    ) -> Result<Decision, StoreError> {
        let mut log = self.logs.entry(key.as_str().to_string()).or_default();
        let decision = window::sliding_window(&mut log.events, policy, now_millis);
        log.expires_at_millis = now_millis.saturating_add(policy.window_millis);

        debug!("Memory log check for key {}: {:?}", key, decision);
        Ok(decision)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        self.logs.remove(key.as_str());
        Ok(())
    }

    async fn sweep(&self, now_millis: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| log.expires_at_millis > now_millis);
        before.saturating_sub(self.logs.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
