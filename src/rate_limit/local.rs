use super::store::{CounterStore, StoreError};
use super::types::{Decision, RateLimitKey, RateLimitPolicy};
use super::window::{self, FixedWindowEntry};
use async_trait::async_trait;
use moka::future::Cache;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

type Slot = Arc<Mutex<Option<FixedWindowEntry>>>;

/// Settings for the local fallback store
#[derive(Debug, Clone)]
pub struct LocalStoreSettings {
    /// Upper bound on tracked keys
    pub max_entries: u64,
    /// Chance that a call schedules a background sweep
    pub sweep_probability: f64,
}

impl Default for LocalStoreSettings {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            sweep_probability: 0.01,
        }
    }
}

/// Process-local fixed window store used when the shared store is unreachable.
///
/// Counts are per process and never synchronised with other instances. The
/// fixed window admits up to `2 * max_operations` operations across a window
/// boundary, so this is an approximation of the sliding window, not an
/// equivalent.
///
/// Entries are only dropped by sweeps once their window has ended, or by the
/// cache when `max_entries` is exceeded.
#[derive(Clone)]
pub struct LocalCounterStore {
    entries: Cache<String, Slot>,
    sweep_probability: f64,
}

impl LocalCounterStore {
    /// Create a new local store
    pub fn new(settings: LocalStoreSettings) -> Self {
        let entries = Cache::builder()
            .max_capacity(settings.max_entries)
            .build();

        Self {
            entries,
            sweep_probability: settings.sweep_probability.clamp(0.0, 1.0),
        }
    }

    /// Run the fixed window check for `key`
    pub async fn check(&self, key: &RateLimitKey, policy: &RateLimitPolicy, now: u64) -> Decision {
        let slot = self
            .entries
            .get_with(key.as_str().to_string(), async { Slot::default() })
            .await;

        let decision = {
            let mut entry = slot.lock();
            window::fixed_window(&mut entry, policy, now)
        };

        debug!("Fixed window check for key {}: {:?}", key, decision);

        if self.should_sweep() {
            self.spawn_sweep(now);
        }

        decision
    }

    /// Remove entries whose window has ended, returning how many were dropped
    pub async fn sweep(&self, now: u64) -> usize {
        let expired: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.lock().map_or(true, |entry| entry.is_expired(now)))
            .map(|(key, _)| key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key.as_str()).await;
        }
        self.entries.run_pending_tasks().await;

        crate::metrics::record_sweep(self.entries.entry_count());
        debug!(
            "Swept {} expired local entries, {} remaining",
            expired.len(),
            self.entries.entry_count()
        );

        expired.len()
    }

    /// Forget the window for `key`
    pub async fn reset(&self, key: &RateLimitKey) {
        self.entries.invalidate(key.as_str()).await;
    }

    /// Number of tracked keys (may lag behind pending cache maintenance)
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    fn should_sweep(&self) -> bool {
        self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability
    }

    fn spawn_sweep(&self, now: u64) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.clone();
                handle.spawn(async move {
                    store.sweep(now).await;
                });
            }
            Err(_) => warn!("No async runtime available, skipping local store sweep"),
        }
    }
}

impl Default for LocalCounterStore {
    fn default() -> Self {
        Self::new(LocalStoreSettings::default())
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_millis: u64,
    ) -> Result<Decision, StoreError> {
        Ok(self.check(key, policy, now_millis).await)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        LocalCounterStore::reset(self, key).await;
        Ok(())
    }

    async fn sweep(&self, now_millis: u64) -> usize {
        LocalCounterStore::sweep(self, now_millis).await
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn no_sweep() -> LocalStoreSettings {
        LocalStoreSettings {
            sweep_probability: 0.0,
            ..LocalStoreSettings::default()
        }
    }

    #[tokio::test]
    async fn test_local_store_allows_within_limit() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(1_000, 10, "ip");
        let key = policy.key_for("192.168.1.1");

        for i in 0..10 {
            let decision = store.check(&key, &policy, 0).await;
            assert!(decision.is_admitted(), "Request {} should be admitted", i);
        }
    }

    #[tokio::test]
    async fn test_local_store_denies_over_limit() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(60_000, 5, "ip");
        let key = policy.key_for("192.168.1.2");

        for _ in 0..5 {
            assert!(store.check(&key, &policy, 1_000).await.is_admitted());
        }

        let decision = store.check(&key, &policy, 1_500).await;
        assert_eq!(
            decision,
            Decision::Denied {
                retry_after_millis: 59_500
            }
        );
    }

    #[tokio::test]
    async fn test_local_store_different_keys() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(60_000, 2, "ip");
        let key1 = policy.key_for("192.168.1.1");
        let key2 = policy.key_for("192.168.1.2");

        for _ in 0..2 {
            assert!(store.check(&key1, &policy, 0).await.is_admitted());
        }
        assert!(!store.check(&key1, &policy, 0).await.is_admitted());
        assert!(store.check(&key2, &policy, 0).await.is_admitted());

        store.entries.run_pending_tasks().await;
        assert_eq!(store.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_local_store_window_reset() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(1_000, 2, "user");
        let key = policy.key_for("user123");

        for _ in 0..2 {
            assert!(store.check(&key, &policy, 0).await.is_admitted());
        }
        assert!(!store.check(&key, &policy, 999).await.is_admitted());
        assert!(store.check(&key, &policy, 1_000).await.is_admitted());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_entries() {
        let store = LocalCounterStore::new(no_sweep());
        let short = RateLimitPolicy::new(1_000, 5, "short");
        let long = RateLimitPolicy::new(60_000, 5, "long");

        store.check(&short.key_for("a"), &short, 0).await;
        store.check(&long.key_for("b"), &long, 0).await;
        store.entries.run_pending_tasks().await;

        assert_eq!(store.sweep(500).await, 0);
        assert_eq!(store.sweep(1_000).await, 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_forgets_key() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(60_000, 1, "auth");
        let key = policy.key_for("user123");

        assert!(store.check(&key, &policy, 0).await.is_admitted());
        assert!(!store.check(&key, &policy, 1).await.is_admitted());

        store.reset(&key).await;
        assert!(store.check(&key, &policy, 2).await.is_admitted());
    }

    #[tokio::test]
    async fn test_idle_entry_keeps_count_until_window_ends() {
        let store = LocalCounterStore::new(no_sweep());
        let policy = RateLimitPolicy::new(60_000, 1, "auth");
        let key = policy.key_for("user123");

        assert!(store.check(&key, &policy, 0).await.is_admitted());

        tokio::time::sleep(Duration::from_millis(150)).await;
        store.entries.run_pending_tasks().await;
        assert_eq!(store.sweep(150).await, 0);

        assert_eq!(
            store.check(&key, &policy, 150).await,
            Decision::Denied {
                retry_after_millis: 59_850
            }
        );
        assert!(store.check(&key, &policy, 60_000).await.is_admitted());
    }

    #[tokio::test]
    async fn test_probabilistic_sweep_runs_in_background() {
        let store = LocalCounterStore::new(LocalStoreSettings {
            sweep_probability: 1.0,
            ..LocalStoreSettings::default()
        });
        let policy = RateLimitPolicy::new(1_000, 5, "ip");

        store.check(&policy.key_for("10.0.0.1"), &policy, 0).await;
        // This call schedules a sweep at t=5000 that drops the first entry
        store.check(&policy.key_for("10.0.0.2"), &policy, 5_000).await;

        let mut remaining = u64::MAX;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.entries.run_pending_tasks().await;
            remaining = store.entry_count();
            if remaining == 1 {
                break;
            }
        }
        assert_eq!(remaining, 1);
    }
}
