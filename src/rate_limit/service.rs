use super::clock::{Clock, SystemClock};
use super::local::{LocalCounterStore, LocalStoreSettings};
use super::memory::MemoryLogStore;
use super::presets::{PolicyPreset, PresetTable};
use super::redis::DistributedCounterStore;
use super::store::{CounterStore, StoreError};
use super::types::{Decision, RateLimitKey, RateLimitPolicy};
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bound on a shared store round-trip
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Rate limiter answering admit/deny for a key under a policy.
///
/// The primary store (Redis, or the in-process sliding window log) is tried
/// first on every call. When it errors or exceeds the store timeout, that call
/// alone is answered by the process-local fixed window store, and the next
/// call goes back to the primary.
pub struct RateLimiter {
    /// Shared sliding window store, absent in local-only mode
    primary: Option<Arc<dyn CounterStore>>,
    /// Process-local fixed window fallback
    fallback: LocalCounterStore,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    presets: PresetTable,
    maintenance: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// Create a limiter that only uses the local fixed window store
    pub fn local_only(settings: LocalStoreSettings) -> Self {
        info!("Initializing local-only rate limiter");
        Self {
            primary: None,
            fallback: LocalCounterStore::new(settings),
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            presets: PresetTable::default(),
            maintenance: None,
        }
    }

    /// Create a limiter with a primary store and local fallback
    pub fn with_store(primary: Arc<dyn CounterStore>, settings: LocalStoreSettings) -> Self {
        info!("Initializing rate limiter with {} store", primary.name());
        Self {
            primary: Some(primary),
            fallback: LocalCounterStore::new(settings),
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            presets: PresetTable::default(),
            maintenance: None,
        }
    }

    /// Create a limiter backed by Redis with local fallback.
    ///
    /// An unreachable Redis at startup is not fatal: calls fall back to the
    /// local store until the connection succeeds.
    pub async fn with_redis(
        redis_url: &str,
        key_prefix: &str,
        settings: LocalStoreSettings,
    ) -> std::result::Result<Self, StoreError> {
        let store = DistributedCounterStore::new(redis_url, key_prefix)?;

        match tokio::time::timeout(Duration::from_secs(2), store.ping()).await {
            Ok(Ok(())) => info!("Redis connection successful, using Redis as primary store"),
            Ok(Err(e)) => warn!("Redis ping failed: {}, serving from local fallback until it recovers", e),
            Err(_) => warn!("Redis ping timed out, serving from local fallback until it recovers"),
        }

        Ok(Self::with_store(Arc::new(store), settings))
    }

    /// Build a limiter from configuration.
    ///
    /// Must be called inside a Tokio runtime when a sweep interval is set.
    pub async fn from_config(config: &RateLimitingConfig) -> Self {
        let settings = config.local_settings();

        let limiter = match config.store_url.as_deref() {
            None => Self::local_only(settings),
            Some(url) if url.starts_with("memory://") => {
                Self::with_store(Arc::new(MemoryLogStore::new()), settings)
            }
            Some(url) => match Self::with_redis(url, &config.key_prefix, settings.clone()).await {
                Ok(limiter) => limiter,
                Err(e) => {
                    warn!("Invalid store URL {}: {}, using local-only mode", url, e);
                    Self::local_only(settings)
                }
            },
        };

        let limiter = limiter
            .with_store_timeout(config.store_timeout())
            .with_presets(config.presets.clone());

        match config.sweep_interval() {
            Some(interval) => limiter.with_maintenance(interval),
            None => limiter,
        }
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each primary store round-trip
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Use configured preset values
    pub fn with_presets(mut self, presets: PresetTable) -> Self {
        self.presets = presets;
        self
    }

    /// Sweep expired records every `interval` on a background task.
    ///
    /// The task is aborted when the limiter is dropped.
    pub fn with_maintenance(mut self, interval: Duration) -> Self {
        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = clock.now_millis();
                let mut removed = fallback.sweep(now).await;
                if let Some(primary) = &primary {
                    removed += primary.sweep(now).await;
                }
                debug!("Maintenance sweep removed {} records", removed);
            }
        });

        if let Some(previous) = self.maintenance.replace(handle) {
            previous.abort();
        }
        self
    }

    /// Decide whether the operation identified by `key` may proceed now.
    ///
    /// Only an invalid key or policy is an error; store failures are absorbed
    /// by the local fallback. Denied calls are not recorded.
    pub async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
    ) -> Result<Decision> {
        key.validate()?;
        policy.validate()?;

        let now = self.clock.now_millis();

        if let Some(primary) = &self.primary {
            match self.check_primary(primary.as_ref(), key, policy, now).await {
                Ok(decision) => return Ok(self.finish(primary.name(), key, decision)),
                Err(e) => {
                    warn!(
                        "{} store unavailable for key {}: {}, using local fallback",
                        primary.name(),
                        key,
                        e
                    );
                    metrics::record_failover(e.reason());
                }
            }
        }

        let decision = self.fallback.check(key, policy, now).await;
        Ok(self.finish(self.fallback.name(), key, decision))
    }

    /// Check a subject under a policy's namespace
    pub async fn check(&self, subject: &str, policy: &RateLimitPolicy) -> Result<Decision> {
        self.check_and_consume(&policy.key_for(subject), policy).await
    }

    /// Check a subject under a named preset
    pub async fn check_preset(&self, preset: PolicyPreset, subject: &str) -> Result<Decision> {
        self.check(subject, &self.presets.policy(preset)).await
    }

    /// Forget all state for `key` in both stores
    pub async fn reset(&self, key: &RateLimitKey) {
        if let Some(primary) = &self.primary {
            if let Err(e) = self.with_timeout(primary.reset(key)).await {
                warn!("Failed to reset key {} in {} store: {}", key, primary.name(), e);
            }
        }
        self.fallback.reset(key).await;
    }

    /// Effective policy for a preset
    pub fn preset_policy(&self, preset: PolicyPreset) -> RateLimitPolicy {
        self.presets.policy(preset)
    }

    /// Name of the store answering calls when healthy
    pub fn mode(&self) -> &'static str {
        self.primary
            .as_ref()
            .map(|primary| primary.name())
            .unwrap_or_else(|| self.fallback.name())
    }

    /// The local fallback store
    pub fn fallback(&self) -> &LocalCounterStore {
        &self.fallback
    }

    async fn check_primary(
        &self,
        primary: &dyn CounterStore,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now: u64,
    ) -> std::result::Result<Decision, StoreError> {
        let started = Instant::now();
        let result = self
            .with_timeout(primary.check_and_consume(key, policy, now))
            .await;
        metrics::record_store_duration(primary.name(), started.elapsed().as_secs_f64());
        result
    }

    async fn with_timeout<T, F>(&self, call: F) -> std::result::Result<T, StoreError>
    where
        F: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    fn finish(&self, store: &'static str, key: &RateLimitKey, decision: Decision) -> Decision {
        match decision {
            Decision::Admitted { remaining } => {
                debug!("Rate limit check passed for key {} ({} store), remaining: {}", key, store, remaining);
            }
            Decision::Denied { retry_after_millis } => {
                warn!(
                    "Rate limit exceeded for key {} ({} store), retry after {}ms",
                    key, store, retry_after_millis
                );
            }
        }
        metrics::record_decision(store, decision.outcome());
        decision
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}
