use super::lua_scripts::SLIDING_WINDOW_SCRIPT;
use super::store::{CounterStore, StoreError};
use super::types::{Decision, RateLimitKey, RateLimitPolicy};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

/// Default prefix for rate limit keys in Redis
pub const DEFAULT_KEY_PREFIX: &str = "sparkle:ratelimit:";

/// Redis-backed sliding window store shared by every process instance.
///
/// The connection is established on first use and retried on later calls
/// until it succeeds, so a Redis instance that is down at startup is picked
/// up once it comes back.
#[derive(Clone)]
pub struct DistributedCounterStore {
    client: redis::Client,
    /// Redis connection manager (reconnects on its own once established)
    connection: Arc<OnceCell<ConnectionManager>>,
    /// Prefix prepended to every key
    prefix: String,
    /// Loaded sliding window script
    script: Script,
}

impl DistributedCounterStore {
    /// Create a store for `redis_url`. Only the URL is validated here.
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
            prefix: prefix.into(),
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    /// Create a store and establish the connection immediately
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let store = Self::new(redis_url, prefix)?;
        store.connection().await?;
        Ok(store)
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                debug!("Connecting to Redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(connection.clone())
    }

    fn redis_key(&self, key: &RateLimitKey) -> String {
        format!("{}{}", self.prefix, key.as_str())
    }
}

#[async_trait]
impl CounterStore for DistributedCounterStore {
    async fn check_and_consume(
        &self,
        key: &RateLimitKey,
        policy: &RateLimitPolicy,
        now_millis: u64,
    ) -> Result<Decision, StoreError> {
        let redis_key = self.redis_key(key);
        let mut connection = self.connection().await?;
        let member = format!("{}-{}", now_millis, Uuid::new_v4());

        let result: Vec<i64> = self
            .script
            .key(&redis_key)
            .arg(policy.max_operations)
            .arg(policy.window_millis)
            .arg(now_millis)
            .arg(member)
            .invoke_async(&mut connection)
            .await?;

        let decision = decode_reply(&result)?;
        debug!(
            "Sliding window check for key {}: {:?}",
            redis_key, decision
        );
        Ok(decision)
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        connection.del::<_, ()>(self.redis_key(key)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

/// Decode the `[allowed, remaining, retry_after]` script reply
fn decode_reply(result: &[i64]) -> Result<Decision, StoreError> {
    match result {
        [1, remaining, _] => Ok(Decision::Admitted {
            remaining: (*remaining).max(0) as u32,
        }),
        [0, _, retry_after] => Ok(Decision::Denied {
            retry_after_millis: (*retry_after).max(0) as u64,
        }),
        other => Err(StoreError::Protocol(format!(
            "sliding window script returned {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(DistributedCounterStore::new("not a url", DEFAULT_KEY_PREFIX).is_err());
        assert!(DistributedCounterStore::new("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX).is_ok());
    }

    #[test]
    fn test_redis_key_prefix() {
        let store = DistributedCounterStore::new("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX).unwrap();
        let key = RateLimitKey::new("auth", "user123");
        assert_eq!(store.redis_key(&key), "sparkle:ratelimit:auth:user123");
    }

    #[test]
    fn test_decode_reply() {
        assert_eq!(
            decode_reply(&[1, 4, 0]).unwrap(),
            Decision::Admitted { remaining: 4 }
        );
        assert_eq!(
            decode_reply(&[0, 0, 59_000]).unwrap(),
            Decision::Denied {
                retry_after_millis: 59_000
            }
        );
        assert!(matches!(
            decode_reply(&[2, 0]),
            Err(StoreError::Protocol(_))
        ));
    }

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_sliding_window() {
        let store = DistributedCounterStore::connect("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX)
            .await
            .expect("Failed to connect to Redis");

        let policy = RateLimitPolicy::new(60_000, 10, "test");
        let key = policy.key_for(&format!("sw-{}", rand::random::<u32>()));
        let now = now_millis();

        for i in 0..10 {
            let decision = store.check_and_consume(&key, &policy, now + i).await.unwrap();
            assert!(decision.is_admitted(), "Request {} should be admitted", i);
        }

        let decision = store.check_and_consume(&key, &policy, now + 10).await.unwrap();
        assert_eq!(
            decision,
            Decision::Denied {
                retry_after_millis: 59_990
            }
        );

        store.reset(&key).await.unwrap();
        let decision = store.check_and_consume(&key, &policy, now + 11).await.unwrap();
        assert!(decision.is_admitted());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = DistributedCounterStore::connect("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX)
            .await
            .expect("Failed to connect to Redis");

        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_matches_in_process_window() {
        let store = DistributedCounterStore::connect("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX)
            .await
            .expect("Failed to connect to Redis");

        let policy = RateLimitPolicy::new(1_000, 2, "test");
        let key = policy.key_for(&format!("edge-{}", rand::random::<u32>()));
        let start = now_millis();
        let mut log = std::collections::VecDeque::new();

        // Event exactly one window old must already be out of the window
        for offset in [0, 400, 900, 1_000, 1_399, 1_400, 2_400] {
            let now = start + offset;
            let expected = crate::rate_limit::window::sliding_window(&mut log, &policy, now);
            let decision = store.check_and_consume(&key, &policy, now).await.unwrap();
            assert_eq!(decision, expected, "mismatch at +{}ms", offset);
        }

        store.reset(&key).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_redis_concurrent_callers_admit_exactly_max() {
        let store = Arc::new(
            DistributedCounterStore::connect("redis://127.0.0.1:6379", DEFAULT_KEY_PREFIX)
                .await
                .expect("Failed to connect to Redis"),
        );

        let policy = RateLimitPolicy::new(60_000, 10, "test");
        let key = policy.key_for(&format!("burst-{}", rand::random::<u32>()));
        let now = now_millis();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                let policy = policy.clone();
                let key = key.clone();
                tokio::spawn(async move { store.check_and_consume(&key, &policy, now).await })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_admitted() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);

        store.reset(&key).await.unwrap();
    }
}
