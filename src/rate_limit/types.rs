use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest accepted window.
///
/// Window ends (`now + window_millis`) must stay exact as Redis sorted-set
/// scores, which are doubles.
pub const MAX_WINDOW_MILLIS: u64 = 1 << 52;

/// Rate limit policy supplied by the caller on every check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RateLimitPolicy {
    /// Length of the sliding window in milliseconds
    pub window_millis: u64,
    /// Maximum operations admitted per window per key
    pub max_operations: u32,
    /// Prefix that keeps keys from different call sites apart
    #[serde(default)]
    pub key_namespace: String,
}

impl RateLimitPolicy {
    /// Create a new policy
    pub fn new(window_millis: u64, max_operations: u32, key_namespace: impl Into<String>) -> Self {
        Self {
            window_millis,
            max_operations,
            key_namespace: key_namespace.into(),
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Reject non-positive limits and windows that are zero or too long
    pub fn validate(&self) -> Result<()> {
        if self.window_millis == 0 {
            return Err(LimiterError::InvalidPolicy(
                "window_millis must be > 0".to_string(),
            ));
        }
        if self.window_millis > MAX_WINDOW_MILLIS {
            return Err(LimiterError::InvalidPolicy(format!(
                "window_millis must be <= {}, got {}",
                MAX_WINDOW_MILLIS, self.window_millis
            )));
        }
        if self.max_operations == 0 {
            return Err(LimiterError::InvalidPolicy(
                "max_operations must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the key for a subject under this policy's namespace
    pub fn key_for(&self, subject: &str) -> RateLimitKey {
        RateLimitKey::new(&self.key_namespace, subject)
    }
}

/// Key identifying the throttled subject, `{namespace}:{subject}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    key: String,
    subject_len: usize,
}

impl RateLimitKey {
    /// Compose a key from a namespace and a subject identifier
    pub fn new(namespace: &str, subject: &str) -> Self {
        Self {
            key: format!("{}:{}", namespace, subject),
            subject_len: subject.len(),
        }
    }

    /// Use an already-composed key as-is
    pub fn from_raw(key: impl Into<String>) -> Self {
        let key = key.into();
        let subject_len = key.len();
        Self { key, subject_len }
    }

    /// The composed key
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The subject part of the key
    pub fn subject(&self) -> &str {
        &self.key[self.key.len() - self.subject_len..]
    }

    /// Keys need a non-empty subject
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() || self.subject_len == 0 {
            return Err(LimiterError::InvalidPolicy(
                "rate limit key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed
    Admitted {
        /// Operations still available in the current window
        remaining: u32,
    },
    /// The operation must be rejected
    Denied {
        /// Time until a retry would be admitted
        retry_after_millis: u64,
    },
}

impl Decision {
    /// Whether the operation was admitted
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// Retry hint for denied operations
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Admitted { .. } => None,
            Decision::Denied { retry_after_millis } => {
                Some(Duration::from_millis(*retry_after_millis))
            }
        }
    }

    /// Retry hint in whole seconds for `Retry-After` headers (rounded up, at least 1)
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after()
            .map(|d| d.as_millis().div_ceil(1000).max(1) as u64)
    }

    /// Remaining operations, zero when denied
    pub fn remaining(&self) -> u32 {
        match self {
            Decision::Admitted { remaining } => *remaining,
            Decision::Denied { .. } => 0,
        }
    }

    /// Short label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Admitted { .. } => "admitted",
            Decision::Denied { .. } => "denied",
        }
    }
}
