//! Store-agnostic window algorithms.
//!
//! Both functions mutate a single key's record and return the decision. The
//! caller is responsible for holding that record exclusively while they run.

use super::types::{Decision, RateLimitPolicy};
use std::collections::VecDeque;

/// Sliding window over a log of admitted event timestamps.
///
/// Events at or before `now - window` are purged first. Only admitted events
/// are recorded, so sustained denied traffic does not grow the log.
pub fn sliding_window(log: &mut VecDeque<u64>, policy: &RateLimitPolicy, now: u64) -> Decision {
    let window_start = now.saturating_sub(policy.window_millis);
    while log.front().is_some_and(|&ts| ts <= window_start) {
        log.pop_front();
    }

    let count = log.len() as u64;
    let max = u64::from(policy.max_operations);

    if count < max {
        log.push_back(now);
        Decision::Admitted {
            remaining: (max - count - 1) as u32,
        }
    } else {
        let oldest = log.front().copied().unwrap_or(now);
        Decision::Denied {
            retry_after_millis: oldest
                .saturating_add(policy.window_millis)
                .saturating_sub(now),
        }
    }
}

/// Fixed window counter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowEntry {
    pub count: u32,
    pub reset_at_millis: u64,
}

impl FixedWindowEntry {
    /// Whether the window this entry counts has ended
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.reset_at_millis
    }
}

/// Fixed window counter.
///
/// Up to `2 * max_operations` operations can be admitted across a window
/// boundary; callers using this path accept that burst.
pub fn fixed_window(
    entry: &mut Option<FixedWindowEntry>,
    policy: &RateLimitPolicy,
    now: u64,
) -> Decision {
    let fresh = FixedWindowEntry {
        count: 0,
        reset_at_millis: now.saturating_add(policy.window_millis),
    };
    if entry.map_or(true, |state| state.is_expired(now)) {
        *entry = Some(fresh);
    }
    let state = entry.get_or_insert(fresh);

    if state.count < policy.max_operations {
        state.count += 1;
        Decision::Admitted {
            remaining: policy.max_operations - state.count,
        }
    } else {
        Decision::Denied {
            retry_after_millis: state.reset_at_millis.saturating_sub(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sliding_window_admits_up_to_max() {
        let policy = RateLimitPolicy::new(60_000, 5, "auth");
        let mut log = VecDeque::new();

        for i in 0..5u64 {
            let decision = sliding_window(&mut log, &policy, 1_000 + i * 200);
            assert_eq!(
                decision,
                Decision::Admitted {
                    remaining: 4 - i as u32
                }
            );
        }

        let decision = sliding_window(&mut log, &policy, 2_000);
        assert_eq!(
            decision,
            Decision::Denied {
                retry_after_millis: 59_000
            }
        );
        // Denied calls are not recorded
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_sliding_window_purges_expired_events() {
        let policy = RateLimitPolicy::new(1_000, 1, "ops");
        let mut log = VecDeque::new();

        assert!(sliding_window(&mut log, &policy, 0).is_admitted());
        assert_eq!(
            sliding_window(&mut log, &policy, 500),
            Decision::Denied {
                retry_after_millis: 500
            }
        );
        assert!(sliding_window(&mut log, &policy, 1_100).is_admitted());
        assert_eq!(log, VecDeque::from(vec![1_100]));
    }

    #[test]
    fn test_sliding_window_retry_after_is_exact() {
        let policy = RateLimitPolicy::new(1_000, 2, "ops");
        let mut log = VecDeque::new();

        sliding_window(&mut log, &policy, 100);
        sliding_window(&mut log, &policy, 300);
        let denied = sliding_window(&mut log, &policy, 400);
        let wait = match denied {
            Decision::Denied { retry_after_millis } => retry_after_millis,
            other => panic!("expected denial, got {:?}", other),
        };
        assert_eq!(wait, 700);

        // One slot frees exactly when the hint says so
        assert!(sliding_window(&mut log, &policy, 400 + wait).is_admitted());
        assert!(!sliding_window(&mut log, &policy, 400 + wait).is_admitted());
    }

    #[test]
    fn test_fixed_window_resets_at_boundary() {
        let policy = RateLimitPolicy::new(1_000, 2, "ops");
        let mut entry = None;

        assert!(fixed_window(&mut entry, &policy, 0).is_admitted());
        assert!(fixed_window(&mut entry, &policy, 10).is_admitted());
        assert_eq!(
            fixed_window(&mut entry, &policy, 600),
            Decision::Denied {
                retry_after_millis: 400
            }
        );
        assert_eq!(
            entry,
            Some(FixedWindowEntry {
                count: 2,
                reset_at_millis: 1_000
            })
        );

        assert_eq!(
            fixed_window(&mut entry, &policy, 1_000),
            Decision::Admitted { remaining: 1 }
        );
        assert_eq!(entry.map(|e| e.reset_at_millis), Some(2_000));
    }

    #[test]
    fn test_fixed_window_boundary_burst() {
        let policy = RateLimitPolicy::new(1_000, 3, "ops");
        let mut entry = None;

        // Window opens at 0; the whole quota is spent just before it closes
        fixed_window(&mut entry, &policy, 0);
        let mut admitted = 0;
        for now in [998, 999] {
            if fixed_window(&mut entry, &policy, now).is_admitted() {
                admitted += 1;
            }
        }
        // And again right after it reopens
        for now in [1_000, 1_001, 1_002] {
            if fixed_window(&mut entry, &policy, now).is_admitted() {
                admitted += 1;
            }
        }
        // Five admissions inside a 5ms span, more than the sliding window allows
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_huge_windows_do_not_wrap() {
        let policy = RateLimitPolicy::new(u64::MAX, 1, "api");
        let now = 1_700_000_000_000;

        let mut entry = None;
        assert!(fixed_window(&mut entry, &policy, now).is_admitted());
        assert_eq!(entry.map(|e| e.reset_at_millis), Some(u64::MAX));
        assert_eq!(
            fixed_window(&mut entry, &policy, now + 1),
            Decision::Denied {
                retry_after_millis: u64::MAX - now - 1
            }
        );

        let mut log = VecDeque::new();
        assert!(sliding_window(&mut log, &policy, now).is_admitted());
        assert_eq!(
            sliding_window(&mut log, &policy, now + 1),
            Decision::Denied {
                retry_after_millis: u64::MAX - now - 1
            }
        );
    }
}
