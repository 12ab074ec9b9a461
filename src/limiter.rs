//! Core fixed-window rate limiter.
//!
//! Each call is one independent transaction against the counter store:
//! derive the window key, atomically add the cost, compare the returned
//! count to the configured budget. The limiter itself holds no mutable
//! state, so any number of instances over the same store converge on the
//! same decisions.

use std::time::SystemTime;

use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};
use crate::store::CounterStore;
use crate::window::{window_index, WindowKey};

/// Result of one consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the consumption stayed within the budget.
    pub allowed: bool,
    /// Points left in the current window, floored at zero.
    pub remaining_points: u64,
    /// Milliseconds until the current window's counter expires; callers
    /// use it as a retry-after hint.
    pub ms_before_next: u64,
    /// Total points recorded in the current window, this call included.
    pub consumed_points: u64,
    /// Whether this call was the first consumption in the window.
    pub is_first_in_window: bool,
}

/// A fixed-window rate limiter over a shared counter store.
///
/// Thread-safe and cheap to share: all synchronization happens at the
/// store boundary.
pub struct RateLimiter<S: CounterStore> {
    /// The counter store backing all windows.
    store: S,
    /// Immutable limiter configuration.
    config: LimiterConfig,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter.
    ///
    /// Fails with `InvalidConfiguration` if the configuration cannot be
    /// run with; this never surfaces later at call time.
    pub fn new(store: S, config: LimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Get the limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Get the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume `cost` points for `subject` in the window covering the
    /// current wall-clock time.
    pub async fn consume(&self, subject: &str, cost: u64) -> Result<Decision> {
        self.consume_at(subject, cost, SystemTime::now()).await
    }

    /// Consume `cost` points for `subject` in the window covering `now`.
    ///
    /// A cost above the budget still records the consumption and then
    /// denies; there is no non-mutating peek.
    pub async fn consume_at(&self, subject: &str, cost: u64, now: SystemTime) -> Result<Decision> {
        if cost == 0 {
            return Err(TollgateError::InvalidCost);
        }

        let duration = self.config.duration();
        let index = window_index(now, duration);
        let key = WindowKey::new(subject, index).encode(&self.config.key_prefix);

        trace!(
            subject = %subject,
            cost = cost,
            window = index,
            "Consuming points"
        );

        let update = timeout(
            self.config.store_timeout(),
            self.store.increment_with_expiry(&key, cost, duration, now),
        )
        .await
        .map_err(|_| {
            TollgateError::StoreUnavailable(format!(
                "store operation timed out after {}ms",
                self.config.store_timeout_ms
            ))
        })??;

        // Read-after-write checks: no legal interleaving of atomic
        // increments can produce these states.
        if update.count < cost {
            return Err(TollgateError::StoreInconsistent(format!(
                "count {} is lower than the applied cost {}",
                update.count, cost
            )));
        }
        if update.created && update.count != cost {
            return Err(TollgateError::StoreInconsistent(format!(
                "freshly created counter holds {} instead of {}",
                update.count, cost
            )));
        }
        if update.created && update.expires_in.is_zero() {
            return Err(TollgateError::StoreInconsistent(
                "freshly created counter has no expiry".to_string(),
            ));
        }

        let points = self.config.points;
        let allowed = update.count <= points;
        if !allowed {
            debug!(
                subject = %subject,
                count = update.count,
                points = points,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            allowed,
            remaining_points: points.saturating_sub(update.count),
            ms_before_next: update.expires_in.as_millis() as u64,
            consumed_points: update.count,
            is_first_in_window: update.created,
        })
    }

    /// Release the backing store. Later calls fail with
    /// `StoreUnavailable`.
    pub async fn shutdown(&self) -> Result<()> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterUpdate, MemoryStore};
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};
    use tokio_test::assert_ok;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn test_config(points: u64, duration_secs: u64) -> LimiterConfig {
        LimiterConfig {
            points,
            duration_secs,
            ..LimiterConfig::default()
        }
    }

    fn memory_limiter(points: u64, duration_secs: u64) -> RateLimiter<MemoryStore> {
        RateLimiter::new(MemoryStore::new(), test_config(points, duration_secs)).unwrap()
    }

    #[tokio::test]
    async fn test_budget_sequence() {
        // points=10, duration=60: ten calls pass with remaining 9..=0,
        // the eleventh is denied, and the next window starts fresh.
        let limiter = memory_limiter(10, 60);

        for i in 1..=10u64 {
            let decision = limiter.consume_at("alice", 1, at(0)).await.unwrap();
            assert!(decision.allowed, "call {} should be allowed", i);
            assert_eq!(decision.remaining_points, 10 - i);
            assert_eq!(decision.consumed_points, i);
            assert_eq!(decision.is_first_in_window, i == 1);
            assert_eq!(decision.ms_before_next, 60_000);
        }

        let decision = limiter.consume_at("alice", 1, at(0)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_points, 0);
        assert_eq!(decision.consumed_points, 11);

        let decision = limiter.consume_at("alice", 1, at(61)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining_points, 9);
        assert!(decision.is_first_in_window);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_count() {
        let limiter = memory_limiter(5, 30);

        for _ in 0..5 {
            limiter.consume_at("bob", 1, at(100)).await.unwrap();
        }
        let denied = limiter.consume_at("bob", 1, at(100)).await.unwrap();
        assert!(!denied.allowed);

        // 100 is in window 3 of 30s windows; 130 is in window 4.
        let decision = limiter.consume_at("bob", 1, at(130)).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.consumed_points, 1);
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let limiter = memory_limiter(10, 60);

        for _ in 0..3 {
            limiter.consume_at("alice", 1, at(0)).await.unwrap();
        }
        let decision = limiter.consume_at("bob", 1, at(0)).await.unwrap();

        assert_eq!(decision.consumed_points, 1);
        assert!(decision.is_first_in_window);
    }

    #[tokio::test]
    async fn test_one_record_per_subject_and_window() {
        let limiter = memory_limiter(10, 60);

        for _ in 0..4 {
            limiter.consume_at("alice", 1, at(10)).await.unwrap();
        }
        assert_eq!(limiter.store().len(), 1);
    }

    #[tokio::test]
    async fn test_cost_above_budget_records_then_denies() {
        let limiter = memory_limiter(10, 60);

        let decision = limiter.consume_at("alice", 12, at(0)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_points, 0);
        assert_eq!(decision.consumed_points, 12);

        // The oversized cost stayed recorded.
        let decision = limiter.consume_at("alice", 1, at(0)).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.consumed_points, 13);
    }

    #[tokio::test]
    async fn test_zero_cost_rejected() {
        let limiter = memory_limiter(10, 60);

        let err = limiter.consume_at("alice", 0, at(0)).await.unwrap_err();
        assert!(matches!(err, TollgateError::InvalidCost));
        // Nothing was recorded.
        assert_eq!(limiter.store().len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_at_construction() {
        let result = RateLimiter::new(MemoryStore::new(), test_config(0, 60));
        assert!(matches!(
            result.err(),
            Some(TollgateError::InvalidConfiguration(_))
        ));

        let result = RateLimiter::new(MemoryStore::new(), test_config(10, 0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_consume_uses_wall_clock() {
        let limiter = memory_limiter(10, 60);

        let first = assert_ok!(limiter.consume("alice", 1).await);
        let second = assert_ok!(limiter.consume("alice", 1).await);

        assert_eq!(first.consumed_points, 1);
        // Both calls land in the same window unless the test straddles a
        // minute boundary; either way the count moved forward.
        assert!(second.consumed_points == 2 || second.is_first_in_window);
    }

    #[tokio::test]
    async fn test_concurrent_consumption_counts_exactly() {
        let limiter = Arc::new(memory_limiter(100, 60));
        let tasks = 30;

        let handles: Vec<_> = (0..tasks)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter
                        .consume_at("shared", 1, at(50))
                        .await
                        .unwrap()
                        .consumed_points
                })
            })
            .collect();

        let mut counts: Vec<u64> = join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        counts.sort_unstable();

        let expected: Vec<u64> = (1..=tasks).collect();
        assert_eq!(counts, expected);
    }

    #[tokio::test]
    async fn test_identical_configurations_decide_identically() {
        let a = memory_limiter(3, 60);
        let b = memory_limiter(3, 60);
        let times = [0u64, 10, 20, 30, 70];

        for now in times {
            let da = a.consume_at("carol", 1, at(now)).await.unwrap();
            let db = b.consume_at("carol", 1, at(now)).await.unwrap();
            assert_eq!(da, db);
        }
    }

    #[tokio::test]
    async fn test_shutdown_releases_store() {
        let limiter = memory_limiter(10, 60);

        assert_ok!(limiter.consume_at("alice", 1, at(0)).await);
        assert_ok!(limiter.shutdown().await);

        let err = limiter.consume_at("alice", 1, at(1)).await.unwrap_err();
        assert!(matches!(err, TollgateError::StoreUnavailable(_)));
    }

    /// Never completes an increment inside any sane timeout.
    struct SlowStore;

    #[async_trait]
    impl CounterStore for SlowStore {
        async fn increment_with_expiry(
            &self,
            _key: &str,
            cost: u64,
            ttl: Duration,
            _now: SystemTime,
        ) -> crate::error::Result<CounterUpdate> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CounterUpdate {
                count: cost,
                expires_in: ttl,
                created: true,
            })
        }
    }

    #[tokio::test]
    async fn test_slow_store_times_out_as_unavailable() {
        let config = LimiterConfig {
            store_timeout_ms: 10,
            ..LimiterConfig::default()
        };
        let limiter = RateLimiter::new(SlowStore, config).unwrap();

        let err = limiter.consume_at("alice", 1, at(0)).await.unwrap_err();
        assert!(matches!(err, TollgateError::StoreUnavailable(_)));
    }

    /// Returns a fixed update regardless of input.
    struct FixedStore(CounterUpdate);

    #[async_trait]
    impl CounterStore for FixedStore {
        async fn increment_with_expiry(
            &self,
            _key: &str,
            _cost: u64,
            _ttl: Duration,
            _now: SystemTime,
        ) -> crate::error::Result<CounterUpdate> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_count_below_cost_is_inconsistent() {
        let store = FixedStore(CounterUpdate {
            count: 1,
            expires_in: Duration::from_secs(60),
            created: false,
        });
        let limiter = RateLimiter::new(store, test_config(10, 60)).unwrap();

        let err = limiter.consume_at("alice", 5, at(0)).await.unwrap_err();
        assert!(matches!(err, TollgateError::StoreInconsistent(_)));
    }

    #[tokio::test]
    async fn test_created_count_mismatch_is_inconsistent() {
        let store = FixedStore(CounterUpdate {
            count: 7,
            expires_in: Duration::from_secs(60),
            created: true,
        });
        let limiter = RateLimiter::new(store, test_config(10, 60)).unwrap();

        let err = limiter.consume_at("alice", 2, at(0)).await.unwrap_err();
        assert!(matches!(err, TollgateError::StoreInconsistent(_)));
    }

    #[tokio::test]
    async fn test_created_without_expiry_is_inconsistent() {
        let store = FixedStore(CounterUpdate {
            count: 1,
            expires_in: Duration::ZERO,
            created: true,
        });
        let limiter = RateLimiter::new(store, test_config(10, 60)).unwrap();

        let err = limiter.consume_at("alice", 1, at(0)).await.unwrap_err();
        assert!(matches!(err, TollgateError::StoreInconsistent(_)));
    }
}
