//! Counter adapter for key-value stores without a native atomic increment.
//!
//! Stores that only offer conditional writes (create-if-absent and
//! compare-and-swap) get the counter contract through [`CasCounterStore`]:
//! read the current value, compute the incremented value, and swap it in
//! only if nobody else wrote in between. Lost races are retried a bounded
//! number of times with jittered exponential backoff; exhausting the
//! budget reports the store as unavailable rather than looping forever.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::Rng;
use tracing::trace;

use crate::error::{Result, TollgateError};

use super::{CounterStore, CounterUpdate};

/// Attempts before a contended increment gives up.
const MAX_CAS_ATTEMPTS: u32 = 8;
/// First backoff step.
const CAS_BACKOFF_BASE: Duration = Duration::from_micros(50);
/// Ceiling for a single backoff step.
const CAS_BACKOFF_CAP: Duration = Duration::from_millis(5);

/// A value read from a key-value store, with its remaining lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvEntry {
    /// Stored counter value.
    pub value: u64,
    /// Time until the entry expires.
    pub expires_in: Duration,
}

/// Trait for key-value backends with conditional writes.
///
/// Implementations must treat expired entries as absent: `get` returns
/// `None` for them, `put_if_absent` overwrites them, and
/// `compare_and_swap` fails on them. `compare_and_swap` replaces only
/// the value; the entry keeps its original expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the live entry at `key`, if any.
    async fn get(&self, key: &str, now: SystemTime) -> Result<Option<KvEntry>>;

    /// Write `value` with the given time-to-live only if no live entry
    /// exists. Returns whether the write happened.
    async fn put_if_absent(
        &self,
        key: &str,
        value: u64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<bool>;

    /// Replace the value at `key` only if the live entry still holds
    /// `expected`. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        value: u64,
        now: SystemTime,
    ) -> Result<bool>;

    /// Release whatever the backend holds.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapter giving a [`KeyValueStore`] the atomic counter contract.
pub struct CasCounterStore<S: KeyValueStore> {
    inner: S,
}

impl<S: KeyValueStore> CasCounterStore<S> {
    /// Wrap a key-value store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Delay before retry `attempt` (1-based). Half the exponential step
    /// is deterministic, half is random, so colliding writers spread out.
    fn backoff_delay(attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        let step = CAS_BACKOFF_BASE
            .saturating_mul(1u32 << shift)
            .min(CAS_BACKOFF_CAP);
        let half_us = step.as_micros() as u64 / 2;
        let jitter_us = rand::thread_rng().gen_range(0..=half_us);
        Duration::from_micros(half_us + jitter_us)
    }
}

#[async_trait]
impl<S: KeyValueStore> CounterStore for CasCounterStore<S> {
    async fn increment_with_expiry(
        &self,
        key: &str,
        cost: u64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<CounterUpdate> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Self::backoff_delay(attempt)).await;
            }

            match self.inner.get(key, now).await? {
                None => {
                    if self.inner.put_if_absent(key, cost, ttl, now).await? {
                        return Ok(CounterUpdate {
                            count: cost,
                            expires_in: ttl,
                            created: true,
                        });
                    }
                    // Another writer created the entry first.
                    trace!(key = %key, attempt = attempt, "Lost creation race, retrying");
                }
                Some(entry) => {
                    let next = entry.value.checked_add(cost).ok_or_else(|| {
                        TollgateError::StoreInconsistent(format!(
                            "counter at {} would overflow u64",
                            key
                        ))
                    })?;
                    if self
                        .inner
                        .compare_and_swap(key, entry.value, next, now)
                        .await?
                    {
                        return Ok(CounterUpdate {
                            count: next,
                            expires_in: entry.expires_in,
                            created: false,
                        });
                    }
                    // The value moved under us.
                    trace!(key = %key, attempt = attempt, "Lost swap race, retrying");
                }
            }
        }

        Err(TollgateError::StoreUnavailable(format!(
            "compare-and-swap retry budget exhausted after {} attempts",
            MAX_CAS_ATTEMPTS
        )))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
