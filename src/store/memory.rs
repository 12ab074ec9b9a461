//! In-process counter store.
//!
//! Backs single-process deployments and the test suite. Per-key atomicity
//! comes from the sharded map's entry locking, so no compare-and-swap
//! retries are needed. Expired records are replaced lazily on access and
//! reclaimed in bulk by an opportunistic periodic sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, TollgateError};

use super::{CounterStore, CounterUpdate};

/// How often the store walks its map to drop expired records.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One window's counter record.
#[derive(Debug, Clone, Copy)]
struct CounterRecord {
    count: u64,
    expires_at: SystemTime,
}

/// A counter store held entirely in process memory.
pub struct MemoryStore {
    /// Counter records indexed by encoded window key.
    records: DashMap<String, CounterRecord>,
    /// Next time the sweep should run.
    next_sweep: Mutex<SystemTime>,
    /// Interval between sweeps.
    sweep_interval: Duration,
    /// Set once `close` has been called.
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a new store that sweeps expired records at the given interval.
    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            next_sweep: Mutex::new(UNIX_EPOCH),
            sweep_interval,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop expired records if the sweep interval has elapsed.
    fn maybe_sweep(&self, now: SystemTime) {
        let mut next_sweep = self.next_sweep.lock();
        if now < *next_sweep {
            return;
        }
        *next_sweep = now + self.sweep_interval;
        drop(next_sweep);

        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        // Concurrent inserts can land between the retain and the recount.
        let swept = before.saturating_sub(self.records.len());
        if swept > 0 {
            debug!(swept = swept, remaining = self.records.len(), "Swept expired counters");
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TollgateError::StoreUnavailable(
                "store is closed".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_with_expiry(
        &self,
        key: &str,
        cost: u64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<CounterUpdate> {
        self.check_open()?;
        self.maybe_sweep(now);

        // The entry holds the shard lock, so create-or-increment is atomic
        // per key.
        match self.records.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(CounterRecord {
                    count: cost,
                    expires_at: now + ttl,
                });
                Ok(CounterUpdate {
                    count: cost,
                    expires_in: ttl,
                    created: true,
                })
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.expires_at <= now {
                    // Expired but not yet swept: this window is over, start
                    // the next one in place.
                    *record = CounterRecord {
                        count: cost,
                        expires_at: now + ttl,
                    };
                    return Ok(CounterUpdate {
                        count: cost,
                        expires_in: ttl,
                        created: true,
                    });
                }

                record.count = record.count.saturating_add(cost);
                Ok(CounterUpdate {
                    count: record.count,
                    expires_in: record.expires_at.duration_since(now).unwrap_or_default(),
                    created: false,
                })
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.records.clear();
        Ok(())
    }
}
