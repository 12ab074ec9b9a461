//! Counter store abstraction and bundled backends.
//!
//! The limiter core speaks to storage through [`CounterStore`], whose one
//! operation is an atomic increment-with-expiry. Backends with a native
//! atomic increment implement the trait directly ([`MemoryStore`]);
//! key-value stores that only offer conditional writes go through the
//! [`CasCounterStore`] adapter, which supplies the atomicity with a
//! bounded compare-and-swap retry loop.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::error::Result;

mod kv;
mod memory;

pub use kv::{CasCounterStore, KeyValueStore, KvEntry};
pub use memory::MemoryStore;

/// Outcome of one atomic counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    /// Counter value after this increment was applied.
    pub count: u64,
    /// Time until the counter's record expires.
    pub expires_in: Duration,
    /// Whether this increment created the record.
    pub created: bool,
}

/// Trait for counter storage backends.
///
/// Implementations must apply the whole `cost` in one atomic step: two
/// concurrent calls for the same key must serialize, and no call may
/// observe a partially applied increment. Expiry is scheduled only when
/// a record is created; later increments leave the deadline untouched so
/// the window ends on schedule no matter how much traffic it saw.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add `cost` to the counter at `key`, creating it with
    /// the given time-to-live if absent, and return the updated state.
    async fn increment_with_expiry(
        &self,
        key: &str,
        cost: u64,
        ttl: Duration,
        now: SystemTime,
    ) -> Result<CounterUpdate>;

    /// Release whatever the backend holds. Afterwards every operation
    /// fails with a store-unavailable error.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
