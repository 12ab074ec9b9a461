//! Tollgate - Distributed Fixed-Window Rate Limiting
//!
//! This crate implements a fixed-window rate limiter over a shared
//! counter store. All instances pointing at the same store converge on
//! the same counters, so the limit holds across processes and hosts
//! without any coordination beyond the store's atomic increment.
//!
//! ```
//! use tollgate::{Gate, LimiterConfig, MemoryStore, RateLimiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tollgate::Result<()> {
//! let limiter = RateLimiter::new(MemoryStore::new(), LimiterConfig::default())?;
//! let gate = Gate::new(limiter);
//!
//! let admission = gate.consume("user:42").await?;
//! if admission.allowed() {
//!     println!("request admitted");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod store;
pub mod window;

pub use config::{FailurePolicy, LimiterConfig};
pub use error::{Result, TollgateError};
pub use gate::{Admission, Gate};
pub use limiter::{Decision, RateLimiter};
pub use store::{CasCounterStore, CounterStore, CounterUpdate, KeyValueStore, KvEntry, MemoryStore};
pub use window::{window_index, WindowKey};
