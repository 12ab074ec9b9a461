//! Consumption surface wrapping the rate limiter core.
//!
//! The gate is the one entry point request handlers call. It forwards to
//! the limiter and resolves store-unavailable failures into an explicit
//! allow or deny according to the configured failure policy, so callers
//! never have to guess what an unreachable store means. Inconsistent
//! store states are not policy-resolved; they surface as errors.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{instrument, warn};

use crate::config::FailurePolicy;
use crate::error::{Result, TollgateError};
use crate::limiter::{Decision, RateLimiter};
use crate::store::CounterStore;

/// Outcome of an admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The store counted the consumption and the limiter decided.
    Counted(Decision),
    /// The store was unavailable; the failure policy decided and nothing
    /// was counted.
    Uncounted {
        /// Whether the failure policy admits the request.
        allowed: bool,
        /// Why the store was unavailable.
        cause: String,
    },
}

impl Admission {
    /// Whether the request should be admitted.
    pub fn allowed(&self) -> bool {
        match self {
            Admission::Counted(decision) => decision.allowed,
            Admission::Uncounted { allowed, .. } => *allowed,
        }
    }

    /// The counted decision, if the store was reachable.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Admission::Counted(decision) => Some(decision),
            Admission::Uncounted { .. } => None,
        }
    }

    /// Whether this outcome came from the failure policy instead of a
    /// counted window.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Admission::Uncounted { .. })
    }
}

/// The admission gate callers consume points through.
pub struct Gate<S: CounterStore> {
    /// The shared limiter core.
    limiter: Arc<RateLimiter<S>>,
}

impl<S: CounterStore> Clone for Gate<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
        }
    }
}

impl<S: CounterStore> Gate<S> {
    /// Create a gate over a limiter.
    pub fn new(limiter: RateLimiter<S>) -> Self {
        Self {
            limiter: Arc::new(limiter),
        }
    }

    /// Get the underlying limiter.
    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// Consume one point for `subject`.
    pub async fn consume(&self, subject: &str) -> Result<Admission> {
        self.consume_with_cost(subject, 1).await
    }

    /// Consume `cost` points for `subject`.
    pub async fn consume_with_cost(&self, subject: &str, cost: u64) -> Result<Admission> {
        self.consume_at(subject, cost, SystemTime::now()).await
    }

    /// Consume `cost` points for `subject` in the window covering `now`.
    #[instrument(skip(self, now))]
    pub async fn consume_at(
        &self,
        subject: &str,
        cost: u64,
        now: SystemTime,
    ) -> Result<Admission> {
        match self.limiter.consume_at(subject, cost, now).await {
            Ok(decision) => Ok(Admission::Counted(decision)),
            Err(TollgateError::StoreUnavailable(cause)) => {
                let allowed = matches!(
                    self.limiter.config().failure_policy,
                    FailurePolicy::FailOpen
                );
                warn!(
                    subject = %subject,
                    allowed = allowed,
                    cause = %cause,
                    "Store unavailable, failure policy decided"
                );
                Ok(Admission::Uncounted { allowed, cause })
            }
            Err(err) => Err(err),
        }
    }

    /// Release the backing store. Later calls resolve through the
    /// failure policy.
    pub async fn shutdown(&self) -> Result<()> {
        self.limiter.shutdown().await
    }
}
