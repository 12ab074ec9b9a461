//! Error types for tollgate operations.

use thiserror::Error;

/// Main error type for tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Limiter configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A consume call asked for a cost of zero
    #[error("Invalid cost: cost must be at least 1")]
    InvalidCost,

    /// The counter store could not serve the operation
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The counter store returned a state the limiter cannot explain
    #[error("Store inconsistent: {0}")]
    StoreInconsistent(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
