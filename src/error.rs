//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Missing or expired keys are not errors; lookups report them as `None`.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Rejected argument (empty key, zero sweep interval)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The background sweeper could not be started
    #[error("Failed to start sweeper: {0}")]
    Sweeper(#[from] std::io::Error),
}

impl CacheError {
    /// Shorthand for the empty-key rejection shared by every keyed operation.
    pub(crate) fn empty_key() -> Self {
        CacheError::InvalidArgument("key must not be empty".to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
