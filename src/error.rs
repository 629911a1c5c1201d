//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Structural errors (capacity, disposed, mismatch) propagate to the caller.
/// Failures raised while disposing evicted items never show up here; they are
/// reported through the disposal error handler instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A hard limit could not be satisfied because no evictable entry is left
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// The item alone is larger than the configured size bound
    #[error("Item too large: size {size} exceeds limit {limit}")]
    ItemTooLarge { size: i64, limit: i64 },

    /// The cache instance has been disposed
    #[error("Cache has been disposed")]
    Disposed,

    /// Wrong options or item type passed through a type-erased view
    #[error("Option mismatch: expected {expected}")]
    OptionMismatch { expected: &'static str },

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    // == Error Code ==
    /// Short machine-readable code used by the console front end.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Capacity(_) => "capacity",
            CacheError::ItemTooLarge { .. } => "too_large",
            CacheError::Disposed => "disposed",
            CacheError::OptionMismatch { .. } => "mismatch",
            CacheError::Cancelled => "cancelled",
            CacheError::InvalidRequest(_) => "invalid",
            CacheError::NotFound(_) => "not_found",
            CacheError::Internal(_) => "internal",
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
