//! Cache error types

use thiserror::Error;

/// Failure in the caching layer.
///
/// Recoverable by contract: callers degrade to uncached behaviour.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Durable tier I/O failure
    #[error("backing store error: {0}")]
    Io(#[from] tlgstore::Error),

    /// Value could not be encoded for the durable tier
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
