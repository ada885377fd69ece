//! Cache error types.

use std::io;

/// Errors surfaced by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No live entry for the key; callers recompute and `set`.
    #[error("cache miss for key {0:?}")]
    Miss(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to persist a temp file into the cache directory
    #[error("failed to persist cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl CacheError {
    /// Whether this is an ordinary miss rather than a storage failure.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss(_))
    }
}
