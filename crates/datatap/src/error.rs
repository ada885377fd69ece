//! Top-level error type.

use datatap_cache::CacheError;
use datatap_io::FetchError;

/// Errors surfaced by source resolution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The glob pattern of a request does not parse.
    #[error("invalid glob pattern: {0}")]
    GlobPattern(#[from] glob::PatternError),

    /// The regex pattern of a request does not parse.
    #[error("invalid regex pattern: {0}")]
    RegexPattern(#[from] regex::Error),

    /// The caller-supplied reader rejected a fetched file.
    #[error("failed to read {uri}: {source}")]
    Reader {
        uri: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A pool lookup for a name that was never added.
    #[error("unknown source {0:?}")]
    UnknownSource(String),
}
