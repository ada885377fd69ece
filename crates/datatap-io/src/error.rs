//! Fetch error types.

use std::io;

/// Errors surfaced by fetchers and the scheme registry.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No fetcher is registered for the URI's scheme.
    #[error("unsupported scheme {scheme:?} for {uri}")]
    UnsupportedScheme { scheme: String, uri: String },

    /// The object does not exist on the backend.
    #[error("{0} not found, please make sure the file exists")]
    NotFound(String),

    /// A transient transport condition persisted past the retry ceiling.
    #[error("transport failure for {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The scheme has no notion of this operation (e.g. `listdir` over HTTP).
    #[error("{operation} is not supported for scheme {scheme:?}")]
    UnsupportedOperation {
        scheme: String,
        operation: &'static str,
    },

    /// The URI could not be parsed into scheme/host/path components.
    #[error("invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    pub(crate) fn transport(
        target: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        FetchError::Transport {
            target: target.into(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport { .. } | FetchError::Io(_))
    }
}
