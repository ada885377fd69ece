//! Data source requests.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use datatap_io::FetcherOptions;
use datatap_io::uri::basename;

use crate::matcher::MatchMode;

/// A request for tabular data behind a URI.
///
/// Everything that changes what a reader would produce lives here: the URI,
/// the match mode, reader options, and fetcher options. `expire` only bounds
/// how long a cached result stays valid, so it stays out of the cache key.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub uri: String,
    pub match_mode: MatchMode,
    /// Options forwarded to the caller's reader, keyed by name. Sorted so
    /// the cache identity is stable across construction order.
    pub reader_options: BTreeMap<String, serde_json::Value>,
    /// How long a cached result may be served, `None` to disable caching.
    pub expire: Option<Duration>,
    pub fetcher_options: FetcherOptions,
}

#[derive(Serialize)]
struct Identity<'a> {
    uri: &'a str,
    match_mode: MatchMode,
    reader_options: &'a BTreeMap<String, serde_json::Value>,
    fetcher_options: &'a FetcherOptions,
}

impl DataRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            match_mode: MatchMode::default(),
            reader_options: BTreeMap::new(),
            expire: None,
            fetcher_options: FetcherOptions::default(),
        }
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_reader_option(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.reader_options.insert(key.into(), value.into());
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn with_fetcher_options(mut self, options: FetcherOptions) -> Self {
        self.fetcher_options = options;
        self
    }

    /// Chunked reads stream through the caller's reader and are never cached
    /// whole.
    pub fn is_chunked(&self) -> bool {
        self.reader_options.contains_key("chunksize")
    }

    /// Cache key for this request: a hash of everything that affects the
    /// produced value, suffixed with the URI's basename for readability.
    pub fn cache_key(&self) -> String {
        let identity = Identity {
            uri: &self.uri,
            match_mode: self.match_mode,
            reader_options: &self.reader_options,
            fetcher_options: &self.fetcher_options,
        };
        let identity =
            serde_json::to_string(&identity).expect("request identity is serializable");
        datatap_cache::cache_key(&identity, basename(&self.uri))
    }

    /// The same request pointed at one concrete URI from its expansion.
    pub(crate) fn resolved(&self, uri: &str) -> Self {
        let mut request = self.clone();
        request.uri = uri.to_string();
        request.match_mode = MatchMode::Exact;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_ignores_expire() {
        let base = DataRequest::new("ftp://host/dir/a.csv");
        let with_ttl = base.clone().with_expire(Duration::from_secs(60));
        assert_eq!(base.cache_key(), with_ttl.cache_key());
    }

    #[test]
    fn test_cache_key_sees_reader_options() {
        let base = DataRequest::new("ftp://host/dir/a.csv");
        let tweaked = base.clone().with_reader_option("sep", ";");
        assert_ne!(base.cache_key(), tweaked.cache_key());
    }

    #[test]
    fn test_cache_key_sees_fetcher_options() {
        let base = DataRequest::new("s3://bucket/a.csv");
        let tweaked = base.clone().with_fetcher_options(FetcherOptions {
            endpoint_url: Some("https://minio.local".to_string()),
            ..FetcherOptions::default()
        });
        assert_ne!(base.cache_key(), tweaked.cache_key());
    }

    #[test]
    fn test_cache_key_ends_with_basename_slug() {
        let key = DataRequest::new("ftp://host/dir/monthly report.csv").cache_key();
        assert!(key.ends_with("-monthly-report.csv"));
    }

    #[test]
    fn test_chunked_detection() {
        let plain = DataRequest::new("a.csv");
        assert!(!plain.is_chunked());
        assert!(plain.with_reader_option("chunksize", 500).is_chunked());
    }
}
