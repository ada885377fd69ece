//! Named collections of data requests.

use std::collections::HashMap;

use datatap_cache::CacheBackend;
use datatap_io::FetchedFile;
use datatap_io::uri::scheme_of;

use crate::error::Error;
use crate::request::DataRequest;
use crate::resolver::{ReaderError, Resolved, SourceResolver};

/// A named set of [`DataRequest`]s resolved through one resolver.
///
/// Relative local URIs are qualified against the pool's base directory, so
/// a pool can describe a directory of files portably.
#[derive(Default)]
pub struct DataPool {
    resolver: SourceResolver,
    base_dir: Option<String>,
    sources: HashMap<String, DataRequest>,
}

impl DataPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }

    pub fn resolver_mut(&mut self) -> &mut SourceResolver {
        &mut self.resolver
    }

    pub fn add(&mut self, name: impl Into<String>, request: DataRequest) {
        self.sources.insert(name.into(), request);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Resolve one named source, reading every file it expands to.
    pub fn get<T, F>(
        &self,
        name: &str,
        cache: Option<&dyn CacheBackend<T>>,
        read: F,
    ) -> Result<Vec<Resolved<T>>, Error>
    where
        F: FnMut(&mut FetchedFile) -> Result<T, ReaderError>,
    {
        let request = self
            .sources
            .get(name)
            .ok_or_else(|| Error::UnknownSource(name.to_string()))?;
        let request = self.qualified(request);
        self.resolver.resolve(&request, cache, read)?.collect()
    }

    /// Qualify a relative local URI against the pool's base directory.
    fn qualified(&self, request: &DataRequest) -> DataRequest {
        let uri = &request.uri;
        match &self.base_dir {
            Some(base) if scheme_of(uri).is_empty() && !uri.starts_with('/') => {
                let mut qualified = request.clone();
                qualified.uri = format!("{}/{uri}", base.trim_end_matches('/'));
                qualified
            }
            _ => request.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_source() {
        let pool = DataPool::new();
        let err = pool
            .get::<String, _>("nope", None, |_| Ok(String::new()))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSource(name) if name == "nope"));
    }

    #[test]
    fn test_relative_uris_are_qualified() {
        let mut pool = DataPool::with_base_dir("/data/");
        pool.add("sales", DataRequest::new("2024/sales.csv"));
        let request = pool.qualified(&pool.sources["sales"]);
        assert_eq!(request.uri, "/data/2024/sales.csv");
    }

    #[test]
    fn test_absolute_and_remote_uris_are_untouched() {
        let pool = DataPool::with_base_dir("/data");
        let absolute = DataRequest::new("/etc/passwd.csv");
        assert_eq!(pool.qualified(&absolute).uri, "/etc/passwd.csv");
        let remote = DataRequest::new("ftp://host/a.csv");
        assert_eq!(pool.qualified(&remote).uri, "ftp://host/a.csv");
    }
}
