//! Source resolution: expansion, fetch, read, and cache orchestration.

use datatap_cache::CacheBackend;
use datatap_io::uri::basename;
use datatap_io::{FetchedFile, Registry};
use tracing::debug;

use crate::error::Error;
use crate::matcher::expand;
use crate::request::DataRequest;

/// Reader callback errors are opaque to the resolver.
pub type ReaderError = Box<dyn std::error::Error + Send + Sync>;

/// One value produced by a resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    /// Base name of the file this value came from; set only when the
    /// request's pattern expanded to more than one file, so single-file
    /// reads stay untagged.
    pub origin: Option<String>,
}

/// Resolves [`DataRequest`]s into values through a scheme registry.
pub struct SourceResolver {
    registry: Registry,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceResolver {
    /// A resolver over the built-in schemes.
    pub fn new() -> Self {
        Self {
            registry: Registry::with_default_schemes(),
        }
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Resolve a request into a lazy stream of values.
    ///
    /// The request's URI is expanded first; each yielded item covers one
    /// concrete file. `read` turns a fetched file into a value. Caching
    /// applies per file when a backend is given, the request carries a TTL,
    /// and the read is not chunked; a cache hit skips the fetch entirely.
    pub fn resolve<'a, T, F>(
        &'a self,
        request: &DataRequest,
        cache: Option<&'a dyn CacheBackend<T>>,
        read: F,
    ) -> Result<ResolvedSources<'a, T, F>, Error>
    where
        F: FnMut(&mut FetchedFile) -> Result<T, ReaderError>,
    {
        let uris = expand(
            &self.registry,
            &request.uri,
            request.match_mode,
            &request.fetcher_options,
        )?;
        Ok(ResolvedSources {
            resolver: self,
            request: request.clone(),
            cache: cache.filter(|_| request.expire.is_some() && !request.is_chunked()),
            read,
            tag_origin: uris.len() > 1,
            uris: uris.into_iter(),
        })
    }

    fn resolve_one<T, F>(
        &self,
        request: &DataRequest,
        uri: &str,
        cache: Option<&dyn CacheBackend<T>>,
        read: &mut F,
    ) -> Result<T, Error>
    where
        F: FnMut(&mut FetchedFile) -> Result<T, ReaderError>,
    {
        let mut fetcher = self.registry.get(uri, &request.fetcher_options)?;

        let Some(cache) = cache else {
            let mut file = fetcher.open(uri)?;
            return read(&mut file).map_err(|source| Error::Reader {
                uri: uri.to_string(),
                source,
            });
        };

        let resolved = request.resolved(uri);
        let key = resolved.cache_key();
        // an unreachable mtime degrades to "unknown" rather than failing
        // the whole resolution
        let mtime = fetcher.mtime(uri).unwrap_or(None);

        match cache.get(&key, mtime, request.expire) {
            Ok(value) => {
                debug!("serving {uri} from cache");
                Ok(value)
            }
            Err(err) if err.is_miss() => {
                let mut file = fetcher.open(uri)?;
                let value = read(&mut file).map_err(|source| Error::Reader {
                    uri: uri.to_string(),
                    source,
                })?;
                cache.set(&key, &value, mtime)?;
                Ok(value)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Lazy stream of per-file values; files are fetched as the stream is
/// consumed.
pub struct ResolvedSources<'a, T, F> {
    resolver: &'a SourceResolver,
    request: DataRequest,
    cache: Option<&'a dyn CacheBackend<T>>,
    read: F,
    uris: std::vec::IntoIter<String>,
    tag_origin: bool,
}

impl<'a, T, F> ResolvedSources<'a, T, F> {
    /// The concrete URIs still to be read.
    pub fn remaining_uris(&self) -> &[String] {
        self.uris.as_slice()
    }
}

impl<'a, T, F> Iterator for ResolvedSources<'a, T, F>
where
    F: FnMut(&mut FetchedFile) -> Result<T, ReaderError>,
{
    type Item = Result<Resolved<T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let uri = self.uris.next()?;
        let result = self
            .resolver
            .resolve_one(&self.request, &uri, self.cache, &mut self.read)
            .map(|value| Resolved {
                value,
                origin: self.tag_origin.then(|| basename(&uri).to_string()),
            });
        Some(result)
    }
}
