//! Scheme registry.
//!
//! An explicit scheme → constructor table built at startup and handed to the
//! resolver, so tests can swap in fake fetchers for made-up schemes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FetchError;
use crate::fetcher::{Fetcher, FetcherOptions};
use crate::ftp::{FTP_SCHEMES, FtpFetcher};
use crate::http::HttpFetcher;
use crate::local::LocalFetcher;
use crate::s3::{S3_SCHEMES, S3Fetcher};
use crate::uri::scheme_of;

type Factory = Arc<dyn Fn(&FetcherOptions) -> Box<dyn Fetcher> + Send + Sync>;

/// Maps URI schemes to fetcher constructors.
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// A registry with no schemes registered.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in scheme fetcher registered.
    pub fn with_default_schemes() -> Self {
        let mut registry = Self::empty();
        registry.register(&[""], |_| Box::new(LocalFetcher));
        registry.register(&["http", "https"], |options| {
            Box::new(HttpFetcher::new(options))
        });
        registry.register(FTP_SCHEMES, |options| Box::new(FtpFetcher::new(options)));
        registry.register(S3_SCHEMES, |options| Box::new(S3Fetcher::new(options)));
        registry
    }

    /// Register one constructor for one or more schemes.
    pub fn register<F>(&mut self, schemes: &[&str], factory: F)
    where
        F: Fn(&FetcherOptions) -> Box<dyn Fetcher> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(factory);
        for scheme in schemes {
            self.factories
                .insert((*scheme).to_string(), Arc::clone(&factory));
        }
    }

    /// Whether a scheme has a registered fetcher.
    pub fn supports(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    /// Build the fetcher matching the URI's scheme.
    pub fn get(
        &self,
        uri: &str,
        options: &FetcherOptions,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        let scheme = scheme_of(uri);
        let factory =
            self.factories
                .get(scheme)
                .ok_or_else(|| FetchError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                    uri: uri.to_string(),
                })?;
        Ok(factory(options))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_default_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_supports_builtin_schemes() {
        let registry = Registry::default();
        for scheme in ["", "http", "https", "ftp", "ftps", "sftp", "s3", "s3n", "s3a"] {
            assert!(registry.supports(scheme), "missing scheme {scheme:?}");
        }
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let registry = Registry::default();
        let err = registry
            .get("gopher://host/file.csv", &FetcherOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::UnsupportedScheme { scheme, .. } if scheme == "gopher"
        ));
    }

    #[test]
    fn test_empty_scheme_resolves_to_local() {
        let registry = Registry::default();
        assert!(registry.get("/tmp/a.csv", &FetcherOptions::default()).is_ok());
    }
}
