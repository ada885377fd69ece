//! HTTP(S) fetcher.

use std::io;
use std::sync::Once;

use chrono::DateTime;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::LAST_MODIFIED;
use tracing::warn;

use crate::error::FetchError;
use crate::fetcher::{FetchedFile, Fetcher, FetcherOptions, temp_with_extension};
use crate::uri::scheme_of;

static INSECURE_WARNING: Once = Once::new();

/// Fetcher for `http`/`https` URIs.
///
/// HTTP has no directory concept, so [`Fetcher::listdir`] always fails with
/// an unsupported-operation error.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(options: &FetcherOptions) -> Self {
        let mut builder = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(None);
        if !options.verify_certs {
            INSECURE_WARNING.call_once(|| {
                warn!("TLS certificate verification is disabled for HTTP sources");
            });
            builder = builder.danger_accept_invalid_certs(true);
        }
        Self {
            client: builder.build().expect("failed to build HTTP client"),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError> {
        let response = self
            .client
            .get(uri)
            .send()
            .map_err(|err| FetchError::transport(uri, err))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(uri.to_string()));
        }
        let mut response = response
            .error_for_status()
            .map_err(|err| FetchError::transport(uri, err))?;

        let mut temp = temp_with_extension(uri)?;
        io::copy(&mut response, temp.as_file_mut())?;
        Ok(FetchedFile::from_temp(temp)?)
    }

    fn listdir(&mut self, dirpath: &str) -> Result<Vec<String>, FetchError> {
        Err(FetchError::UnsupportedOperation {
            scheme: scheme_of(dirpath).to_string(),
            operation: "listdir",
        })
    }

    fn mtime(&mut self, uri: &str) -> Result<Option<i64>, FetchError> {
        let Ok(response) = self.client.head(uri).send() else {
            return Ok(None);
        };
        let Some(value) = response.headers().get(LAST_MODIFIED) else {
            return Ok(None);
        };
        let Ok(text) = value.to_str() else {
            return Ok(None);
        };
        Ok(DateTime::parse_from_rfc2822(text)
            .ok()
            .map(|dt| dt.timestamp()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listdir_is_always_unsupported() {
        let mut fetcher = HttpFetcher::new(&FetcherOptions::default());
        for uri in ["https://example.com/data/", "http://host/a/b"] {
            let err = fetcher.listdir(uri).unwrap_err();
            assert!(matches!(
                err,
                FetchError::UnsupportedOperation { operation: "listdir", .. }
            ));
        }
    }
}
