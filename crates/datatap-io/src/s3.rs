//! S3 fetcher for the `s3`, `s3n`, and `s3a` schemes.
//!
//! Credentials may ride in the URI (`s3://key:secret@bucket/path`, percent
//! encoded) or come from the ambient AWS environment. Freshly written objects
//! are not always visible right away, so `open` retries a few times with a
//! short settle delay, dropping the cached listing between attempts.

use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tracing::debug;

use crate::error::FetchError;
use crate::fetcher::{FetchedFile, Fetcher, FetcherOptions, temp_with_extension};
use crate::uri::{RemoteParts, parse_remote, split_uri};

pub const S3_SCHEMES: &[&str] = &["s3", "s3n", "s3a"];

const OPEN_RETRIES: u32 = 3;
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Fetcher for S3-compatible object stores.
pub struct S3Fetcher {
    endpoint_url: Option<String>,
    session_token: Option<String>,
    /// Batched listings keyed by directory URI, one entry per `listdir`.
    mtimes: HashMap<String, HashMap<String, Option<i64>>>,
}

impl S3Fetcher {
    pub fn new(options: &FetcherOptions) -> Self {
        Self {
            endpoint_url: options.endpoint_url.clone(),
            session_token: options.session_token.clone(),
            mtimes: HashMap::new(),
        }
    }

    fn region(&self) -> Region {
        let ambient = env::var("AWS_REGION").ok();
        match &self.endpoint_url {
            // custom endpoints (minio and friends) want path-style addressing
            Some(endpoint) => Region::Custom {
                region: ambient.unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            },
            None => ambient
                .and_then(|r| r.parse::<Region>().ok())
                .unwrap_or(Region::UsEast1),
        }
    }

    fn bucket(&self, parts: &RemoteParts) -> Result<Box<Bucket>, FetchError> {
        let credentials = Credentials::new(
            parts.username.as_deref(),
            parts.password.as_deref(),
            None,
            self.session_token.as_deref(),
            None,
        )
        .map_err(|err| FetchError::transport(&parts.host, err))?;
        let bucket = Bucket::new(&parts.host, self.region(), credentials)
            .map_err(|err| FetchError::transport(&parts.host, err))?;
        Ok(if self.endpoint_url.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    fn try_open(&self, uri: &str) -> Result<FetchedFile, FetchError> {
        let parts = parse_remote(uri)?;
        let bucket = self.bucket(&parts)?;
        let response = bucket
            .get_object(object_key(&parts.path))
            .map_err(|err| classify_s3(uri, err))?;
        let mut temp = temp_with_extension(uri)?;
        temp.as_file_mut().write_all(response.bytes())?;
        Ok(FetchedFile::from_temp(temp)?)
    }

    /// Names and mtimes of the direct children of `dirpath`, fetched in one
    /// listing and memoized on the fetcher.
    fn dir_mtimes(
        &mut self,
        dirpath: &str,
    ) -> Result<&HashMap<String, Option<i64>>, FetchError> {
        if !self.mtimes.contains_key(dirpath) {
            let parts = parse_remote(dirpath)?;
            let bucket = self.bucket(&parts)?;
            let prefix = listing_prefix(&parts.path);
            let pages = bucket
                .list(prefix.clone(), Some("/".to_string()))
                .map_err(|err| classify_s3(dirpath, err))?;

            let mut mtimes = HashMap::new();
            for page in pages {
                for object in page.contents {
                    let Some(name) = child_name(&object.key, &prefix) else {
                        continue;
                    };
                    let mtime = DateTime::parse_from_rfc3339(&object.last_modified)
                        .ok()
                        .map(|dt| dt.timestamp());
                    mtimes.insert(name.to_string(), mtime);
                }
            }
            self.mtimes.insert(dirpath.to_string(), mtimes);
        }
        Ok(&self.mtimes[dirpath])
    }
}

impl Fetcher for S3Fetcher {
    fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError> {
        let mut attempt = 0;
        loop {
            match self.try_open(uri) {
                Ok(file) => return Ok(file),
                Err(err) => {
                    // a stale listing may claim an object that is gone, or
                    // miss one that just landed; drop it before retrying
                    self.mtimes.clear();
                    attempt += 1;
                    if attempt >= OPEN_RETRIES {
                        return Err(err);
                    }
                    debug!("retrying {uri} after {err}");
                    thread::sleep(SETTLE_DELAY);
                }
            }
        }
    }

    fn listdir(&mut self, dirpath: &str) -> Result<Vec<String>, FetchError> {
        Ok(self.dir_mtimes(dirpath)?.keys().cloned().collect())
    }

    fn mtime(&mut self, uri: &str) -> Result<Option<i64>, FetchError> {
        let (dirpath, name) = split_uri(uri);
        if let Some(batch) = self.mtimes.get(dirpath) {
            return Ok(batch.get(name).copied().flatten());
        }
        let parts = parse_remote(uri)?;
        let bucket = self.bucket(&parts)?;
        match bucket.head_object(object_key(&parts.path)) {
            Ok((head, code)) if code < 300 => Ok(head
                .last_modified
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
                .map(|dt| dt.timestamp())),
            Ok(_) => Ok(None),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(err) => Err(FetchError::transport(uri, err)),
        }
    }
}

/// Object key for a URI path, without the leading `/`.
fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Listing prefix for a directory path: the object key with a trailing `/`,
/// or empty at the bucket root.
fn listing_prefix(path: &str) -> String {
    let key = object_key(path);
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

/// Direct-child name of an object under `prefix`, or `None` for the prefix
/// itself and for entries nested one level deeper.
fn child_name<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let name = key.strip_prefix(prefix)?;
    if name.is_empty() || name.contains('/') {
        None
    } else {
        Some(name)
    }
}

fn classify_s3(target: &str, err: S3Error) -> FetchError {
    match err {
        S3Error::HttpFailWithBody(404, _) => FetchError::NotFound(target.to_string()),
        other => FetchError::transport(target, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_trims_leading_slash() {
        assert_eq!(object_key("/dir/a.csv"), "dir/a.csv");
        assert_eq!(object_key(""), "");
    }

    #[test]
    fn test_listing_prefix() {
        assert_eq!(listing_prefix("/dir"), "dir/");
        assert_eq!(listing_prefix("/"), "");
        assert_eq!(listing_prefix(""), "");
    }

    #[test]
    fn test_child_name_skips_nested_entries() {
        assert_eq!(child_name("dir/a.csv", "dir/"), Some("a.csv"));
        assert_eq!(child_name("dir/", "dir/"), None);
        assert_eq!(child_name("dir/sub/b.csv", "dir/"), None);
        assert_eq!(child_name("other/a.csv", "dir/"), None);
    }

    #[test]
    fn test_uri_credentials_reach_the_bucket() {
        let parts = parse_remote("s3://AKIA123:se%2Fcret@my-bucket/dir/a.csv").unwrap();
        assert_eq!(parts.host, "my-bucket");
        assert_eq!(parts.username.as_deref(), Some("AKIA123"));
        assert_eq!(parts.password.as_deref(), Some("se/cret"));
        assert_eq!(object_key(&parts.path), "dir/a.csv");
    }
}
