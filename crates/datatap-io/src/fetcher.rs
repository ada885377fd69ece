//! Fetcher capability contract.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tempfile::{NamedTempFile, TempPath};

use crate::error::FetchError;
use crate::uri::extension_of;

/// Default timeout applied at connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend options supplied by the caller when a fetcher is constructed.
///
/// These are part of the identity of a request: two requests that differ in
/// any of these fields address distinct cache slots even when they resolve
/// to the same logical object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetcherOptions {
    /// Verify TLS certificates for HTTPS sources.
    pub verify_certs: bool,
    /// Endpoint override for S3-compatible object stores.
    pub endpoint_url: Option<String>,
    /// Session token forwarded to the object-store client.
    pub session_token: Option<String>,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            verify_certs: true,
            endpoint_url: None,
            session_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Backend-specific implementation of the `{open, listdir, mtime}` capability
/// set for one URI scheme family.
///
/// Fetchers are built per request by the [`Registry`](crate::Registry) and
/// dropped when the caller is done; they are never pooled. A fetcher may keep
/// a short-lived cache of directory listings and modification times.
pub trait Fetcher {
    /// Fetch the object into a readable, seekable local file.
    fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError>;

    /// List the immediate children of a directory (or protocol prefix).
    fn listdir(&mut self, dirpath: &str) -> Result<Vec<String>, FetchError>;

    /// Last-modification time in epoch seconds.
    ///
    /// Returns `Ok(None)` when the backend cannot answer; a missing value
    /// only weakens cache freshness checking and must never block a fetch.
    fn mtime(&mut self, uri: &str) -> Result<Option<i64>, FetchError>;
}

impl std::fmt::Debug for dyn Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fetcher")
    }
}

/// A readable, seekable local copy of a fetched object.
///
/// Remote fetchers stream into a temporary file suffixed with the object's
/// extension so downstream sniffing by extension keeps working; the file is
/// removed on drop. Local fetchers expose the real path instead.
#[derive(Debug)]
pub struct FetchedFile {
    file: File,
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl FetchedFile {
    /// Open a local file in place, without copying.
    pub fn from_path(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            file,
            path,
            _temp: None,
        })
    }

    /// Take ownership of a freshly written temporary file, rewound to the
    /// start. The backing file is deleted when the value is dropped.
    pub fn from_temp(temp: NamedTempFile) -> io::Result<Self> {
        let (mut file, temp_path) = temp.into_parts();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            path: temp_path.to_path_buf(),
            _temp: Some(temp_path),
        })
    }

    /// Local path of the fetched content, valid for the lifetime of `self`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FetchedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FetchedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Create a temporary file carrying the same extension as `uri`, so that
/// format detection on the local copy sees the original name's extension.
pub(crate) fn temp_with_extension(uri: &str) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    let suffix = extension_of(uri).map(|ext| format!(".{ext}"));
    if let Some(ref suffix) = suffix {
        builder.suffix(suffix.as_str());
    }
    builder.tempfile()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_fetched_file_from_temp_reads_from_start() {
        let mut temp = temp_with_extension("dir/data.csv").unwrap();
        temp.write_all(b"x,y\n1,2\n").unwrap();
        let mut fetched = FetchedFile::from_temp(temp).unwrap();

        assert_eq!(fetched.path().extension().unwrap(), "csv");
        let mut content = String::new();
        fetched.read_to_string(&mut content).unwrap();
        assert_eq!(content, "x,y\n1,2\n");
    }

    #[test]
    fn test_fetched_file_temp_removed_on_drop() {
        let temp = temp_with_extension("a.json").unwrap();
        let fetched = FetchedFile::from_temp(temp).unwrap();
        let path = fetched.path().to_path_buf();
        assert!(path.exists());
        drop(fetched);
        assert!(!path.exists());
    }
}
