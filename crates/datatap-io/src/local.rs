//! Local filesystem fetcher.

use std::fs;
use std::io::ErrorKind;
use std::time::UNIX_EPOCH;

use crate::error::FetchError;
use crate::fetcher::{FetchedFile, Fetcher};

/// Fetcher for plain local paths (empty scheme). No retries, no failure
/// policy beyond propagating OS errors.
pub struct LocalFetcher;

impl Fetcher for LocalFetcher {
    fn open(&mut self, uri: &str) -> Result<FetchedFile, FetchError> {
        FetchedFile::from_path(uri).map_err(|err| match err.kind() {
            ErrorKind::NotFound => FetchError::NotFound(uri.to_string()),
            _ => FetchError::Io(err),
        })
    }

    fn listdir(&mut self, dirpath: &str) -> Result<Vec<String>, FetchError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dirpath)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn mtime(&mut self, uri: &str) -> Result<Option<i64>, FetchError> {
        let modified = fs::metadata(uri)?.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs() as i64))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn test_open_reads_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();

        let mut fetcher = LocalFetcher;
        let mut fetched = fetcher.open(path.to_str().unwrap()).unwrap();
        assert_eq!(fetched.path(), path);

        let mut content = String::new();
        fetched.read_to_string(&mut content).unwrap();
        assert_eq!(content, "a,b\n1,2\n");
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let mut fetcher = LocalFetcher;
        let err = fetcher.open("/nonexistent/nope.csv").unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[test]
    fn test_listdir_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "x").unwrap();
        fs::write(dir.path().join("b.csv"), "y").unwrap();

        let mut fetcher = LocalFetcher;
        let mut names = fetcher.listdir(dir.path().to_str().unwrap()).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.csv", "b.csv"]);

        let mtime = fetcher
            .mtime(dir.path().join("a.csv").to_str().unwrap())
            .unwrap();
        assert!(mtime.is_some_and(|m| m > 0));
    }
}
