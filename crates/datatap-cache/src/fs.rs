//! Filesystem cache backend.
//!
//! Layout: one JSON payload file per key plus a single `index.json` holding
//! every key's freshness metadata. The index is written before the payload
//! so a torn write can be detected; if the payload write then fails, the
//! fresh index row is rolled back. Writes go through a temp file in the
//! cache directory and are persisted with an atomic rename.

use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{CacheBackend, CacheError, should_invalidate};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    mtime: Option<i64>,
    created_at: DateTime<Utc>,
}

type Index = HashMap<String, IndexEntry>;

/// Cache backend persisting values as JSON files under a directory.
#[derive(Debug)]
pub struct FsCache<T> {
    cache_dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FsCache<T> {
    /// Open a cache rooted at `cache_dir`, creating the directory if needed.
    pub fn new(cache_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            _marker: PhantomData,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Load the index. A missing index means an empty cache; an unreadable
    /// or corrupt one is discarded and recreated empty rather than poisoning
    /// every subsequent call.
    fn read_index(&self) -> Result<Index, CacheError> {
        let raw = match std::fs::read_to_string(self.index_path()) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Index::new()),
            Err(err) => {
                debug!("discarding unreadable cache index: {err}");
                return self.recreate_index();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(index) => Ok(index),
            Err(err) => {
                debug!("discarding corrupt cache index: {err}");
                self.recreate_index()
            }
        }
    }

    fn recreate_index(&self) -> Result<Index, CacheError> {
        let index = Index::new();
        self.write_index(&index)?;
        Ok(index)
    }

    fn write_index(&self, index: &Index) -> Result<(), CacheError> {
        let temp = NamedTempFile::new_in(&self.cache_dir)?;
        serde_json::to_writer(&temp, index)?;
        temp.persist(self.index_path())?;
        Ok(())
    }

    fn remove_payload(&self, key: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.payload_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Drop every entry and reset the index.
    pub fn clear(&self) -> Result<(), CacheError> {
        let index = self.read_index()?;
        for key in index.keys() {
            self.remove_payload(key)?;
        }
        self.write_index(&Index::new())
    }
}

impl<T: Serialize + DeserializeOwned> CacheBackend<T> for FsCache<T> {
    fn get(
        &self,
        key: &str,
        mtime: Option<i64>,
        expire: Option<Duration>,
    ) -> Result<T, CacheError> {
        let index = self.read_index()?;
        let Some(row) = index.get(key) else {
            return Err(CacheError::Miss(key.to_string()));
        };
        if should_invalidate(mtime, row.mtime, expire, row.created_at) {
            self.delete(key)?;
            return Err(CacheError::Miss(key.to_string()));
        }
        let raw = match std::fs::read_to_string(self.payload_path(key)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // indexed but the payload is gone; drop the dangling row
                self.delete(key)?;
                return Err(CacheError::Miss(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn set(&self, key: &str, value: &T, mtime: Option<i64>) -> Result<(), CacheError> {
        let mut index = self.read_index()?;
        let now = Utc::now();
        index.insert(
            key.to_string(),
            IndexEntry {
                // an unsupplied mtime defaults to the storage time
                mtime: Some(mtime.unwrap_or_else(|| now.timestamp())),
                created_at: now,
            },
        );
        self.write_index(&index)?;

        let write_payload = || -> Result<(), CacheError> {
            let temp = NamedTempFile::new_in(&self.cache_dir)?;
            serde_json::to_writer(&temp, value)?;
            temp.persist(self.payload_path(key))?;
            Ok(())
        };
        if let Err(err) = write_payload() {
            // the index row was written first; take it back out
            if let Err(rollback_err) = self.delete(key) {
                debug!("rollback of cache key {key:?} failed: {rollback_err}");
            }
            return Err(err);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut index = self.read_index()?;
        if index.remove(key).is_some() {
            self.write_index(&index)?;
        }
        self.remove_payload(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache_in(dir: &Path) -> FsCache<Vec<String>> {
        FsCache::new(dir).unwrap()
    }

    fn rows() -> Vec<String> {
        vec!["a,1".to_string(), "b,2".to_string()]
    }

    #[test]
    fn test_round_trip_survives_reopen() {
        let dir = tempdir().unwrap();
        cache_in(dir.path()).set("k", &rows(), Some(10)).unwrap();

        let reopened = cache_in(dir.path());
        assert_eq!(reopened.get("k", Some(10), None).unwrap(), rows());
    }

    #[test]
    fn test_changed_mtime_evicts_entry_and_payload() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &rows(), Some(10)).unwrap();

        assert!(cache.get("k", Some(11), None).unwrap_err().is_miss());
        assert!(!cache.payload_path("k").exists());
        assert!(cache.get("k", Some(10), None).unwrap_err().is_miss());
    }

    #[test]
    fn test_corrupt_index_is_recreated_empty() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &rows(), None).unwrap();

        std::fs::write(cache.index_path(), "not json at all").unwrap();
        assert!(cache.get("k", None, None).unwrap_err().is_miss());
        // the rewritten index is parseable again
        cache.set("k2", &rows(), None).unwrap();
        assert_eq!(cache.get("k2", None, None).unwrap(), rows());
    }

    #[test]
    fn test_unreadable_index_is_recreated_empty() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &rows(), None).unwrap();

        // invalid UTF-8 makes the index read fail with an IO error rather
        // than a parse error
        std::fs::write(cache.index_path(), [0xff, 0xfe, 0x00]).unwrap();
        assert!(cache.get("k", None, None).unwrap_err().is_miss());
        cache.set("k2", &rows(), None).unwrap();
        assert_eq!(cache.get("k2", None, None).unwrap(), rows());
    }

    #[test]
    fn test_failed_payload_write_rolls_back_index() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        // a directory squatting on the payload path makes the rename fail
        std::fs::create_dir(cache.payload_path("k")).unwrap();

        assert!(cache.set("k", &rows(), Some(10)).is_err());
        let index = cache.read_index().unwrap();
        assert!(!index.contains_key("k"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("k", &rows(), None).unwrap();
        cache.delete("k").unwrap();
        cache.delete("k").unwrap();
        assert!(cache.get("k", None, None).unwrap_err().is_miss());
    }

    #[test]
    fn test_clear_empties_the_cache() {
        let dir = tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.set("a", &rows(), None).unwrap();
        cache.set("b", &rows(), None).unwrap();

        cache.clear().unwrap();
        assert!(cache.get("a", None, None).unwrap_err().is_miss());
        assert!(!cache.payload_path("b").exists());
    }
}
