//! In-memory cache backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::{CacheBackend, CacheEntry, CacheError, should_invalidate};

/// Per-process cache backend; entries do not survive the process.
#[derive(Debug, Default)]
pub struct MemoryCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl<T: Clone> CacheBackend<T> for MemoryCache<T> {
    fn get(
        &self,
        key: &str,
        mtime: Option<i64>,
        expire: Option<Duration>,
    ) -> Result<T, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let stale = match entries.get(key) {
            Some(entry) => should_invalidate(mtime, entry.mtime, expire, entry.created_at),
            None => return Err(CacheError::Miss(key.to_string())),
        };
        if stale {
            entries.remove(key);
            return Err(CacheError::Miss(key.to_string()));
        }
        Ok(entries[key].value.clone())
    }

    fn set(&self, key: &str, value: &T, mtime: Option<i64>) -> Result<(), CacheError> {
        let now = Utc::now();
        let entry = CacheEntry {
            value: value.clone(),
            // an unsupplied mtime defaults to the storage time
            mtime: Some(mtime.unwrap_or_else(|| now.timestamp())),
            created_at: now,
        };
        self.entries.lock().unwrap().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", &42, Some(10)).unwrap();
        assert_eq!(cache.get("k", Some(10), None).unwrap(), 42);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_absent_key_is_a_miss() {
        let cache: MemoryCache<i32> = MemoryCache::new();
        let err = cache.get("k", None, None).unwrap_err();
        assert!(err.is_miss());
    }

    #[test]
    fn test_changed_mtime_evicts() {
        let cache = MemoryCache::new();
        cache.set("k", &42, Some(10)).unwrap();
        assert!(cache.get("k", Some(11), None).unwrap_err().is_miss());
        // the stale entry is gone even for a subsequent matching lookup
        assert!(cache.get("k", Some(10), None).unwrap_err().is_miss());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = MemoryCache::new();
        cache.set("k", &42, Some(10)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let err = cache
            .get("k", Some(10), Some(Duration::ZERO))
            .unwrap_err();
        assert!(err.is_miss());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let cache = MemoryCache::new();
        cache.set("k", &42, None).unwrap();
        cache.delete("k").unwrap();
        cache.delete("k").unwrap();
        assert!(cache.is_empty());
    }
}
