//! Mtime and TTL aware value caching.
//!
//! A [`CacheBackend`] stores computed values under string keys together with
//! the modification time of the source they were computed from. On `get`,
//! the caller passes the source's current mtime and an optional TTL; a
//! stored entry whose mtime no longer matches, or whose TTL has elapsed, is
//! evicted and reported as a miss so the caller recomputes.
//!
//! Two backends are provided: [`MemoryCache`] for per-process use and
//! [`FsCache`] for persistence across runs.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

mod error;
mod fs;
mod key;
mod memory;

pub use error::CacheError;
pub use fs::FsCache;
pub use key::{cache_key, slugify};
pub use memory::MemoryCache;

/// A stored value plus the freshness metadata used to invalidate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Source modification time at the moment the value was stored.
    pub mtime: Option<i64>,
    /// When the value was stored; the TTL clock starts here.
    pub created_at: DateTime<Utc>,
}

/// Key-value store with mtime and TTL invalidation.
pub trait CacheBackend<T> {
    /// Fetch a live value.
    ///
    /// `mtime` is the source's current modification time, or `None` when the
    /// backend could not provide one. `expire` bounds the entry's age.
    /// A stale entry is evicted before [`CacheError::Miss`] is returned.
    fn get(&self, key: &str, mtime: Option<i64>, expire: Option<Duration>)
    -> Result<T, CacheError>;

    /// Store a value, stamping the current time as its creation time. An
    /// unsupplied `mtime` defaults to the storage time.
    fn set(&self, key: &str, value: &T, mtime: Option<i64>) -> Result<(), CacheError>;

    /// Drop a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Whether a stored entry must be discarded.
///
/// An entry goes stale when the source's known mtime no longer matches the
/// one stored with it, or when its age exceeds `expire`. An unknown current
/// mtime never invalidates on its own; an entry stored without a TTL never
/// expires by age.
pub fn should_invalidate(
    mtime: Option<i64>,
    cached_mtime: Option<i64>,
    expire: Option<Duration>,
    created_at: DateTime<Utc>,
) -> bool {
    should_invalidate_at(Utc::now(), mtime, cached_mtime, expire, created_at)
}

fn should_invalidate_at(
    now: DateTime<Utc>,
    mtime: Option<i64>,
    cached_mtime: Option<i64>,
    expire: Option<Duration>,
    created_at: DateTime<Utc>,
) -> bool {
    if let Some(mtime) = mtime
        && Some(mtime) != cached_mtime
    {
        return true;
    }
    if let Some(expire) = expire {
        let ttl = TimeDelta::from_std(expire).unwrap_or(TimeDelta::MAX);
        // strict: an entry is still live at exactly created_at + expire
        return match created_at.checked_add_signed(ttl) {
            Some(deadline) => now > deadline,
            None => false,
        };
    }
    false
}
