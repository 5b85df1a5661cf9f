//! Cache types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached entry. Entries are append-only; a key is never rewritten with
/// different inputs because the key is derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Where the cached content lives in the backing store.
    pub storage_path: String,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            storage_path: storage_path.into(),
            created_at: Utc::now(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub store_failures: u64,
}
