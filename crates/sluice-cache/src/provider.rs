//! Cache storage provider trait and implementations.

use crate::keys::sanitize_key;
use crate::types::CacheEntry;
use async_trait::async_trait;
use sluice_core::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Trait for cache storage backends.
///
/// Lookups are exact-match only. Concurrent stores for the same key may race;
/// the last write wins.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Look up an entry by exact key.
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Record an entry.
    async fn store(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete an entry.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List entries whose key starts with a prefix, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>>;
}

/// Filesystem-based cache provider: one JSON record per key.
pub struct FilesystemProvider {
    root_dir: PathBuf,
}

impl FilesystemProvider {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(format!("{}.json", sanitize_key(key)))
    }

    fn store_error(key: &str, err: impl std::fmt::Display) -> Error {
        Error::CacheStore {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    fn lookup_error(key: &str, err: impl std::fmt::Display) -> Error {
        Error::CacheLookup {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl CacheProvider for FilesystemProvider {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.key_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::lookup_error(key, e)),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| Self::lookup_error(key, e))?;
        if entry.key != key {
            // Two keys sanitized to the same filename.
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn store(&self, entry: &CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| Self::store_error(&entry.key, e))?;

        let path = self.key_path(&entry.key);
        let tmp = path.with_extension(format!("json.{}.tmp", tmp_suffix()));
        let json = serde_json::to_vec_pretty(entry).map_err(|e| Self::store_error(&entry.key, e))?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Self::store_error(&entry.key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::store_error(&entry.key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::store_error(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>> {
        if !self.root_dir.exists() {
            return Ok(vec![]);
        }

        let mut entries = vec![];
        let mut read_dir = tokio::fs::read_dir(&self.root_dir)
            .await
            .map_err(|e| Error::Internal(format!("Failed to read cache dir: {}", e)))?;

        while let Some(dir_entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("Failed to read entry: {}", e)))?
        {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes)
                && entry.key.starts_with(prefix)
            {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn tmp_suffix() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

/// In-process cache provider.
#[derive(Default)]
pub struct MemoryProvider {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheProvider for MemoryProvider {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, entry: &CacheEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.key.starts_with(prefix))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
