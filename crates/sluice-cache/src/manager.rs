//! Non-fatal cache access for the scheduler.
//!
//! Every failure here degrades to "no cache for this key": lookups that error
//! are misses, stores that error are logged and dropped.

use crate::keys::{CacheKeyResolver, hash_inputs};
use crate::provider::CacheProvider;
use crate::types::{CacheEntry, CacheStats};
use sluice_core::config::CacheSpec;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Clone)]
pub struct CacheManager {
    provider: Arc<dyn CacheProvider>,
    resolver: CacheKeyResolver,
    counters: Arc<Counters>,
}

impl CacheManager {
    pub fn new(provider: Arc<dyn CacheProvider>, resolver: CacheKeyResolver) -> Self {
        Self {
            provider,
            resolver,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn resolver(&self) -> &CacheKeyResolver {
        &self.resolver
    }

    /// Compute the key for a job's cache spec.
    ///
    /// Returns `None` when a declared input cannot be read.
    pub async fn key_for(&self, workspace: &Path, spec: &CacheSpec) -> Option<String> {
        match hash_inputs(workspace, &spec.inputs).await {
            Ok(inputs) => Some(self.resolver.resolve(&spec.namespace, &inputs)),
            Err(e) => {
                warn!(namespace = %spec.namespace, error = %e, "Cache inputs unreadable, caching disabled for job");
                None
            }
        }
    }

    /// Exact-match lookup. Provider errors count as a miss.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.provider.lookup(key).await {
            Ok(Some(entry)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = %key, "Cache hit");
                Some(entry)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(cache_key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store an entry in the background. The caller never waits on or
    /// observes the outcome; the handle exists for tests and shutdown.
    pub fn store_detached(&self, entry: CacheEntry) -> JoinHandle<()> {
        let provider = self.provider.clone();
        let counters = self.counters.clone();
        tokio::spawn(async move {
            match provider.store(&entry).await {
                Ok(()) => {
                    counters.stores.fetch_add(1, Ordering::Relaxed);
                    debug!(cache_key = %entry.key, "Cache entry stored");
                }
                Err(e) => {
                    counters.store_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(cache_key = %entry.key, error = %e, "Cache store failed, entry dropped");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            store_failures: self.counters.store_failures.load(Ordering::Relaxed),
        }
    }
}
