//! Content-addressed job cache for Sluice.

pub mod keys;
pub mod manager;
pub mod provider;
pub mod types;

pub use keys::{CacheInput, CacheKeyResolver, hash_bytes, hash_inputs, sanitize_key};
pub use manager::CacheManager;
pub use provider::{CacheProvider, FilesystemProvider, MemoryProvider};
pub use types::{CacheEntry, CacheStats};
