//! Cache key derivation.
//!
//! Keys are content-addressed: a changed input always yields a new key and
//! recomputing from identical inputs always yields the identical key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One declared cache input: a path and the digest of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInput {
    pub path: String,
    pub content_hash: String,
}

impl CacheInput {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
        }
    }
}

/// Derives cache keys for one runner context.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyResolver {
    runner_context: String,
}

impl CacheKeyResolver {
    /// `runner_context` is opaque (e.g. `linux-x64-py3.12`) and never interpreted.
    pub fn new(runner_context: impl Into<String>) -> Self {
        Self {
            runner_context: runner_context.into(),
        }
    }

    pub fn runner_context(&self) -> &str {
        &self.runner_context
    }

    /// Resolve the key for a namespace and its ordered inputs.
    pub fn resolve(&self, namespace: &str, inputs: &[CacheInput]) -> String {
        let mut hasher = Sha256::new();
        update_framed(&mut hasher, namespace.as_bytes());
        update_framed(&mut hasher, self.runner_context.as_bytes());
        hasher.update((inputs.len() as u64).to_le_bytes());
        for input in inputs {
            update_framed(&mut hasher, input.path.as_bytes());
            update_framed(&mut hasher, input.content_hash.as_bytes());
        }
        format!("{}-{}", sanitize_key(namespace), hex::encode(hasher.finalize()))
    }
}

// Length-prefixed so that distinct field lists never hash the same bytes.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash declared input files relative to a workspace, preserving order.
pub async fn hash_inputs(workspace: &Path, paths: &[String]) -> std::io::Result<Vec<CacheInput>> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let contents = tokio::fs::read(workspace.join(path)).await?;
        inputs.push(CacheInput::new(path.clone(), hash_bytes(&contents)));
    }
    Ok(inputs)
}

/// Sanitize a key for use in filenames.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Vec<CacheInput> {
        vec![
            CacheInput::new("requirements.txt", hash_bytes(b"flask==3.0\n")),
            CacheInput::new("requirements-dev.txt", hash_bytes(b"pytest\n")),
        ]
    }

    #[test]
    fn test_resolve_is_pure() {
        let resolver = CacheKeyResolver::new("linux-x64");
        let a = resolver.resolve("pip", &inputs());
        let b = resolver.resolve("pip", &inputs());
        assert_eq!(a, b);
        assert!(a.starts_with("pip-"));
    }

    #[test]
    fn test_single_byte_change_changes_key() {
        let resolver = CacheKeyResolver::new("linux-x64");
        let base = resolver.resolve("pip", &inputs());

        let mut changed = inputs();
        changed[1].content_hash = hash_bytes(b"pytesT\n");
        assert_ne!(base, resolver.resolve("pip", &changed));
    }

    #[test]
    fn test_order_matters() {
        let resolver = CacheKeyResolver::new("linux-x64");
        let mut reversed = inputs();
        reversed.reverse();
        assert_ne!(
            resolver.resolve("pip", &inputs()),
            resolver.resolve("pip", &reversed)
        );
    }

    #[test]
    fn test_context_and_namespace_participate() {
        let a = CacheKeyResolver::new("linux-x64").resolve("pip", &inputs());
        let b = CacheKeyResolver::new("linux-arm64").resolve("pip", &inputs());
        let c = CacheKeyResolver::new("linux-x64").resolve("npm", &inputs());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_framing_prevents_concatenation_collisions() {
        let resolver = CacheKeyResolver::default();
        let split = vec![CacheInput::new("ab", "c")];
        let joined = vec![CacheInput::new("a", "bc")];
        assert_ne!(
            resolver.resolve("ns", &split),
            resolver.resolve("ns", &joined)
        );
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("my/cache/key"), "my_cache_key");
        assert_eq!(sanitize_key("cache:key"), "cache_key");
    }

    #[tokio::test]
    async fn test_hash_inputs_reads_workspace_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), b"lock").unwrap();

        let hashed = hash_inputs(dir.path(), &["Cargo.lock".to_string()])
            .await
            .unwrap();
        assert_eq!(hashed, vec![CacheInput::new("Cargo.lock", hash_bytes(b"lock"))]);

        let missing = hash_inputs(dir.path(), &["nope.lock".to_string()]).await;
        assert!(missing.is_err());
    }
}
