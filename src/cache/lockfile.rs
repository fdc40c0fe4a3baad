//! Lockfile hashing for content-addressed caching
//!
//! Hashes package manager lockfiles and maps cache types onto storage
//! namespaces. Same lockfile bytes = same cache entry.

use crate::error::{DepcacheError, DepcacheResult};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Number of hex characters of the digest used in object keys (64 bits)
pub const SHORT_HASH_LEN: usize = 16;

/// Storage namespace ("stack") for a cache type.
///
/// Unknown cache types use the type itself as the namespace.
pub fn stack_for(cache_type: &str) -> &str {
    match cache_type {
        "bundle" => "ruby",
        "npm" => "node",
        "pip" => "python",
        "cargo" => "rust",
        "gomod" => "go",
        other => other,
    }
}

/// SHA-256 digest of a lockfile's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockfileDigest {
    hex: String,
}

impl LockfileDigest {
    /// Hash the lockfile at `path`.
    ///
    /// Only the file contents contribute; path and mtime do not.
    pub async fn compute(path: &Path) -> DepcacheResult<Self> {
        let contents = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => DepcacheError::LockfileNotFound(path.to_path_buf()),
            _ => DepcacheError::io(format!("reading lockfile {}", path.display()), e),
        })?;

        let digest = Self::from_bytes(&contents);
        debug!("Hashed {} ({} bytes): {}", path.display(), contents.len(), digest.short());
        Ok(digest)
    }

    /// Hash raw lockfile bytes
    pub fn from_bytes(contents: &[u8]) -> Self {
        let digest = Sha256::digest(contents);
        Self {
            hex: hex::encode(digest),
        }
    }

    /// Truncated hash used in object keys
    pub fn short(&self) -> &str {
        &self.hex[..SHORT_HASH_LEN]
    }

    /// Full 64-character hash, stored in markers
    pub fn full(&self) -> &str {
        &self.hex
    }
}

/// Hash a lockfile, returning the 16-character key hash
pub async fn hash_lockfile(path: &Path) -> DepcacheResult<String> {
    LockfileDigest::compute(path)
        .await
        .map(|d| d.short().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn stack_mapping() {
        assert_eq!(stack_for("bundle"), "ruby");
        assert_eq!(stack_for("npm"), "node");
        assert_eq!(stack_for("pip"), "python");
        assert_eq!(stack_for("cargo"), "rust");
        assert_eq!(stack_for("gomod"), "go");
        assert_eq!(stack_for("composer"), "composer");
    }

    #[tokio::test]
    async fn hash_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.lock");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"test content").unwrap();

        let hash1 = hash_lockfile(&path).await.unwrap();
        let hash2 = hash_lockfile(&path).await.unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 16);
        assert!(hash1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn hash_ignores_path() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("Gemfile.lock");
        let b = dir.path().join("nested-copy.lock");
        fs::write(&a, b"gems: sinatra 3.0").unwrap();
        fs::write(&b, b"gems: sinatra 3.0").unwrap();

        assert_eq!(hash_lockfile(&a).await.unwrap(), hash_lockfile(&b).await.unwrap());
    }

    #[tokio::test]
    async fn hash_different_content() {
        let dir = TempDir::new().unwrap();

        let path1 = dir.path().join("test1.lock");
        fs::write(&path1, b"gems: sinatra 3.0").unwrap();

        let path2 = dir.path().join("test2.lock");
        fs::write(&path2, b"gems: sinatra 3.0\n").unwrap();

        assert_ne!(
            hash_lockfile(&path1).await.unwrap(),
            hash_lockfile(&path2).await.unwrap()
        );
    }

    #[test]
    fn single_byte_changes_spread() {
        let base = b"dependencies: left-pad 1.3.0".to_vec();
        let reference = LockfileDigest::from_bytes(&base);
        for i in 0..base.len() {
            let mut mutated = base.clone();
            mutated[i] ^= 0x01;
            assert_ne!(LockfileDigest::from_bytes(&mutated).short(), reference.short());
        }
    }

    #[test]
    fn full_hash_extends_short_hash() {
        let digest = LockfileDigest::from_bytes(b"abc");
        assert_eq!(digest.full().len(), 64);
        assert!(digest.full().starts_with(digest.short()));
        assert_eq!(
            digest.full(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn missing_lockfile() {
        let dir = TempDir::new().unwrap();
        let err = hash_lockfile(&dir.path().join("Gemfile.lock")).await.unwrap_err();
        assert!(matches!(err, DepcacheError::LockfileNotFound(_)));
    }

    #[tokio::test]
    async fn unreadable_lockfile_is_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Gemfile.lock");
        fs::create_dir_all(&path).unwrap();

        let err = LockfileDigest::compute(&path).await.unwrap_err();
        assert!(matches!(err, DepcacheError::Io { .. }));
    }
}
