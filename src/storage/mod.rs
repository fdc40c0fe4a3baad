//! Object store backends for cache archives
//!
//! The cache manager only needs five operations from a store: existence
//! check, download to a file, upload from a file, listing under a prefix and
//! delete. Backends:
//! - S3 and S3-compatible services (MinIO, R2, Spaces) via `aws-sdk-s3`
//! - A local directory, selected with a `file://` endpoint

pub mod filesystem;
pub mod s3;

pub use filesystem::FilesystemStore;
pub use s3::S3Store;

use crate::cache::key::CacheKey;
use crate::cache::settings::CacheSettings;
use crate::error::{DepcacheError, DepcacheResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Endpoint scheme selecting the local directory backend
pub const FILE_SCHEME: &str = "file://";

/// Result of an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Found,
    NotFound,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: CacheKey,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Abstract object store interface
///
/// Implementations report a missing object on `get` as
/// [`DepcacheError::CacheMiss`]; every other failure is a
/// [`DepcacheError::Storage`] error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether an object exists
    async fn head(&self, key: &CacheKey) -> DepcacheResult<Presence>;

    /// Download an object into `dest`, returning the byte count
    async fn get(&self, key: &CacheKey, dest: &Path) -> DepcacheResult<u64>;

    /// Upload `source` as an object, returning the byte count
    async fn put(&self, key: &CacheKey, source: &Path) -> DepcacheResult<u64>;

    /// List objects whose key starts with `prefix`
    async fn list(&self, bucket: &str, prefix: &str) -> DepcacheResult<Vec<ObjectInfo>>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &CacheKey) -> DepcacheResult<()>;

    /// Human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

/// Create the object store selected by the cache settings
pub async fn create_store(settings: &CacheSettings) -> DepcacheResult<Arc<dyn ObjectStore>> {
    if let Some(root) = filesystem_root(settings.endpoint.as_deref()) {
        debug!("Using filesystem object store at {}", root.display());
        return Ok(Arc::new(FilesystemStore::new(root)));
    }

    let credentials = settings
        .credentials
        .as_ref()
        .ok_or(DepcacheError::CacheDisabled)?;
    Ok(Arc::new(S3Store::new(settings, credentials).await))
}

/// Local root directory for a `file://` endpoint
pub fn filesystem_root(endpoint: Option<&str>) -> Option<PathBuf> {
    endpoint
        .and_then(|e| e.strip_prefix(FILE_SCHEME))
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}
