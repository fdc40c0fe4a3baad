//! Resolved, immutable cache settings
//!
//! Built once from [`CacheConfig`]. All defaulting happens here so the
//! cache manager never consults the environment.

use crate::config::schema::{CacheConfig, DEFAULT_PREFIX, DEFAULT_REGION, MAX_TIMEOUT_SECS};
use crate::error::{DepcacheError, DepcacheResult};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Access key / secret key pair
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Cache settings consumed by [`CacheManager`](super::CacheManager)
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Master switch (config `enabled`, `--no-cache`)
    pub enabled: bool,
    pub bucket: Option<String>,
    /// Key prefix with surrounding slashes removed
    pub prefix: String,
    pub credentials: Option<StoreCredentials>,
    pub region: String,
    pub endpoint: Option<String>,
    pub compression: bool,
    /// Bound applied to every object store call
    pub timeout: Duration,
    pub temp_dir: Option<PathBuf>,
}

impl CacheSettings {
    /// Resolve settings from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let credentials = match (
            non_empty(&config.access_key_id),
            non_empty(&config.secret_access_key),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StoreCredentials {
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        let prefix = config.prefix.trim().trim_matches('/');
        let region = config.region.trim();

        Self {
            enabled: config.enabled,
            bucket: non_empty(&config.bucket),
            prefix: if prefix.is_empty() {
                DEFAULT_PREFIX.to_string()
            } else {
                prefix.to_string()
            },
            credentials,
            region: if region.is_empty() {
                DEFAULT_REGION.to_string()
            } else {
                region.to_string()
            },
            endpoint: non_empty(&config.endpoint),
            compression: config.compression,
            timeout: Duration::from_secs(config.timeout_secs.clamp(1, MAX_TIMEOUT_SECS)),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Caching is on only when a bucket and both credential halves are present
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.bucket.is_some() && self.credentials.is_some()
    }

    /// Archive file extension for the current compression setting
    pub fn extension(&self) -> &'static str {
        if self.compression {
            "tar.gz"
        } else {
            "tar"
        }
    }

    /// Bucket name, or an error if none is configured
    pub fn require_bucket(&self) -> DepcacheResult<&str> {
        self.bucket
            .as_deref()
            .ok_or(DepcacheError::BucketNotConfigured)
    }

    /// Create a uniquely named temp file for an archive.
    ///
    /// The file is removed when the returned handle is dropped.
    pub fn temp_archive(&self) -> DepcacheResult<NamedTempFile> {
        let dir = self.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        tempfile::Builder::new()
            .prefix("depcache-")
            .suffix(&format!(".{}", self.extension()))
            .tempfile_in(&dir)
            .map_err(|e| DepcacheError::io(format!("creating temp archive in {}", dir.display()), e))
    }
}
