//! Object store key derivation
//!
//! Keys have the shape `{bucket}/{prefix}/{stack}/{cache_type}-{hash}.{ext}`.
//! The same (cache type, hash, compression) always yields the same key.

use crate::cache::lockfile::stack_for;
use crate::cache::settings::CacheSettings;
use crate::error::DepcacheResult;
use serde::Serialize;
use std::fmt;

/// Fully qualified location of one cache archive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey {
    /// Bucket holding the object
    pub bucket: String,
    /// Object key inside the bucket
    pub path: String,
}

impl CacheKey {
    /// Derive the key for a cache type and lockfile hash
    pub fn derive(
        settings: &CacheSettings,
        cache_type: &str,
        lockfile_hash: &str,
    ) -> DepcacheResult<Self> {
        let bucket = settings.require_bucket()?;
        Ok(Self {
            bucket: bucket.to_string(),
            path: format!(
                "{}{}.{}",
                namespace(&settings.prefix, cache_type),
                lockfile_hash,
                settings.extension()
            ),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// Key prefix shared by every archive of one cache type
pub fn namespace(prefix: &str, cache_type: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let stack = stack_for(cache_type);
    if prefix.is_empty() {
        format!("{}/{}-", stack, cache_type)
    } else {
        format!("{}/{}/{}-", prefix, stack, cache_type)
    }
}
