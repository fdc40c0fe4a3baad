//! Local directory object store
//!
//! Objects live at `<root>/<bucket>/<key>`. Uploads are written to a temp
//! file under `<root>/<bucket>/.tmp` and renamed into place, so readers never
//! observe a partial object.

use crate::cache::key::CacheKey;
use crate::error::{DepcacheError, DepcacheResult};
use crate::storage::{ObjectInfo, ObjectStore, Presence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io;
use tracing::debug;
use walkdir::WalkDir;

const BACKEND: &str = "filesystem";
const TEMP_DIR: &str = ".tmp";

/// Object store backed by a local directory
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the file backing an object
    pub fn object_path(&self, key: &CacheKey) -> PathBuf {
        let mut path = self.root.join(&key.bucket);
        path.extend(key.path.split('/').filter(|s| !s.is_empty()));
        path
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn head(&self, key: &CacheKey) -> DepcacheResult<Presence> {
        let path = self.object_path(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Presence::Found),
            Ok(_) => Ok(Presence::NotFound),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Presence::NotFound),
            Err(e) => Err(DepcacheError::storage(BACKEND, "head", e.to_string())),
        }
    }

    async fn get(&self, key: &CacheKey, dest: &Path) -> DepcacheResult<u64> {
        let path = self.object_path(key);
        debug!("Fetching {} from {}", key, path.display());

        let mut src = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DepcacheError::CacheMiss {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(DepcacheError::storage(BACKEND, "get", e.to_string())),
        };
        let mut out = File::create(dest)
            .await
            .map_err(|e| DepcacheError::io(format!("creating {}", dest.display()), e))?;

        io::copy(&mut src, &mut out)
            .await
            .map_err(|e| DepcacheError::storage(BACKEND, "get", e.to_string()))
    }

    async fn put(&self, key: &CacheKey, source: &Path) -> DepcacheResult<u64> {
        let path = self.object_path(key);
        let parent = path
            .parent()
            .ok_or_else(|| DepcacheError::storage(BACKEND, "put", "object has no parent directory"))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;

        let temp_dir = self.root.join(&key.bucket).join(TEMP_DIR);
        fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;

        let temp_file = NamedTempFile::new_in(&temp_dir)
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;
        let dup_file = temp_file
            .reopen()
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;
        let mut dest = File::from_std(dup_file);

        let mut src = File::open(source)
            .await
            .map_err(|e| DepcacheError::io(format!("opening {}", source.display()), e))?;
        let bytes = io::copy(&mut src, &mut dest)
            .await
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;
        dest.sync_all()
            .await
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.to_string()))?;

        temp_file
            .persist(&path)
            .map_err(|e| DepcacheError::storage(BACKEND, "put", e.error.to_string()))?;

        debug!("Stored {} ({} bytes) at {}", key, bytes, path.display());
        Ok(bytes)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> DepcacheResult<Vec<ObjectInfo>> {
        let bucket_dir = self.root.join(bucket);
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !bucket_dir.is_dir() {
                return Ok(Vec::new());
            }

            let mut objects = Vec::new();
            let walker = WalkDir::new(&bucket_dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !(e.depth() == 1 && e.file_name() == TEMP_DIR));

            for entry in walker {
                let entry = entry.map_err(|e| DepcacheError::storage(BACKEND, "list", e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(&prefix) {
                    continue;
                }

                let meta = entry
                    .metadata()
                    .map_err(|e| DepcacheError::storage(BACKEND, "list", e.to_string()))?;
                objects.push(ObjectInfo {
                    key: CacheKey {
                        bucket: bucket.clone(),
                        path: key,
                    },
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }

            Ok(objects)
        })
        .await
        .map_err(|e| DepcacheError::Internal(format!("listing task failed: {}", e)))?
    }

    async fn delete(&self, key: &CacheKey) -> DepcacheResult<()> {
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DepcacheError::storage(BACKEND, "delete", e.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
