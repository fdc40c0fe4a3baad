//! Cache manager: restore, save and prune dependency archives
//!
//! The manager holds nothing but immutable settings and a store handle, so it
//! is cheap to clone into background tasks.

use crate::cache::archive::{self, ArchiveStats};
use crate::cache::key::{self, CacheKey};
use crate::cache::lockfile::{hash_lockfile, LockfileDigest};
use crate::cache::marker::Marker;
use crate::cache::settings::CacheSettings;
use crate::error::{DepcacheError, DepcacheResult};
use crate::storage::{self, ObjectStore, Presence};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Concurrent deletes issued by `prune`
const PRUNE_CONCURRENCY: usize = 8;

/// A successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreHit {
    pub key: CacheKey,
    /// Archive size as downloaded
    pub bytes: u64,
    /// Entries extracted into the target
    pub entries: usize,
}

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new archive was uploaded
    Uploaded { key: CacheKey, bytes: u64 },
    /// The key already existed; nothing was uploaded
    AlreadyCached { key: CacheKey },
}

impl SaveOutcome {
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::Uploaded { key, .. } | Self::AlreadyCached { key } => key,
        }
    }
}

/// Result of a prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Objects listed under the cache type's namespace
    pub examined: usize,
    /// Objects older than the cutoff that were deleted
    pub deleted: usize,
    /// Objects older than the cutoff whose delete failed
    pub failed: usize,
    /// Bytes held by deleted objects
    pub bytes_freed: u64,
}

/// Lockfile-keyed dependency cache over an object store
#[derive(Clone)]
pub struct CacheManager {
    settings: Arc<CacheSettings>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl CacheManager {
    /// Create a manager over an explicit store
    pub fn new(settings: CacheSettings, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
        }
    }

    /// Create a manager, building the configured store only when caching is
    /// enabled
    pub async fn from_settings(settings: CacheSettings) -> DepcacheResult<Self> {
        let store = if settings.is_enabled() {
            Some(storage::create_store(&settings).await?)
        } else {
            debug!("Dependency cache disabled, no object store created");
            None
        };
        Ok(Self::new(settings, store))
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Whether caching is configured. Never touches the network.
    pub fn is_enabled(&self) -> bool {
        self.settings.is_enabled() && self.store.is_some()
    }

    /// Name of the active backend, if any
    pub fn backend_name(&self) -> Option<&'static str> {
        self.store
            .as_ref()
            .filter(|_| self.settings.is_enabled())
            .map(|s| s.backend_name())
    }

    /// 16-character content hash of a lockfile
    pub async fn hash(&self, lockfile: &Path) -> DepcacheResult<String> {
        hash_lockfile(lockfile).await
    }

    /// Object key for a cache type and lockfile hash
    pub fn key(&self, cache_type: &str, lockfile_hash: &str) -> DepcacheResult<CacheKey> {
        CacheKey::derive(&self.settings, cache_type, lockfile_hash)
    }

    /// Whether an archive exists for `key`
    pub async fn exists(&self, key: &CacheKey) -> DepcacheResult<bool> {
        let store = self.store()?;
        let presence = self.timed("head", store.head(key)).await?;
        Ok(presence == Presence::Found)
    }

    /// Restore into `target`, writing the conventional marker on success
    pub async fn restore(
        &self,
        cache_type: &str,
        lockfile: &Path,
        target: &Path,
    ) -> DepcacheResult<RestoreHit> {
        self.restore_with_marker(cache_type, lockfile, target, &Marker::in_dir(target))
            .await
    }

    /// Restore into `target`, recording the lockfile hash in `marker`.
    ///
    /// A miss leaves `target` untouched.
    pub async fn restore_with_marker(
        &self,
        cache_type: &str,
        lockfile: &Path,
        target: &Path,
        marker: &Marker,
    ) -> DepcacheResult<RestoreHit> {
        let store = self.store()?;
        let digest = LockfileDigest::compute(lockfile).await?;
        let key = self.key(cache_type, digest.short())?;

        if !self.exists(&key).await? {
            info!("Cache miss for {} ({})", cache_type, key);
            return Err(DepcacheError::CacheMiss {
                key: key.to_string(),
            });
        }

        let started = Instant::now();
        let restore_failed = |e: DepcacheError| DepcacheError::RestoreFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| DepcacheError::io(format!("creating {}", target.display()), e))?;
        let temp = self.settings.temp_archive().map_err(restore_failed)?;
        let temp_path = temp.path().to_path_buf();
        debug!("Downloading {} to {}", key, temp_path.display());

        let bytes = match self.timed("get", store.get(&key, &temp_path)).await {
            Ok(bytes) => bytes,
            // Deleted between the existence check and the download
            Err(e) if e.is_cache_miss() => return Err(e),
            Err(e) => return Err(restore_failed(e)),
        };

        let entries = unpack_blocking(temp_path, target.to_path_buf())
            .await
            .map_err(restore_failed)?;
        drop(temp);

        marker.write(digest.full()).await?;

        info!(
            "Restored {} from cache ({} bytes, {} entries, {:.1}s)",
            cache_type,
            bytes,
            entries,
            started.elapsed().as_secs_f64()
        );
        Ok(RestoreHit {
            key,
            bytes,
            entries,
        })
    }

    /// Archive `source` and upload it unless the key already exists
    pub async fn save(
        &self,
        cache_type: &str,
        lockfile: &Path,
        source: &Path,
    ) -> DepcacheResult<SaveOutcome> {
        let store = self.store()?;
        let digest = LockfileDigest::compute(lockfile).await?;
        if !dir_has_entries(source).await {
            return Err(DepcacheError::SourceEmpty(source.to_path_buf()));
        }
        let key = self.key(cache_type, digest.short())?;

        if self.exists(&key).await? {
            debug!("{} already cached, skipping upload", key);
            return Ok(SaveOutcome::AlreadyCached { key });
        }

        let started = Instant::now();
        let save_failed = |e: DepcacheError| DepcacheError::SaveFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let temp = self.settings.temp_archive().map_err(save_failed)?;
        let temp_path = temp.path().to_path_buf();
        let stats = pack_blocking(
            source.to_path_buf(),
            temp_path.clone(),
            self.settings.compression,
        )
        .await
        .map_err(save_failed)?;
        debug!(
            "Archived {} entries ({} bytes) from {}",
            stats.entries,
            stats.bytes,
            source.display()
        );

        let bytes = self
            .timed("put", store.put(&key, &temp_path))
            .await
            .map_err(save_failed)?;
        drop(temp);

        info!(
            "Saved {} to cache as {} ({} bytes, {:.1}s)",
            cache_type,
            key,
            bytes,
            started.elapsed().as_secs_f64()
        );
        Ok(SaveOutcome::Uploaded { key, bytes })
    }

    /// Delete archives of `cache_type` last modified more than `days_to_keep`
    /// days ago. Individual delete failures are counted, not returned.
    pub async fn prune(&self, cache_type: &str, days_to_keep: u32) -> DepcacheResult<PruneReport> {
        let store = self.store()?;
        let bucket = self.settings.require_bucket()?;
        let namespace = key::namespace(&self.settings.prefix, cache_type);
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));

        let objects = self.timed("list", store.list(bucket, &namespace)).await?;
        let mut report = PruneReport {
            examined: objects.len(),
            ..PruneReport::default()
        };

        let expired: Vec<_> = objects
            .into_iter()
            .filter(|o| o.last_modified.is_some_and(|t| t < cutoff))
            .collect();
        debug!(
            "{} of {} objects under {} are older than {}",
            expired.len(),
            report.examined,
            namespace,
            cutoff
        );

        let results: Vec<_> = stream::iter(expired)
            .map(|object| async move {
                let result = self.timed("delete", store.delete(&object.key)).await;
                (object, result)
            })
            .buffer_unordered(PRUNE_CONCURRENCY)
            .collect()
            .await;

        for (object, result) in results {
            match result {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_freed += object.size;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", object.key, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Pruned {} cache: {} examined, {} deleted, {} failed",
            cache_type, report.examined, report.deleted, report.failed
        );
        Ok(report)
    }

    fn store(&self) -> DepcacheResult<&Arc<dyn ObjectStore>> {
        match &self.store {
            Some(store) if self.settings.is_enabled() => Ok(store),
            _ => Err(DepcacheError::CacheDisabled),
        }
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> DepcacheResult<T>
    where
        F: Future<Output = DepcacheResult<T>>,
    {
        match tokio::time::timeout(self.settings.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DepcacheError::StorageTimeout {
                operation,
                secs: self.settings.timeout.as_secs(),
            }),
        }
    }
}

async fn dir_has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

async fn pack_blocking(
    source: PathBuf,
    dest: PathBuf,
    compress: bool,
) -> DepcacheResult<ArchiveStats> {
    tokio::task::spawn_blocking(move || archive::pack_dir(&source, &dest, compress))
        .await
        .map_err(|e| DepcacheError::Internal(format!("archive task failed: {}", e)))?
}

async fn unpack_blocking(archive_path: PathBuf, target: PathBuf) -> DepcacheResult<usize> {
    tokio::task::spawn_blocking(move || archive::unpack_into(&archive_path, &target))
        .await
        .map_err(|e| DepcacheError::Internal(format!("extract task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::{FilesystemStore, ObjectInfo};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Filesystem store that counts every call
    #[derive(Default)]
    struct Calls {
        head: AtomicUsize,
        get: AtomicUsize,
        put: AtomicUsize,
        list: AtomicUsize,
        delete: AtomicUsize,
    }

    impl Calls {
        fn total(&self) -> usize {
            self.head.load(Ordering::SeqCst)
                + self.get.load(Ordering::SeqCst)
                + self.put.load(Ordering::SeqCst)
                + self.list.load(Ordering::SeqCst)
                + self.delete.load(Ordering::SeqCst)
        }
    }

    struct CountingStore {
        inner: FilesystemStore,
        calls: Arc<Calls>,
        head_delay: Option<Duration>,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn head(&self, key: &CacheKey) -> DepcacheResult<Presence> {
            self.calls.head.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.head_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.head(key).await
        }

        async fn get(&self, key: &CacheKey, dest: &Path) -> DepcacheResult<u64> {
            self.calls.get.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key, dest).await
        }

        async fn put(&self, key: &CacheKey, source: &Path) -> DepcacheResult<u64> {
            self.calls.put.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, source).await
        }

        async fn list(&self, bucket: &str, prefix: &str) -> DepcacheResult<Vec<ObjectInfo>> {
            self.calls.list.fetch_add(1, Ordering::SeqCst);
            self.inner.list(bucket, prefix).await
        }

        async fn delete(&self, key: &CacheKey) -> DepcacheResult<()> {
            self.calls.delete.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(key).await
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }

    struct Fixture {
        temp: TempDir,
        manager: CacheManager,
        calls: Arc<Calls>,
        store: FilesystemStore,
    }

    fn cache_config(temp: &TempDir) -> CacheConfig {
        CacheConfig {
            bucket: Some("deps".to_string()),
            access_key_id: Some("AKIAEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            endpoint: Some(format!("file://{}", temp.path().join("store").display())),
            temp_dir: Some(temp.path().to_path_buf()),
            ..CacheConfig::default()
        }
    }

    fn fixture_with(config: impl FnOnce(&mut CacheConfig), head_delay: Option<Duration>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut cfg = cache_config(&temp);
        config(&mut cfg);

        let store = FilesystemStore::new(temp.path().join("store"));
        let calls = Arc::new(Calls::default());
        let counting = CountingStore {
            inner: store.clone(),
            calls: calls.clone(),
            head_delay,
        };
        let manager = CacheManager::new(CacheSettings::from_config(&cfg), Some(Arc::new(counting)));

        Fixture {
            temp,
            manager,
            calls,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {}, None)
    }

    impl Fixture {
        fn lockfile(&self, contents: &[u8]) -> PathBuf {
            let path = self.temp.path().join("project/Gemfile.lock");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }

        fn gem_tree(&self) -> PathBuf {
            let source = self.temp.path().join("project/vendor/bundle");
            fs::create_dir_all(source.join("gems")).unwrap();
            fs::write(source.join("gems/test.gem"), b"test gem contents").unwrap();
            source
        }
    }

    #[tokio::test]
    async fn save_then_restore_reproduces_tree() {
        let fx = fixture();
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let source = fx.gem_tree();

        let outcome = fx.manager.save("bundle", &lockfile, &source).await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Uploaded { .. }));
        assert!(outcome.key().path.starts_with("depcache/ruby/bundle-"));
        assert!(outcome.key().path.ends_with(".tar.gz"));

        let target = fx.temp.path().join("fresh/vendor/bundle");
        let hit = fx.manager.restore("bundle", &lockfile, &target).await.unwrap();

        assert_eq!(&hit.key, outcome.key());
        assert_eq!(
            fs::read(target.join("gems/test.gem")).unwrap(),
            b"test gem contents"
        );
        let digest = LockfileDigest::compute(&lockfile).await.unwrap();
        assert!(Marker::in_dir(&target).matches(digest.full()).await);
    }

    #[tokio::test]
    async fn saving_twice_uploads_once() {
        let fx = fixture();
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let source = fx.gem_tree();

        let first = fx.manager.save("bundle", &lockfile, &source).await.unwrap();
        let second = fx.manager.save("bundle", &lockfile, &source).await.unwrap();

        assert!(matches!(first, SaveOutcome::Uploaded { .. }));
        assert_eq!(
            second,
            SaveOutcome::AlreadyCached {
                key: first.key().clone()
            }
        );
        assert_eq!(fx.calls.put.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restore_unsaved_is_miss_and_leaves_target_absent() {
        let fx = fixture();
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let target = fx.temp.path().join("fresh/vendor/bundle");

        let err = fx.manager.restore("bundle", &lockfile, &target).await.unwrap_err();

        assert!(err.is_cache_miss());
        assert!(!target.exists());
        assert_eq!(fx.calls.get.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn changed_lockfile_misses() {
        let fx = fixture();
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let source = fx.gem_tree();
        fx.manager.save("bundle", &lockfile, &source).await.unwrap();
        let original = fx.manager.hash(&lockfile).await.unwrap();

        fs::write(&lockfile, b"gems: sinatra 3.0!").unwrap();
        assert_ne!(fx.manager.hash(&lockfile).await.unwrap(), original);

        let target = fx.temp.path().join("fresh");
        let err = fx.manager.restore("bundle", &lockfile, &target).await.unwrap_err();
        assert!(err.is_cache_miss());
    }

    #[tokio::test]
    async fn disabled_cache_does_no_io() {
        let fx = fixture_with(|cfg| cfg.secret_access_key = None, None);
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let source = fx.gem_tree();

        assert!(!fx.manager.is_enabled());
        assert!(matches!(
            fx.manager.restore("bundle", &lockfile, &fx.temp.path().join("t")).await,
            Err(DepcacheError::CacheDisabled)
        ));
        assert!(matches!(
            fx.manager.save("bundle", &lockfile, &source).await,
            Err(DepcacheError::CacheDisabled)
        ));
        assert!(matches!(
            fx.manager.prune("bundle", 30).await,
            Err(DepcacheError::CacheDisabled)
        ));
        assert_eq!(fx.calls.total(), 0);
    }

    #[tokio::test]
    async fn missing_lockfile_or_empty_source_does_no_io() {
        let fx = fixture();
        let missing = fx.temp.path().join("project/package-lock.json");
        let empty = fx.temp.path().join("project/node_modules");
        fs::create_dir_all(&empty).unwrap();

        assert!(matches!(
            fx.manager.restore("npm", &missing, &empty).await,
            Err(DepcacheError::LockfileNotFound(_))
        ));
        assert!(matches!(
            fx.manager.save("npm", &missing, &empty).await,
            Err(DepcacheError::LockfileNotFound(_))
        ));

        let lockfile = fx.lockfile(b"{}");
        assert!(matches!(
            fx.manager.save("npm", &lockfile, &empty).await,
            Err(DepcacheError::SourceEmpty(_))
        ));
        assert_eq!(fx.calls.total(), 0);
    }

    #[tokio::test]
    async fn corrupt_archive_fails_restore_without_marker() {
        let fx = fixture();
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let hash = fx.manager.hash(&lockfile).await.unwrap();
        let key = fx.manager.key("bundle", &hash).unwrap();

        let object = fx.store.object_path(&key);
        fs::create_dir_all(object.parent().unwrap()).unwrap();
        fs::write(&object, [0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad]).unwrap();

        let target = fx.temp.path().join("fresh");
        let err = fx.manager.restore("bundle", &lockfile, &target).await.unwrap_err();

        assert!(matches!(err, DepcacheError::RestoreFailed { .. }));
        assert!(err.is_recoverable());
        assert!(!Marker::in_dir(&target).path().exists());
    }

    #[tokio::test]
    async fn uncompressed_archives_use_tar_extension() {
        let fx = fixture_with(|cfg| cfg.compression = false, None);
        let lockfile = fx.lockfile(b"gems: sinatra 3.0");
        let source = fx.gem_tree();

        let outcome = fx.manager.save("bundle", &lockfile, &source).await.unwrap();
        assert!(outcome.key().path.ends_with(".tar"));

        let target = fx.temp.path().join("fresh");
        fx.manager.restore("bundle", &lockfile, &target).await.unwrap();
        assert!(target.join("gems/test.gem").is_file());
    }

    #[tokio::test]
    async fn prune_deletes_only_expired_entries() {
        let fx = fixture();
        let source = fx.gem_tree();

        let old_lock = fx.lockfile(b"gems: rack 2.0");
        let old = fx.manager.save("bundle", &old_lock, &source).await.unwrap();
        let new_lock = fx.lockfile(b"gems: rack 3.0");
        let new = fx.manager.save("bundle", &new_lock, &source).await.unwrap();

        let old_path = fx.store.object_path(old.key());
        let file = fs::OpenOptions::new().write(true).open(&old_path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(40 * 86_400))
            .unwrap();

        let report = fx.manager.prune("bundle", 30).await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 0);
        assert!(report.bytes_freed > 0);
        assert!(!old_path.exists());
        assert!(fx.store.object_path(new.key()).exists());
    }

    #[tokio::test]
    async fn prune_ignores_other_cache_types() {
        let fx = fixture();
        let source = fx.gem_tree();
        let lockfile = fx.lockfile(b"gems: rack 2.0");
        fx.manager.save("bundle", &lockfile, &source).await.unwrap();

        let report = fx.manager.prune("npm", 0).await.unwrap();
        assert_eq!(report, PruneReport::default());
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let fx = fixture_with(|cfg| cfg.timeout_secs = 1, Some(Duration::from_secs(5)));
        let hash = "0123456789abcdef";
        let key = fx.manager.key("npm", hash).unwrap();

        let err = fx.manager.exists(&key).await.unwrap_err();
        assert!(matches!(
            err,
            DepcacheError::StorageTimeout {
                operation: "head",
                secs: 1
            }
        ));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn from_settings_skips_store_when_disabled() {
        let manager = CacheManager::from_settings(CacheSettings::from_config(&CacheConfig::default()))
            .await
            .unwrap();
        assert!(!manager.is_enabled());
        assert_eq!(manager.backend_name(), None);
    }

    #[tokio::test]
    async fn from_settings_selects_filesystem_backend() {
        let temp = TempDir::new().unwrap();
        let manager = CacheManager::from_settings(CacheSettings::from_config(&cache_config(&temp)))
            .await
            .unwrap();
        assert!(manager.is_enabled());
        assert_eq!(manager.backend_name(), Some("filesystem"));
    }
}
