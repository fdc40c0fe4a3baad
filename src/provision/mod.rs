//! Install-or-restore orchestration
//!
//! Per ecosystem: trust an existing tree only if its marker matches the
//! lockfile and the smoke check passes; otherwise try the cache, and fall back
//! to the real installer. Fresh installs are uploaded in the background.
//!
//! ```text
//! local valid ──────────────────────────────────────────────► UpToDate
//! restore hit ──► verify ok ────────────────────────────────► Restored
//!                 verify fails ─┐
//! miss / error / disabled ──────┴─► install ─► verify ─► mark ─► save (bg)
//!                                     └─ fails ─► fatal
//! ```

pub mod command;

use crate::cache::{CacheKey, CacheManager, LockfileDigest, Marker, SaveOutcome};
use crate::config::EcosystemConfig;
use crate::error::{DepcacheError, DepcacheResult};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One ecosystem within one project
#[derive(Debug, Clone)]
pub struct Ecosystem {
    config: EcosystemConfig,
    project_dir: PathBuf,
}

impl Ecosystem {
    pub fn new(config: EcosystemConfig, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_dir: project_dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn cache_type(&self) -> &str {
        self.config.cache_type()
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.project_dir.join(&self.config.lockfile)
    }

    pub fn target_dir(&self) -> PathBuf {
        self.project_dir.join(&self.config.target_dir)
    }

    /// Marker for this ecosystem's dependency tree
    pub fn marker(&self) -> Marker {
        match &self.config.marker {
            Some(path) => Marker::new(self.project_dir.join(path)),
            None => Marker::in_dir(&self.target_dir()),
        }
    }

    /// Whether the project uses this ecosystem (lockfile or a detection file present)
    pub async fn applies(&self) -> bool {
        if fs::metadata(self.lockfile_path())
            .await
            .is_ok_and(|m| m.is_file())
        {
            return true;
        }
        for file in &self.config.detect {
            if fs::try_exists(self.project_dir.join(file))
                .await
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Detect every configured ecosystem that applies to `project_dir`
    pub async fn detect_all(configs: &[EcosystemConfig], project_dir: &Path) -> Vec<Self> {
        let mut detected = Vec::new();
        for config in configs {
            let eco = Self::new(config.clone(), project_dir);
            if eco.applies().await {
                detected.push(eco);
            }
        }
        detected
    }

    /// Run the smoke check. Without a verify command, a non-empty target
    /// directory counts as usable.
    async fn verify(&self) -> bool {
        if self.config.verify.is_empty() {
            let Ok(mut entries) = fs::read_dir(self.target_dir()).await else {
                return false;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.file_name() != Marker::FILE_NAME {
                    return true;
                }
            }
            return false;
        }
        command::run_check(&self.config.verify, &self.project_dir).await
    }
}

/// How an ecosystem ended up provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Existing tree matched the lockfile and passed the smoke check
    UpToDate,
    /// Tree restored from the cache and verified
    Restored { key: CacheKey },
    /// Installer ran; `save_dispatched` is true if an upload was started
    Installed { save_dispatched: bool },
}

impl ProvisionOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::UpToDate => "up to date",
            Self::Restored { .. } => "restored from cache",
            Self::Installed { .. } => "installed",
        }
    }
}

/// Installs or restores dependencies for a set of ecosystems
pub struct Provisioner {
    cache: CacheManager,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Provisioner {
    pub fn new(cache: CacheManager) -> Self {
        Self {
            cache,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Provision one ecosystem. Only an installer failure is returned as an
    /// error; cache problems are logged and worked around.
    pub async fn provision(
        &self,
        eco: &Ecosystem,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DepcacheResult<ProvisionOutcome> {
        let lockfile = eco.lockfile_path();
        let target = eco.target_dir();
        let marker = eco.marker();

        let digest = match LockfileDigest::compute(&lockfile).await {
            Ok(digest) => digest,
            Err(e) => {
                match e {
                    DepcacheError::LockfileNotFound(path) => warn!(
                        "No lockfile at {} for {}: first run will be slower, generate a lockfile for caching to work",
                        path.display(),
                        eco.name()
                    ),
                    other => warn!(
                        "Cannot hash lockfile for {}, installing without cache: {}",
                        eco.name(),
                        other
                    ),
                }
                clear_marker(&marker).await;
                self.install(eco, on_output).await?;
                return Ok(ProvisionOutcome::Installed {
                    save_dispatched: false,
                });
            }
        };

        if marker.matches(digest.full()).await {
            if eco.verify().await {
                info!("{} dependencies are up to date", eco.name());
                return Ok(ProvisionOutcome::UpToDate);
            }
            info!(
                "{} marker matches but smoke check failed, reinstalling",
                eco.name()
            );
        }

        let mut restored_key = None;
        if self.cache.is_enabled() {
            match self
                .cache
                .restore_with_marker(eco.cache_type(), &lockfile, &target, &marker)
                .await
            {
                Ok(hit) => {
                    if eco.verify().await {
                        return Ok(ProvisionOutcome::Restored { key: hit.key });
                    }
                    warn!(
                        "{} restored from {} but failed its smoke check, reinstalling",
                        eco.name(),
                        hit.key
                    );
                    restored_key = Some(hit.key);
                }
                Err(e) if e.is_cache_miss() => {
                    info!("No cached {} dependencies, installing", eco.name());
                }
                Err(e) => {
                    warn!("Cache restore failed for {}: {}", eco.name(), e);
                }
            }
        } else {
            debug!("Cache disabled, installing {} directly", eco.name());
        }

        clear_marker(&marker).await;
        self.install(eco, on_output).await?;

        if !eco.verify().await {
            warn!(
                "{} installed but its smoke check failed; not marking or caching",
                eco.name()
            );
            return Ok(ProvisionOutcome::Installed {
                save_dispatched: false,
            });
        }
        if let Err(e) = marker.write(digest.full()).await {
            warn!("Could not mark {} as installed: {}", eco.name(), e);
        }

        // The archive for this lockfile already exists when the restore hit
        let save_dispatched = self.cache.is_enabled() && restored_key.is_none();
        if save_dispatched {
            self.spawn_save(eco.cache_type().to_string(), lockfile, target);
        }

        Ok(ProvisionOutcome::Installed { save_dispatched })
    }

    /// Provision every ecosystem concurrently
    pub async fn provision_all(
        &self,
        ecosystems: &[Ecosystem],
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Vec<(String, DepcacheResult<ProvisionOutcome>)> {
        let runs = ecosystems.iter().map(|eco| async move {
            (eco.name().to_string(), self.provision(eco, on_output).await)
        });
        join_all(runs).await
    }

    async fn install(
        &self,
        eco: &Ecosystem,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> DepcacheResult<()> {
        info!("Installing {} dependencies", eco.name());
        command::run_install(eco.name(), &eco.config.install, &eco.project_dir, on_output).await
    }

    fn spawn_save(&self, cache_type: String, lockfile: PathBuf, source: PathBuf) {
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            match cache.save(&cache_type, &lockfile, &source).await {
                Ok(SaveOutcome::Uploaded { key, bytes }) => {
                    info!("Uploaded {} cache to {} ({} bytes)", cache_type, key, bytes);
                }
                Ok(SaveOutcome::AlreadyCached { key }) => {
                    debug!("{} cache already present at {}", cache_type, key);
                }
                Err(e) => warn!("Failed to save {} cache: {}", cache_type, e),
            }
        });

        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Number of background uploads not yet awaited
    pub fn pending_uploads(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Wait for background uploads, giving up after `timeout`.
    ///
    /// Returns false if uploads were still running when the wait ended.
    pub async fn wait_for_uploads(&self, timeout: Duration) -> bool {
        let handles: Vec<_> = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if handles.is_empty() {
            return true;
        }

        debug!("Waiting for {} background uploads", handles.len());
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!("Background upload task failed: {}", e);
                    }
                }
                true
            }
            Err(_) => {
                warn!(
                    "Background uploads still running after {}s, exiting without them",
                    timeout.as_secs()
                );
                false
            }
        }
    }
}

/// A stale marker that cannot be removed only costs a smoke check next run
async fn clear_marker(marker: &Marker) {
    if let Err(e) = marker.clear().await {
        warn!("Could not clear {}: {}", marker.path().display(), e);
    }
}
