//! Local install markers
//!
//! A marker records the full lockfile hash the installed dependency tree was
//! built from. It is necessary but not sufficient evidence of a usable tree:
//! callers must also run the ecosystem's smoke check.

use crate::error::{DepcacheError, DepcacheResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Marker file recording which lockfile produced a dependency tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    path: PathBuf,
}

impl Marker {
    /// Conventional marker file name inside the dependency directory
    pub const FILE_NAME: &'static str = ".installed";

    /// Marker at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker at the conventional location inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded hash, `None` if no marker exists
    pub async fn read(&self) -> DepcacheResult<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DepcacheError::io(
                format!("reading marker {}", self.path.display()),
                e,
            )),
        }
    }

    /// Whether the marker records exactly `full_hash`.
    ///
    /// Unreadable markers count as not matching.
    pub async fn matches(&self, full_hash: &str) -> bool {
        match self.read().await {
            Ok(Some(recorded)) => recorded == full_hash,
            Ok(None) => false,
            Err(e) => {
                debug!("Ignoring unreadable marker: {}", e);
                false
            }
        }
    }

    /// Record `full_hash` as the installed state
    pub async fn write(&self, full_hash: &str) -> DepcacheResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                DepcacheError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        fs::write(&self.path, format!("{}\n", full_hash))
            .await
            .map_err(|e| DepcacheError::io(format!("writing marker {}", self.path.display()), e))?;

        debug!("Wrote marker {}", self.path.display());
        Ok(())
    }

    /// Remove the marker if present
    pub async fn clear(&self) -> DepcacheResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DepcacheError::io(
                format!("removing marker {}", self.path.display()),
                e,
            )),
        }
    }
}
