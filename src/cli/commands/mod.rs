//! CLI command implementations

pub mod cache;
pub mod config;
pub mod install;

pub use cache::execute as cache;
pub use config::execute as config;
pub use install::execute as install;

use crate::error::{DepcacheError, DepcacheResult};
use std::path::PathBuf;

/// Resolve `--project`, defaulting to the current directory
pub(crate) fn project_dir(project: Option<PathBuf>) -> DepcacheResult<PathBuf> {
    match project {
        Some(p) if !p.is_dir() => Err(DepcacheError::PathNotFound(p)),
        Some(p) => Ok(p.canonicalize().unwrap_or(p)),
        None => std::env::current_dir()
            .map_err(|e| DepcacheError::io("getting current directory", e)),
    }
}
