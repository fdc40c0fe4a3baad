//! Error types for depcache
//!
//! All modules use `DepcacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for depcache operations
pub type DepcacheResult<T> = Result<T, DepcacheError>;

/// All errors that can occur in depcache
#[derive(Error, Debug)]
pub enum DepcacheError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store bucket not configured")]
    BucketNotConfigured,

    #[error("Unknown ecosystem: {0}")]
    EcosystemNotFound(String),

    // Cache errors
    #[error("Dependency cache is disabled (no bucket or credentials)")]
    CacheDisabled,

    #[error("Lockfile not found: {0}")]
    LockfileNotFound(PathBuf),

    #[error("Cache miss: {key}")]
    CacheMiss { key: String },

    #[error("Failed to restore {key}: {reason}")]
    RestoreFailed { key: String, reason: String },

    #[error("Failed to save {key}: {reason}")]
    SaveFailed { key: String, reason: String },

    #[error("Nothing to cache, directory is missing or empty: {0}")]
    SourceEmpty(PathBuf),

    #[error("Invalid archive entry {entry}: {reason}")]
    ArchiveEntry { entry: String, reason: String },

    // Storage errors
    #[error("{backend} {operation} failed: {reason}")]
    Storage {
        backend: &'static str,
        operation: &'static str,
        reason: String,
    },

    #[error("Object store {operation} timed out after {secs}s")]
    StorageTimeout { operation: &'static str, secs: u64 },

    // Install errors
    #[error("{ecosystem} install failed (exit code: {code}):\n{output}")]
    InstallFailed {
        ecosystem: String,
        code: i32,
        output: String,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DepcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a storage backend error
    pub fn storage(
        backend: &'static str,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Storage {
            backend,
            operation,
            reason: reason.into(),
        }
    }

    /// Whether this is an expected cache miss
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss { .. })
    }

    /// Whether the caller can recover by running the real installer.
    ///
    /// Every cache-layer failure is recoverable. Only the installer's own
    /// failure (and configuration mistakes) end a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CacheDisabled
                | Self::LockfileNotFound(_)
                | Self::CacheMiss { .. }
                | Self::RestoreFailed { .. }
                | Self::SaveFailed { .. }
                | Self::SourceEmpty(_)
                | Self::ArchiveEntry { .. }
                | Self::Storage { .. }
                | Self::StorageTimeout { .. }
                | Self::BucketNotConfigured
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CacheDisabled => {
                Some("Set DEPCACHE_BUCKET, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY")
            }
            Self::BucketNotConfigured => Some("Set cache.bucket or DEPCACHE_BUCKET"),
            Self::LockfileNotFound(_) => {
                Some("Generate a lockfile so dependency caching can work")
            }
            Self::StorageTimeout { .. } => Some("Check network access to the object store"),
            _ => None,
        }
    }
}
