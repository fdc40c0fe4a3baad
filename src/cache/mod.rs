//! Lockfile-keyed dependency cache
//!
//! Provides content-addressed caching of installed dependency trees in an
//! object store. Same lockfile bytes = same object key.
//!
//! # Invariants
//!
//! - Keys are derived from the SHA-256 of the lockfile contents only
//! - Archives are immutable once written: an existing key is never overwritten
//! - Every cache failure is recoverable by running the real installer
//! - A marker is written only after a known-good restore or install

pub mod archive;
pub mod key;
pub mod lockfile;
pub mod manager;
pub mod marker;
pub mod settings;

pub use key::CacheKey;
pub use lockfile::{hash_lockfile, stack_for, LockfileDigest};
pub use manager::{CacheManager, PruneReport, RestoreHit, SaveOutcome};
pub use marker::Marker;
pub use settings::{CacheSettings, StoreCredentials};
