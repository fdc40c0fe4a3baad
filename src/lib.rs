//! depcache - lockfile-keyed dependency cache
//!
//! Restores installed dependency trees (gems, node modules, ...) from an
//! object store keyed by the lockfile hash, and falls back to the real
//! package manager plus a background upload on a miss.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod provision;
pub mod storage;
pub mod ui;

pub use error::{DepcacheError, DepcacheResult};
