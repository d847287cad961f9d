//! Durable environment state store for Corral.
//!
//! This crate provides `EnvironmentStore`: one JSON row per environment,
//! written atomically with an embedded blake3 checksum, behind a single
//! serialization point (an in-process mutex plus an advisory file lock).
//! `StoreGuard` exposes that serialization point so multi-step sequences such
//! as read-used-ports-then-write-ports run atomically. `StoreLayout` owns the
//! on-disk directory structure and format version.

pub mod environments;
pub mod layout;
pub mod lock;

pub use environments::{EnvironmentStore, StatusSwap, StoreGuard};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::StoreLock;

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable on every filesystem.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for environment '{env_id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        env_id: String,
        expected: String,
        actual: String,
    },
    #[error("environment already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid environment id '{0}': must match [A-Za-z0-9_-]")]
    InvalidId(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
