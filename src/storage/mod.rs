//! Subject cache storage.
//!
//! This module provides a trait-based abstraction over the cache backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OphysCache                              │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │     CacheStore      │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                         ▲                                    │
//! │                         │                                    │
//! │                  ┌──────┴─────┐                              │
//! │                  │ RedbCache  │  one .redb file per subject  │
//! │                  └────────────┘                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//!   VISp/
//!     511510736_VISp_175.redb
//!     511510736_VISp_175.redb.lock
//!   VISal/
//!     ...
//! ```

pub mod record;
pub mod redb;
pub mod schema;

pub use self::redb::RedbCache;
pub use record::FieldValue;
pub use schema::{RecordMetadata, SCHEMA_VERSION};

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::subject::{Subject, SubjectKey};

/// Storage contract for cached subjects.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; batch workers share one store.
/// Writes to the same key must not interleave.
pub trait CacheStore: Send + Sync {
    /// Root directory of the cache.
    fn root(&self) -> &Path;

    /// Location of a subject's record.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the key cannot name a file.
    fn path_for(&self, key: &SubjectKey) -> Result<PathBuf>;

    /// Returns true if a record file exists for `key`.
    ///
    /// Says nothing about whether the record decodes.
    fn contains(&self, key: &SubjectKey) -> bool;

    /// Loads a subject.
    ///
    /// Returns `None` if no record exists.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupted` (or `SchemaVersionMismatch`) for a
    /// record that exists but cannot be decoded, and `CacheError::Locked`
    /// if another process holds the record open.
    fn load(&self, key: &SubjectKey) -> Result<Option<Subject>>;

    /// Persists a complete subject, replacing any existing record.
    ///
    /// Returns the record path.
    fn save(&self, subject: &Subject) -> Result<PathBuf>;

    /// Deletes a record, waiting for any write to the same key to finish.
    ///
    /// Returns `true` if a record existed.
    fn remove(&self, key: &SubjectKey) -> Result<bool>;

    /// Deletes the record for `key` if it is still unreadable once the
    /// write lock is held.
    ///
    /// A record that a concurrent writer replaced with a valid one is kept.
    /// Returns `true` if a record was deleted.
    fn evict_corrupt(&self, key: &SubjectKey) -> Result<bool>;
}

/// Opens the cache store described by `config`.
pub fn open_store(config: &Config) -> Result<Box<dyn CacheStore>> {
    let store = RedbCache::open(&config.cache_root, config.sync_mode)?;
    Ok(Box::new(store))
}
