//! # ophys-tensor
//!
//! Aligned ΔF/F tensors from repeated stimulus presentations in two-photon
//! calcium-imaging sessions.
//!
//! A subject (one experiment container) is recorded over several sessions.
//! For a chosen stimulus, ophys-tensor keeps the cells seen in every
//! session, cuts each repeat of the stimulus into a fixed-length window, and
//! stacks the result into a `[cell, session, repeat, time]` array. Each
//! subject is assembled once and then served from an on-disk cache.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ophys_tensor::{Config, ContainerId, OphysCache};
//!
//! let cache = OphysCache::open(Config::with_cache_root("./ophys-cache"), source)?;
//!
//! // Assembled on the first call, read from the cache afterwards.
//! let subject = cache.subject(ContainerId(511510736))?;
//! let shape = subject.dff().shape(); // [cells, sessions, repeats, samples]
//!
//! // Every matching subject, continuing past failures.
//! let report = cache.download(&cache.filter())?;
//! for (id, err) in &report.failed {
//!     eprintln!("{id}: {err}");
//! }
//! ```
//!
//! ## Key Concepts
//!
//! ### Data source
//!
//! A [`DataSource`] answers catalogue queries and hands out raw session data:
//! cell ids, the ΔF/F trace matrix, and the stimulus epoch table. The crate
//! ships [`InMemorySource`] and [`JsonDirectorySource`]; other backends
//! implement the trait.
//!
//! ### Alignment
//!
//! Sessions are ordered by acquisition age. The cell axis is the ascending
//! intersection of every session's cell ids. Repeat `r` of a session starts
//! at the first epoch row of repeat group `r` and spans
//! [`Config::window_length`] samples.
//!
//! ### Cache
//!
//! Each subject is one redb file at `<root>/<area>/<container>_<area>_<depth>.redb`.
//! Records that fail to decode are deleted and rebuilt.
//!
//! ## Thread Safety
//!
//! [`OphysCache`] is `Send + Sync`. Batch operations use
//! [`Config::workers`] threads, each subject handled by exactly one.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod cache;
mod config;
mod error;
mod subject;
mod types;

pub mod align;
pub mod batch;
pub mod discovery;
pub mod source;
pub mod storage;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main interface
pub use cache::OphysCache;

// Configuration
pub use config::{Config, SyncMode, WindowSpec, MAX_WORKERS};

// Error handling
pub use error::{
    CacheError, ExtractionError, GatewayError, OphysError, Result, ValidationError,
};

// Core types
pub use types::{CellId, ContainerId, SessionId, Timestamp};

// Domain types
pub use subject::{SessionRecord, Subject, SubjectKey, RECORD_EXTENSION};

// Data sources
pub use source::{
    ContainerInfo, DataSource, EpochRow, ExperimentQuery, ExperimentSummary, InMemorySource,
    JsonDirectorySource, SessionData, SessionInfo,
};

// Alignment
pub use align::TrialWindow;

// Discovery and batches
pub use batch::{BatchReport, Origin};
pub use discovery::SubjectFilter;

// Storage (for advanced users)
pub use storage::{CacheStore, RedbCache};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common ophys-tensor usage.
///
/// ```rust
/// use ophys_tensor::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::OphysCache;
    pub use crate::config::Config;
    pub use crate::discovery::SubjectFilter;
    pub use crate::error::{OphysError, Result};
    pub use crate::source::DataSource;
    pub use crate::subject::{Subject, SubjectKey};
    pub use crate::types::{CellId, ContainerId, SessionId};
}
