//! Error types for ophys-tensor.
//!
//! The crate uses a hierarchical error system:
//! - `OphysError` is the top-level error returned by all public APIs
//! - Specific error types (`GatewayError`, `ExtractionError`, `CacheError`,
//!   `ValidationError`) provide detail
//!
//! # Failure Scope
//!
//! Every error aborts the current subject only. Batch operations collect
//! per-subject errors in a [`BatchReport`](crate::BatchReport) and carry on.
//! Corrupt cache records never reach the caller of
//! [`OphysCache::subject`](crate::OphysCache::subject): they are logged and
//! recomputed.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{CellId, ContainerId, SessionId};

/// Result type alias for ophys-tensor operations.
pub type Result<T> = std::result::Result<T, OphysError>;

/// Top-level error enum for all ophys-tensor operations.
#[derive(Debug, Error)]
pub enum OphysError {
    /// The data source could not answer a query.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Trial windows could not be extracted from a session.
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Cache record could not be read or written.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// The container has no recording sessions.
    #[error("Container {0} has no sessions")]
    NoSessions(ContainerId),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OphysError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a data source error.
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    /// Returns true if this is a window extraction error.
    pub fn is_extraction(&self) -> bool {
        matches!(self, Self::Extraction(_))
    }

    /// Returns true if this is a cache error.
    pub fn is_cache(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Data source errors.
///
/// Never retried by this crate.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No experiment container with the given id.
    #[error("Experiment container not found: {0}")]
    ContainerNotFound(ContainerId),

    /// No session with the given id.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// The source could not be reached or refused the query.
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with data that cannot be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Creates an unavailable error with the given message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a malformed-response error with the given message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Trial window extraction errors.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Fewer repeat groups than expected for the stimulus.
    #[error(
        "Missing stimulus data for '{stimulus}' in session {session}: found {found} of {expected} repeats"
    )]
    MissingStimulusData {
        /// Session being extracted.
        session: SessionId,
        /// Stimulus name.
        stimulus: String,
        /// Repeat groups present among `0..expected`.
        found: usize,
        /// Repeat groups required.
        expected: usize,
    },

    /// The window would read past the end of the trace.
    #[error(
        "Repeat {repeat} of session {session} starts at sample {start}; a {window_length}-sample window exceeds trace length {trace_length}"
    )]
    StartOutOfRange {
        /// Session being extracted.
        session: SessionId,
        /// Repeat label (1-based).
        repeat: usize,
        /// Window start sample.
        start: usize,
        /// Configured window length.
        window_length: usize,
        /// Number of samples in the trace.
        trace_length: usize,
    },

    /// A requested cell is not among the session's cells.
    #[error("Cell {cell} not recorded in session {session}")]
    CellNotFound {
        /// Session being extracted.
        session: SessionId,
        /// Missing cell.
        cell: CellId,
    },

    /// Cell id list and trace matrix disagree.
    #[error("Session {session} lists {cells} cells but the trace matrix has {rows} rows")]
    ShapeMismatch {
        /// Session being extracted.
        session: SessionId,
        /// Length of the cell id list.
        cells: usize,
        /// Rows in the trace matrix.
        rows: usize,
    },
}

/// Cache storage errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Record is unreadable or malformed.
    #[error("Cache record corrupted: {0}")]
    Corrupted(String),

    /// Record written by an incompatible schema.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Version found in the record.
        found: u32,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Another writer holds the record lock.
    #[error("Cache record is locked by another writer: {0}")]
    Locked(PathBuf),
}

impl CacheError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns true if the record should be discarded and recomputed.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Corrupted(_) | Self::SchemaVersionMismatch { .. } | Self::Serialization(_)
        )
    }
}

// Conversions from redb error types
impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for CacheError {
    fn from(err: redb::DatabaseError) -> Self {
        CacheError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(err: redb::TransactionError) -> Self {
        CacheError::Redb(format!("Transaction failed: {}", err))
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(err: redb::CommitError) -> Self {
        CacheError::Redb(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for CacheError {
    fn from(err: redb::TableError) -> Self {
        CacheError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(err: redb::StorageError) -> Self {
        CacheError::Redb(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redb::Error> for OphysError {
    fn from(err: redb::Error) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<redb::DatabaseError> for OphysError {
    fn from(err: redb::DatabaseError) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<redb::TransactionError> for OphysError {
    fn from(err: redb::TransactionError) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<redb::CommitError> for OphysError {
    fn from(err: redb::CommitError) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<redb::TableError> for OphysError {
    fn from(err: redb::TableError) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<redb::StorageError> for OphysError {
    fn from(err: redb::StorageError) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

impl From<bincode::Error> for OphysError {
    fn from(err: bincode::Error) -> Self {
        OphysError::Cache(CacheError::from(err))
    }
}

/// Validation errors for caller-supplied input.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },
}

impl ValidationError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }
}
