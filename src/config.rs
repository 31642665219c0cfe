//! Configuration types for ophys-tensor.
//!
//! The [`Config`] struct controls:
//! - Where cached subjects live on disk
//! - Which stimulus is aligned, how many repeats and how long each window is
//! - How many workers a batch uses
//! - Durability of cache writes
//!
//! # Example
//! ```rust
//! use ophys_tensor::Config;
//!
//! // natural_movie_one, 10 repeats, 900-sample windows
//! let config = Config::default();
//!
//! let config = Config {
//!     cache_root: "/data/ophys".into(),
//!     workers: 4,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Upper bound on batch workers.
pub const MAX_WORKERS: usize = 64;

/// Pipeline configuration options.
///
/// All fields have defaults matching the natural-movie reference analysis.
/// The cache root is always explicit; it is never derived from the host
/// platform.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory of the subject cache.
    ///
    /// One subdirectory per brain area is created beneath it.
    pub cache_root: PathBuf,

    /// Stimulus whose repeats are aligned.
    pub stimulus: String,

    /// Repeats expected per session.
    pub repeats: usize,

    /// Samples per extracted window.
    pub window_length: usize,

    /// Subjects processed concurrently by batch operations.
    ///
    /// Default: 1 (sequential)
    pub workers: usize,

    /// Durability mode for cache writes.
    pub sync_mode: SyncMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("ophys-cache"),
            stimulus: "natural_movie_one".to_string(),
            // natural_movie_one: 10 presentations of a 30 s clip at 30 Hz
            repeats: 10,
            window_length: 900,
            workers: 1,
            sync_mode: SyncMode::Normal,
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a default Config rooted at `cache_root`.
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `OphysCache::open()`.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `cache_root` or `stimulus` is empty
    /// - `repeats` or `window_length` is 0
    /// - `workers` is 0 or above [`MAX_WORKERS`]
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ValidationError::required_field("cache_root"));
        }

        if self.stimulus.trim().is_empty() {
            return Err(ValidationError::required_field("stimulus"));
        }

        if self.repeats == 0 {
            return Err(ValidationError::invalid_field(
                "repeats",
                "must be greater than 0",
            ));
        }

        if self.window_length == 0 {
            return Err(ValidationError::invalid_field(
                "window_length",
                "must be greater than 0",
            ));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ValidationError::invalid_field(
                "workers",
                format!("must be between 1 and {}, got {}", MAX_WORKERS, self.workers),
            ));
        }

        Ok(())
    }

    /// Returns the windowing parameters.
    #[inline]
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            repeats: self.repeats,
            window_length: self.window_length,
        }
    }
}

/// Windowing parameters shared by every session of a subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// Repeats expected per session (R).
    pub repeats: usize,
    /// Samples per window (L).
    pub window_length: usize,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Config::default().window_spec()
    }
}

/// Durability mode for cache writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// fsync on commit.
    #[default]
    Normal,

    /// Skip fsync. A crash may lose the most recently written subjects,
    /// which are then recomputed on the next run.
    Fast,
}

impl SyncMode {
    /// Returns true if this mode skips fsync.
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}
