//! The [`OphysCache`] facade.
//!
//! [`OphysCache`] ties a [`DataSource`] to a [`CacheStore`]. Asking it for a
//! subject returns the cached record when one exists and matches the
//! configured stimulus and window; otherwise the subject is assembled from
//! the source and written to the cache before it is returned.
//!
//! # Quick Start
//!
//! ```rust
//! use ophys_tensor::{Config, InMemorySource, OphysCache};
//!
//! # fn main() -> ophys_tensor::Result<()> {
//! # let dir = tempfile::tempdir().unwrap();
//! let config = Config::with_cache_root(dir.path());
//! let cache = OphysCache::open(config, InMemorySource::new())?;
//! assert!(cache.store().root().is_dir());
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `OphysCache` is `Send + Sync`. Batch operations share one instance across
//! their workers.

use tracing::{debug, info, instrument, warn};

use crate::align::{align_sessions, sort_by_acquisition_age};
use crate::batch::{self, BatchReport, Origin};
use crate::config::Config;
use crate::discovery::{select_subjects, SubjectFilter};
use crate::error::{GatewayError, OphysError, Result, ValidationError};
use crate::source::DataSource;
use crate::storage::{open_store, CacheStore};
use crate::subject::{SessionRecord, Subject, SubjectKey};
use crate::types::ContainerId;

/// Cache-or-compute access to aligned subjects.
pub struct OphysCache {
    /// Where raw session data comes from.
    source: Box<dyn DataSource>,

    /// Where assembled subjects are kept.
    store: Box<dyn CacheStore>,

    config: Config,
}

impl std::fmt::Debug for OphysCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OphysCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OphysCache {
    /// Opens a cache rooted at `config.cache_root`, creating the directory
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the cache root
    /// cannot be created.
    #[instrument(skip(config, source), fields(root = %config.cache_root.display()))]
    pub fn open(config: Config, source: impl DataSource + 'static) -> Result<Self> {
        config.validate()?;

        let store = open_store(&config)?;

        info!(
            stimulus = %config.stimulus,
            repeats = config.repeats,
            window_length = config.window_length,
            workers = config.workers,
            "Ophys cache opened"
        );

        Ok(Self {
            source: Box::new(source),
            store,
            config,
        })
    }

    /// Configuration this cache was opened with.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The data source.
    #[inline]
    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    /// The cache store.
    #[inline]
    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    /// Discovery filter for the configured stimulus.
    pub fn filter(&self) -> SubjectFilter {
        SubjectFilter::for_stimulus(&self.config.stimulus)
    }

    // =========================================================================
    // Single subject
    // =========================================================================

    /// Returns the aligned subject for an experiment container.
    ///
    /// Looks the container up in the source to find its cache key, then
    /// behaves like [`subject_for`](Self::subject_for).
    ///
    /// # Errors
    ///
    /// Any gateway or extraction error aborts this subject; nothing is
    /// cached for it. A corrupt cache record is never an error here.
    #[instrument(skip(self), fields(container = %id))]
    pub fn subject(&self, id: ContainerId) -> Result<Subject> {
        let container = self.source.container(id)?;
        self.subject_for(&SubjectKey::from_container(&container))
    }

    /// Returns the aligned subject stored under `key`, computing and caching
    /// it on a miss.
    #[instrument(skip(self, key), fields(key = %key))]
    pub fn subject_for(&self, key: &SubjectKey) -> Result<Subject> {
        self.fetch_or_compute(key).map(|(subject, _)| subject)
    }

    /// Loads a usable cache record.
    ///
    /// Returns `None` when there is no record, when the record was built for
    /// a different stimulus or window, or when it is corrupt. Corrupt
    /// records are deleted under the record's write lock.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Locked` if another process holds the record, or
    /// an I/O error if a corrupt record cannot be removed.
    pub fn cached_subject(&self, key: &SubjectKey) -> Result<Option<Subject>> {
        let subject = match self.store.load(key) {
            Ok(Some(subject)) => subject,
            Ok(None) => return Ok(None),
            Err(OphysError::Cache(err)) if err.is_corrupt() => {
                warn!(key = %key, error = %err, "Discarding corrupt cache record");
                if !self.store.evict_corrupt(key)? {
                    debug!(key = %key, "Record rewritten concurrently");
                }
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if subject.stimulus() != self.config.stimulus
            || subject.window_spec() != self.config.window_spec()
        {
            debug!(
                key = %key,
                stimulus = subject.stimulus(),
                "Cache record built for other settings"
            );
            return Ok(None);
        }

        debug!(key = %key, "Cache hit");
        Ok(Some(subject))
    }

    /// Builds a subject from the data source without touching the cache.
    ///
    /// Sessions are ordered by acquisition age; the cell axis is the
    /// ascending intersection of every session's cells.
    ///
    /// # Errors
    ///
    /// - `NoSessions` if the container has no sessions
    /// - `GatewayError` if any query fails or returns data for the wrong session
    /// - `ExtractionError` if any session lacks usable trial windows
    #[instrument(skip(self), fields(container = %id))]
    pub fn assemble_subject(&self, id: ContainerId) -> Result<Subject> {
        let container = self.source.container(id)?;
        let mut sessions = self.source.sessions(id)?;
        if sessions.is_empty() {
            return Err(OphysError::NoSessions(id));
        }
        sort_by_acquisition_age(&mut sessions);

        let mut data = Vec::with_capacity(sessions.len());
        for info in &sessions {
            let session = self.source.session_data(info.id)?;
            if session.session != info.id {
                return Err(GatewayError::malformed(format!(
                    "requested session {} but received {}",
                    info.id, session.session
                ))
                .into());
            }
            debug!(
                session = %info.id,
                age = info.acquisition_age_days,
                cells = session.cell_ids.len(),
                samples = session.trace_length(),
                "Session fetched"
            );
            data.push(session);
        }

        let spec = self.config.window_spec();
        let alignment = align_sessions(&data, &self.config.stimulus, spec)?;

        let records = sessions
            .into_iter()
            .zip(alignment.trials)
            .map(|(info, trials)| SessionRecord::new(info, trials))
            .collect();

        let subject = Subject::from_parts(
            container,
            self.config.stimulus.clone(),
            spec,
            records,
            alignment.cells,
            alignment.dff,
        );

        info!(
            subject = %subject.name(),
            cells = subject.cells().len(),
            sessions = subject.sessions().len(),
            "Subject assembled"
        );
        Ok(subject)
    }

    fn fetch_or_compute(&self, key: &SubjectKey) -> Result<(Subject, Origin)> {
        if let Some(subject) = self.cached_subject(key)? {
            return Ok((subject, Origin::Cached));
        }

        let subject = self.assemble_subject(key.container)?;
        if subject.key() != *key {
            return Err(ValidationError::invalid_field(
                "key",
                format!("container {} is cached as {}", key.container, subject.key()),
            )
            .into());
        }

        self.store.save(&subject)?;
        Ok((subject, Origin::Computed))
    }

    // =========================================================================
    // Many subjects
    // =========================================================================

    /// Lists the subjects matching `filter`, one key per container.
    ///
    /// # Errors
    ///
    /// Returns `OphysError::Config` if the filter's stimulus differs from the
    /// configured one, or a gateway error if the catalogue query fails.
    #[instrument(skip(self, filter), fields(stimulus = %filter.stimulus))]
    pub fn discover(&self, filter: &SubjectFilter) -> Result<Vec<SubjectKey>> {
        if filter.stimulus != self.config.stimulus {
            return Err(OphysError::config(format!(
                "filter stimulus '{}' differs from configured stimulus '{}'",
                filter.stimulus, self.config.stimulus
            )));
        }

        let rows = self.source.experiments(&filter.query())?;
        let keys = select_subjects(&rows, filter);
        info!(experiments = rows.len(), subjects = keys.len(), "Subjects discovered");
        Ok(keys)
    }

    /// Makes sure every subject matching `filter` is cached.
    ///
    /// Subjects with a usable record are left alone. Failures are collected
    /// in the report and do not stop the remaining subjects.
    ///
    /// # Errors
    ///
    /// Only discovery errors are returned; per-subject errors go into the
    /// report.
    #[instrument(skip(self, filter))]
    pub fn download(&self, filter: &SubjectFilter) -> Result<BatchReport> {
        let keys = self.discover(filter)?;
        let outcomes = self.process(&keys, |key| {
            self.fetch_or_compute(key).map(|(_, origin)| origin)
        });

        let mut report = BatchReport::new(keys.len());
        for (key, outcome) in keys.iter().zip(outcomes) {
            report.record(key.container, &outcome);
            if let Err(err) = outcome {
                report.fail(key.container, err);
            }
        }

        info!(
            total = report.total,
            computed = report.computed.len(),
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Download finished"
        );
        Ok(report)
    }

    /// Returns every subject matching `filter` that could be loaded or
    /// computed, in container order, with a report of the rest.
    #[instrument(skip(self, filter))]
    pub fn load_subjects(&self, filter: &SubjectFilter) -> Result<(Vec<Subject>, BatchReport)> {
        let keys = self.discover(filter)?;
        let outcomes = self.process(&keys, |key| self.fetch_or_compute(key));

        let mut report = BatchReport::new(keys.len());
        let mut subjects = Vec::with_capacity(keys.len());
        for (key, outcome) in keys.iter().zip(outcomes) {
            match outcome {
                Ok((subject, origin)) => {
                    report.record(key.container, &Ok(origin));
                    subjects.push(subject);
                }
                Err(err) => report.fail(key.container, err),
            }
        }

        info!(
            loaded = subjects.len(),
            failed = report.failed.len(),
            "Subjects loaded"
        );
        Ok((subjects, report))
    }

    fn process<T, F>(&self, keys: &[SubjectKey], job: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&SubjectKey) -> Result<T> + Sync,
    {
        let total = keys.len();
        batch::run(keys, self.config.workers, |index, key| {
            info!(
                index = index + 1,
                total,
                container = %key.container,
                "Processing subject"
            );
            let result = job(key);
            if let Err(err) = &result {
                warn!(container = %key.container, error = %err, "Subject failed");
            }
            result
        })
    }
}
