//! Data source abstractions.
//!
//! The remote data repository is reached through the [`DataSource`] trait.
//! The crate never talks to the network itself: callers hand an
//! implementation to [`OphysCache::open`](crate::OphysCache::open), and
//! every query goes through that instance.
//!
//! # Providers
//!
//! - [`InMemorySource`] - Sessions held in memory (tests, embedding apps)
//! - [`JsonDirectorySource`] - Sessions previously exported to JSON files
//!
//! # Example
//!
//! ```rust,ignore
//! use ophys_tensor::source::{DataSource, InMemorySource};
//!
//! let source = InMemorySource::new();
//! source.add_container(container);
//! source.add_session(container.id, info, data)?;
//!
//! let sessions = source.sessions(container.id)?;
//! ```

mod json;
mod memory;

pub use json::{JsonDirectorySource, SessionExport};
pub use memory::InMemorySource;

use std::ops::RangeInclusive;
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{CellId, ContainerId, SessionId};

/// Query over the experiment catalogue.
///
/// Empty `areas` and `None` filters match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExperimentQuery {
    /// Only sessions that presented this stimulus.
    pub stimulus: Option<String>,
    /// Only containers targeting one of these areas.
    pub areas: Vec<String>,
    /// Only containers imaged within this depth range (µm).
    pub depth_range: Option<RangeInclusive<u32>>,
}

impl ExperimentQuery {
    /// Returns true if `session` of `container` satisfies the query.
    pub fn matches(&self, container: &ContainerInfo, session: &SessionInfo) -> bool {
        if let Some(stimulus) = &self.stimulus {
            if !session.stimuli.iter().any(|s| s == stimulus) {
                return false;
            }
        }

        if !self.areas.is_empty()
            && !self
                .areas
                .iter()
                .any(|area| *area == container.targeted_structure)
        {
            return false;
        }

        match &self.depth_range {
            Some(range) => range.contains(&container.imaging_depth),
            None => true,
        }
    }
}

/// One row of the experiment catalogue: a session plus its container's
/// targeting metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// Session id.
    pub session: SessionId,
    /// Owning container.
    pub container: ContainerId,
    /// Targeted brain area (e.g. `VISp`).
    pub targeted_structure: String,
    /// Imaging depth in µm.
    pub imaging_depth: u32,
    /// Donor specimen name, `;`-separated genotype fields.
    pub specimen_name: String,
}

impl ExperimentSummary {
    /// Builds the catalogue row for `session` of `container`.
    pub fn new(container: &ContainerInfo, session: &SessionInfo) -> Self {
        Self {
            session: session.id,
            container: container.id,
            targeted_structure: container.targeted_structure.clone(),
            imaging_depth: container.imaging_depth,
            specimen_name: container.specimen_name.clone(),
        }
    }

    /// Cre driver line parsed from the specimen name.
    pub fn cre_line(&self) -> Option<&str> {
        parse_cre_line(&self.specimen_name)
    }
}

/// Experiment container (subject) metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container id.
    pub id: ContainerId,
    /// Targeted brain area.
    pub targeted_structure: String,
    /// Imaging depth in µm.
    pub imaging_depth: u32,
    /// Donor specimen name.
    pub specimen_name: String,
}

impl ContainerInfo {
    /// Cre driver line parsed from the specimen name.
    pub fn cre_line(&self) -> Option<&str> {
        parse_cre_line(&self.specimen_name)
    }
}

/// Extracts the Cre line from a specimen name such as
/// `Cux2-CreERT2;Camk2a-tTA;Ai93-222426`.
///
/// The line is the second `;`-separated field.
pub fn parse_cre_line(specimen_name: &str) -> Option<&str> {
    specimen_name
        .split(';')
        .nth(1)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Metadata of one recording session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Age of the mouse at acquisition, in days.
    pub acquisition_age_days: u32,
    /// Session protocol (e.g. `three_session_A`).
    pub session_type: String,
    /// Stimuli presented during the session.
    pub stimuli: Vec<String>,
}

/// One interval of the stimulus epoch table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRow {
    /// Stimulus name.
    pub stimulus: String,
    /// Zero-based repeat index as reported by the source.
    pub repeat: u32,
    /// First sample of the interval.
    pub start: usize,
    /// Last sample of the interval.
    pub end: usize,
}

/// Raw data of one recording session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionData {
    /// Session id.
    pub session: SessionId,
    /// Cell ids in trace-row order.
    pub cell_ids: Vec<CellId>,
    /// ΔF/F traces, `[cell × sample]`.
    pub traces: Array2<f32>,
    /// Stimulus epoch table.
    pub epochs: Vec<EpochRow>,
}

impl SessionData {
    /// Number of samples per trace.
    #[inline]
    pub fn trace_length(&self) -> usize {
        self.traces.ncols()
    }

    /// Epoch rows of one stimulus, in table order.
    pub fn stimulus_epochs<'a>(&'a self, stimulus: &'a str) -> impl Iterator<Item = &'a EpochRow> {
        self.epochs.iter().filter(move |row| row.stimulus == stimulus)
    }
}

/// Gateway to the imaging data repository.
///
/// Implementations must be `Send + Sync`; the multi-worker batch path calls
/// them from several threads. Calls block until the source answers and are
/// never retried by this crate.
///
/// # Implementing a Custom Source
///
/// ```rust,ignore
/// use ophys_tensor::source::*;
///
/// struct HttpSource { client: ApiClient }
///
/// impl DataSource for HttpSource {
///     fn experiments(&self, q: &ExperimentQuery) -> Result<Vec<ExperimentSummary>> { ... }
///     fn container(&self, id: ContainerId) -> Result<ContainerInfo> { ... }
///     fn sessions(&self, id: ContainerId) -> Result<Vec<SessionInfo>> { ... }
///     fn session_data(&self, id: SessionId) -> Result<SessionData> { ... }
/// }
/// ```
pub trait DataSource: Send + Sync {
    /// Lists catalogue rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the catalogue cannot be read.
    fn experiments(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentSummary>>;

    /// Fetches container metadata.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ContainerNotFound` for unknown ids.
    fn container(&self, id: ContainerId) -> Result<ContainerInfo>;

    /// Fetches the sessions of a container, in source order.
    fn sessions(&self, container: ContainerId) -> Result<Vec<SessionInfo>>;

    /// Fetches a session's cell ids, traces and epoch table.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::SessionNotFound` for unknown ids.
    fn session_data(&self, session: SessionId) -> Result<SessionData>;
}

impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    fn experiments(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentSummary>> {
        (**self).experiments(query)
    }

    fn container(&self, id: ContainerId) -> Result<ContainerInfo> {
        (**self).container(id)
    }

    fn sessions(&self, container: ContainerId) -> Result<Vec<SessionInfo>> {
        (**self).sessions(container)
    }

    fn session_data(&self, session: SessionId) -> Result<SessionData> {
        (**self).session_data(session)
    }
}
