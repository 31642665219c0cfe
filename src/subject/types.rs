//! Type definitions for subjects.
//!
//! A **subject** is one experiment container (one mouse imaged in one area
//! at one depth) together with its aligned ΔF/F tensor.

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{s, Array4, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::align::TrialWindow;
use crate::config::WindowSpec;
use crate::error::ValidationError;
use crate::source::{parse_cre_line, ContainerInfo, ExperimentSummary, SessionInfo};
use crate::types::{CellId, ContainerId, SessionId};

/// File extension of cached subject records.
pub const RECORD_EXTENSION: &str = "redb";

/// Cache address of a subject: container id, targeted area, imaging depth.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Experiment container id.
    pub container: ContainerId,
    /// Targeted brain area.
    pub area: String,
    /// Imaging depth in µm.
    pub depth: u32,
}

impl SubjectKey {
    /// Creates a key.
    pub fn new(container: ContainerId, area: impl Into<String>, depth: u32) -> Self {
        Self {
            container,
            area: area.into(),
            depth,
        }
    }

    /// Key of a container.
    pub fn from_container(container: &ContainerInfo) -> Self {
        Self::new(
            container.id,
            container.targeted_structure.clone(),
            container.imaging_depth,
        )
    }

    /// Key of the container a catalogue row belongs to.
    pub fn from_summary(summary: &ExperimentSummary) -> Self {
        Self::new(
            summary.container,
            summary.targeted_structure.clone(),
            summary.imaging_depth,
        )
    }

    /// Checks that the area can be used as a directory name.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for an empty area or one containing path
    /// separators or `..`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.area.is_empty() {
            return Err(ValidationError::required_field("area"));
        }
        if self.area.contains(['/', '\\']) || self.area == "." || self.area == ".." {
            return Err(ValidationError::invalid_field(
                "area",
                format!("'{}' is not a valid directory name", self.area),
            ));
        }
        Ok(())
    }

    /// `<container>_<area>_<depth>.redb`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.{}",
            self.container, self.area, self.depth, RECORD_EXTENSION
        )
    }

    /// `<root>/<area>/<file_name>`
    pub fn path_in(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.area).join(self.file_name())
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.container, self.area, self.depth)
    }
}

/// Session metadata kept with a subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: SessionId,
    /// Age at acquisition, in days.
    pub acquisition_age_days: u32,
    /// Session protocol.
    pub session_type: String,
    /// Stimuli presented.
    pub stimuli: Vec<String>,
    /// Repeat boundaries of the aligned stimulus.
    pub trials: Vec<TrialWindow>,
}

impl SessionRecord {
    /// Combines session metadata with its extracted repeat boundaries.
    pub fn new(info: SessionInfo, trials: Vec<TrialWindow>) -> Self {
        Self {
            id: info.id,
            acquisition_age_days: info.acquisition_age_days,
            session_type: info.session_type,
            stimuli: info.stimuli,
            trials,
        }
    }
}

/// A subject and its aligned tensor.
///
/// Immutable once built or loaded: every field is read through an accessor.
///
/// # Axes
///
/// `dff()[[c, s, r, t]]` is sample `t` of repeat `r` in session `s` for cell
/// `cells()[c]`. Sessions are ordered by acquisition age, cells by id.
#[derive(Clone, Debug, PartialEq)]
pub struct Subject {
    container: ContainerInfo,
    stimulus: String,
    window: WindowSpec,
    sessions: Vec<SessionRecord>,
    cells: Vec<CellId>,
    dff: Array4<f32>,
}

impl Subject {
    /// Assembles a subject from its parts.
    ///
    /// Callers guarantee that the tensor shape matches the other fields;
    /// the cache decoder checks it before calling.
    pub(crate) fn from_parts(
        container: ContainerInfo,
        stimulus: String,
        window: WindowSpec,
        sessions: Vec<SessionRecord>,
        cells: Vec<CellId>,
        dff: Array4<f32>,
    ) -> Self {
        Self {
            container,
            stimulus,
            window,
            sessions,
            cells,
            dff,
        }
    }

    /// Cache key.
    pub fn key(&self) -> SubjectKey {
        SubjectKey::from_container(&self.container)
    }

    /// `Mouse_<container>_<area>_<depth>`
    pub fn name(&self) -> String {
        format!("Mouse_{}", self.key())
    }

    /// Container metadata.
    #[inline]
    pub fn container(&self) -> &ContainerInfo {
        &self.container
    }

    /// Container id.
    #[inline]
    pub fn container_id(&self) -> ContainerId {
        self.container.id
    }

    /// Targeted brain area.
    #[inline]
    pub fn targeted_structure(&self) -> &str {
        &self.container.targeted_structure
    }

    /// Imaging depth in µm.
    #[inline]
    pub fn imaging_depth(&self) -> u32 {
        self.container.imaging_depth
    }

    /// Cre driver line of the donor.
    pub fn cre_line(&self) -> Option<&str> {
        parse_cre_line(&self.container.specimen_name)
    }

    /// Stimulus the tensor was aligned to.
    #[inline]
    pub fn stimulus(&self) -> &str {
        &self.stimulus
    }

    /// Repeat count and window length used.
    #[inline]
    pub fn window_spec(&self) -> WindowSpec {
        self.window
    }

    /// Sessions in tensor order (ascending acquisition age).
    #[inline]
    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    /// Cell axis (ascending id).
    #[inline]
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    /// Aligned tensor, `[cell × session × repeat × sample]`.
    #[inline]
    pub fn dff(&self) -> &Array4<f32> {
        &self.dff
    }

    /// Consumes the subject, returning the tensor.
    pub fn into_dff(self) -> Array4<f32> {
        self.dff
    }

    /// Position of `cell` on the cell axis.
    pub fn cell_index(&self, cell: CellId) -> Option<usize> {
        self.cells.binary_search(&cell).ok()
    }

    /// Window of `cell` for `repeat` (1-based) of the session at
    /// `session_index`.
    pub fn trace(
        &self,
        cell: CellId,
        session_index: usize,
        repeat: usize,
    ) -> Option<ArrayView1<'_, f32>> {
        let c = self.cell_index(cell)?;
        if session_index >= self.sessions.len() || repeat == 0 || repeat > self.window.repeats {
            return None;
        }
        Some(self.dff.slice(s![c, session_index, repeat - 1, ..]))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
