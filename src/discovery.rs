//! Subject discovery.
//!
//! Selects the experiment containers worth processing: those that presented
//! the stimulus, target one of the visual areas, were imaged at a
//! superficial depth, and come from the requested Cre line.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::source::{ExperimentQuery, ExperimentSummary};
use crate::subject::SubjectKey;

/// Visual areas targeted by default.
pub const DEFAULT_AREAS: [&str; 6] = ["VISal", "VISam", "VISl", "VISp", "VISpm", "VISrl"];

/// Default imaging depth range, in µm.
pub const DEFAULT_DEPTH_RANGE: RangeInclusive<u32> = 100..=300;

/// Default Cre line.
pub const DEFAULT_CRE_LINE: &str = "Camk2a-tTA";

/// Which subjects to select.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectFilter {
    /// Stimulus the subject's sessions must include.
    pub stimulus: String,
    /// Targeted areas to include; empty means all.
    pub areas: Vec<String>,
    /// Imaging depth range, in µm.
    pub depth_range: RangeInclusive<u32>,
    /// Cre line to require; `None` accepts all.
    pub cre_line: Option<String>,
    /// Keep at most this many subjects.
    pub max_subjects: Option<usize>,
}

impl Default for SubjectFilter {
    fn default() -> Self {
        Self {
            stimulus: "natural_movie_one".to_string(),
            areas: DEFAULT_AREAS.iter().map(|a| a.to_string()).collect(),
            depth_range: DEFAULT_DEPTH_RANGE,
            cre_line: Some(DEFAULT_CRE_LINE.to_string()),
            max_subjects: None,
        }
    }
}

impl SubjectFilter {
    /// Default filter for another stimulus.
    pub fn for_stimulus(stimulus: impl Into<String>) -> Self {
        Self {
            stimulus: stimulus.into(),
            ..Default::default()
        }
    }

    /// Restricts the filter to a single area.
    pub fn in_area(mut self, area: impl Into<String>) -> Self {
        self.areas = vec![area.into()];
        self
    }

    /// The catalogue query this filter starts from.
    pub fn query(&self) -> ExperimentQuery {
        ExperimentQuery {
            stimulus: Some(self.stimulus.clone()),
            areas: self.areas.clone(),
            depth_range: Some(self.depth_range.clone()),
        }
    }
}

/// Reduces catalogue rows to one key per container.
///
/// Rows failing the Cre-line requirement are dropped. Keys come back in
/// ascending container order and are truncated to `max_subjects`.
pub fn select_subjects(rows: &[ExperimentSummary], filter: &SubjectFilter) -> Vec<SubjectKey> {
    let mut keys: BTreeMap<_, SubjectKey> = BTreeMap::new();
    for row in rows {
        if let Some(line) = &filter.cre_line {
            if row.cre_line() != Some(line.as_str()) {
                continue;
            }
        }
        keys.entry(row.container)
            .or_insert_with(|| SubjectKey::from_summary(row));
    }

    let limit = filter.max_subjects.unwrap_or(usize::MAX);
    keys.into_values().take(limit).collect()
}
