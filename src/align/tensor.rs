//! Assembly of per-session windows into the aligned tensor.

use ndarray::{s, Array4};
use tracing::debug;

use crate::config::WindowSpec;
use crate::error::ExtractionError;
use crate::source::{SessionData, SessionInfo};
use crate::types::CellId;

use super::cells::common_cell_order;
use super::window::{extract_windows, TrialWindow};

/// Aligned tensor of one subject plus the axes that index it.
#[derive(Clone, Debug, PartialEq)]
pub struct Alignment {
    /// Cell axis, ascending id.
    pub cells: Vec<CellId>,
    /// Repeat boundaries per session, in session-axis order.
    pub trials: Vec<Vec<TrialWindow>>,
    /// `[cell × session × repeat × sample]` ΔF/F.
    pub dff: Array4<f32>,
}

impl Alignment {
    /// Number of sessions on the session axis.
    #[inline]
    pub fn num_sessions(&self) -> usize {
        self.dff.shape()[1]
    }
}

/// Sorts sessions by acquisition age, oldest recording first.
///
/// The sort is stable: sessions acquired at the same age keep the order the
/// data source returned them in.
pub fn sort_by_acquisition_age(sessions: &mut [SessionInfo]) {
    sessions.sort_by_key(|s| s.acquisition_age_days);
}

/// Builds the aligned tensor from sessions already in session-axis order.
///
/// The cell axis is the ascending intersection of every session's cells.
/// With no common cells the tensor has a zero-length cell axis.
///
/// # Errors
///
/// Fails on the first session whose windows cannot be extracted; no partial
/// tensor is returned.
pub fn align_sessions(
    sessions: &[SessionData],
    stimulus: &str,
    spec: WindowSpec,
) -> Result<Alignment, ExtractionError> {
    let cells = common_cell_order(sessions.iter().map(|d| d.cell_ids.as_slice()));

    let mut dff = Array4::<f32>::zeros((
        cells.len(),
        sessions.len(),
        spec.repeats,
        spec.window_length,
    ));
    let mut trials = Vec::with_capacity(sessions.len());

    for (index, data) in sessions.iter().enumerate() {
        let windows = extract_windows(data, stimulus, &cells, spec)?;
        dff.slice_mut(s![.., index, .., ..]).assign(&windows.traces);
        trials.push(windows.trials);
    }

    debug!(
        cells = cells.len(),
        sessions = sessions.len(),
        "Sessions aligned"
    );

    Ok(Alignment { cells, trials, dff })
}
