//! Trial window extraction for one session.
//!
//! Windows are anchored at the start sample of each repeat and always span
//! exactly `window_length` samples. The epoch table's end sample is kept for
//! reference but never shortens or lengthens a window, so every session of
//! every subject contributes windows of identical length.

use std::collections::HashMap;

use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WindowSpec;
use crate::error::ExtractionError;
use crate::source::SessionData;
use crate::types::CellId;

/// One repeat of a stimulus within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialWindow {
    /// Repeat label, 1-based.
    pub repeat: usize,
    /// First sample of the window.
    pub start: usize,
    /// End sample of the repeat's last epoch, as reported by the epoch table.
    pub epoch_end: usize,
}

/// Windows extracted from one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionWindows {
    /// Repeat boundaries, ordered by repeat.
    pub trials: Vec<TrialWindow>,
    /// `[cell × repeat × sample]`, cells in the requested order.
    pub traces: Array3<f32>,
}

/// Locates the `spec.repeats` repeats of `stimulus` and slices a
/// fixed-length window per repeat for each of `cells`.
///
/// Repeat groups are keyed by the epoch table's zero-based repeat index;
/// groups at or beyond `spec.repeats` are ignored. A group's start is the
/// start sample of its first row in table order.
///
/// # Errors
///
/// - [`ExtractionError::ShapeMismatch`] if the cell list and trace rows differ
/// - [`ExtractionError::CellNotFound`] if a requested cell is absent
/// - [`ExtractionError::MissingStimulusData`] if any repeat group is absent
/// - [`ExtractionError::StartOutOfRange`] if a window runs past the trace
pub fn extract_windows(
    data: &SessionData,
    stimulus: &str,
    cells: &[CellId],
    spec: WindowSpec,
) -> Result<SessionWindows, ExtractionError> {
    if data.cell_ids.len() != data.traces.nrows() {
        return Err(ExtractionError::ShapeMismatch {
            session: data.session,
            cells: data.cell_ids.len(),
            rows: data.traces.nrows(),
        });
    }

    let rows = select_rows(data, cells)?;
    let trials = locate_trials(data, stimulus, spec.repeats)?;

    let trace_length = data.trace_length();
    for trial in &trials {
        let fits = trial
            .start
            .checked_add(spec.window_length)
            .is_some_and(|end| end <= trace_length);
        if !fits {
            return Err(ExtractionError::StartOutOfRange {
                session: data.session,
                repeat: trial.repeat,
                start: trial.start,
                window_length: spec.window_length,
                trace_length,
            });
        }
    }

    let mut traces = Array3::<f32>::zeros((rows.len(), spec.repeats, spec.window_length));
    for (c, &row) in rows.iter().enumerate() {
        for (r, trial) in trials.iter().enumerate() {
            let end = trial.start + spec.window_length;
            traces
                .slice_mut(s![c, r, ..])
                .assign(&data.traces.slice(s![row, trial.start..end]));
        }
    }

    debug!(
        session = %data.session,
        cells = rows.len(),
        repeats = spec.repeats,
        "Extracted trial windows"
    );

    Ok(SessionWindows { trials, traces })
}

/// Maps each requested cell to its trace row, keeping the requested order.
fn select_rows(data: &SessionData, cells: &[CellId]) -> Result<Vec<usize>, ExtractionError> {
    let mut index: HashMap<CellId, usize> = HashMap::with_capacity(data.cell_ids.len());
    for (row, cell) in data.cell_ids.iter().enumerate() {
        index.entry(*cell).or_insert(row);
    }

    cells
        .iter()
        .map(|cell| {
            index
                .get(cell)
                .copied()
                .ok_or(ExtractionError::CellNotFound {
                    session: data.session,
                    cell: *cell,
                })
        })
        .collect()
}

/// Finds the start (and reported end) of repeats `0..repeats`.
fn locate_trials(
    data: &SessionData,
    stimulus: &str,
    repeats: usize,
) -> Result<Vec<TrialWindow>, ExtractionError> {
    let mut bounds: Vec<Option<(usize, usize)>> = vec![None; repeats];

    for row in data.stimulus_epochs(stimulus) {
        let Ok(repeat) = usize::try_from(row.repeat) else {
            continue;
        };
        if let Some(slot) = bounds.get_mut(repeat) {
            slot.get_or_insert((row.start, row.end)).1 = row.end;
        }
    }

    let found = bounds.iter().filter(|b| b.is_some()).count();
    if found < repeats {
        return Err(ExtractionError::MissingStimulusData {
            session: data.session,
            stimulus: stimulus.to_string(),
            found,
            expected: repeats,
        });
    }

    Ok(bounds
        .into_iter()
        .enumerate()
        .filter_map(|(r, b)| {
            b.map(|(start, epoch_end)| TrialWindow {
                repeat: r + 1,
                start,
                epoch_end,
            })
        })
        .collect())
}
