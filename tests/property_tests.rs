//! Property-based tests for cell intersection and window extraction.

use std::collections::BTreeSet;

use ndarray::{s, Array2};
use ophys_tensor::align::{common_cell_order, common_cells, extract_windows};
use ophys_tensor::{CellId, EpochRow, SessionData, SessionId, WindowSpec};
use proptest::prelude::*;

fn cell_sets() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(0u64..40, 0..25), 1..6)
}

fn to_ids(raw: &[u64]) -> Vec<CellId> {
    raw.iter().copied().map(CellId).collect()
}

/// Session with `repeats` evenly spaced repeat groups, rows shuffled by
/// `rotate`.
fn session(cells: usize, repeats: usize, spacing: usize, rotate: usize) -> SessionData {
    let samples = repeats * spacing;
    let mut epochs: Vec<EpochRow> = (0..repeats)
        .map(|r| EpochRow {
            stimulus: "X".to_string(),
            repeat: r as u32,
            start: r * spacing,
            end: r * spacing + spacing - 1,
        })
        .collect();
    if !epochs.is_empty() {
        let by = rotate % epochs.len();
        epochs.rotate_left(by);
    }
    SessionData {
        session: SessionId(1),
        cell_ids: (0..cells as u64).map(CellId).collect(),
        traces: Array2::from_shape_fn((cells, samples), |(c, t)| (c * 7919 + t) as f32 * 0.5),
        epochs,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The resolver returns exactly the set intersection.
    #[test]
    fn prop_common_cells_is_intersection(sets in cell_sets()) {
        let ids: Vec<Vec<CellId>> = sets.iter().map(|s| to_ids(s)).collect();
        let common = common_cells(ids.iter().map(Vec::as_slice));

        let mut expected: BTreeSet<CellId> = ids[0].iter().copied().collect();
        for set in &ids[1..] {
            let other: BTreeSet<CellId> = set.iter().copied().collect();
            expected = expected.intersection(&other).copied().collect();
        }
        prop_assert_eq!(common, expected);
    }

    /// The cell order is ascending and free of duplicates.
    #[test]
    fn prop_common_cell_order_is_sorted(sets in cell_sets()) {
        let ids: Vec<Vec<CellId>> = sets.iter().map(|s| to_ids(s)).collect();
        let order = common_cell_order(ids.iter().map(Vec::as_slice));
        prop_assert!(order.windows(2).all(|w| w[0] < w[1]));
        for cell in &order {
            prop_assert!(ids.iter().all(|set| set.contains(cell)));
        }
    }

    /// Disjoint sessions share no cells.
    #[test]
    fn prop_disjoint_sets_are_empty(a in prop::collection::vec(0u64..50, 0..20),
                                    b in prop::collection::vec(50u64..100, 0..20)) {
        let (a, b) = (to_ids(&a), to_ids(&b));
        prop_assert!(common_cells([a.as_slice(), b.as_slice()]).is_empty());
    }

    /// Window r equals the trace slice starting at repeat r's first sample,
    /// whatever the row order of the epoch table.
    #[test]
    fn prop_windows_match_trace_slices(
        cells in 1usize..6,
        repeats in 1usize..8,
        spacing in 1usize..20,
        window_fraction in 1usize..=4,
        rotate in 0usize..8,
    ) {
        let window_length = (spacing * window_fraction / 4).max(1);
        let data = session(cells, repeats, spacing, rotate);
        let spec = WindowSpec { repeats, window_length };

        let windows = extract_windows(&data, "X", &data.cell_ids, spec).unwrap();

        prop_assert_eq!(windows.traces.shape(), &[cells, repeats, window_length]);
        for r in 0..repeats {
            let start = r * spacing;
            let expected = data.traces.slice(s![.., start..start + window_length]);
            prop_assert_eq!(windows.traces.slice(s![.., r, ..]), expected);
            prop_assert_eq!(windows.trials[r].repeat, r + 1);
        }
    }

    /// Extraction is a pure function of its inputs.
    #[test]
    fn prop_extraction_is_deterministic(
        cells in 1usize..5,
        repeats in 1usize..6,
        spacing in 1usize..12,
    ) {
        let data = session(cells, repeats, spacing, 0);
        let spec = WindowSpec { repeats, window_length: spacing };
        let first = extract_windows(&data, "X", &data.cell_ids, spec).unwrap();
        let second = extract_windows(&data, "X", &data.cell_ids, spec).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Asking for more repeats than the table holds always fails.
    #[test]
    fn prop_too_few_repeats_fail(present in 0usize..6, extra in 1usize..4) {
        let data = session(2, present, 10, 0);
        let spec = WindowSpec { repeats: present + extra, window_length: 5 };
        prop_assert!(extract_windows(&data, "X", &data.cell_ids, spec).is_err());
    }
}
