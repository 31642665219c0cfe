//! Integration tests for the alignment pipeline.
//!
//! Covers window extraction on a full-size session, repeat-count and range
//! failures, cell intersection across sessions, and session ordering, both
//! through the pure `align` functions and through the `OphysCache` facade.

use std::sync::Arc;

use ndarray::{s, Array2};
use ophys_tensor::align::{align_sessions, extract_windows};
use ophys_tensor::{
    CellId, Config, ContainerId, ContainerInfo, EpochRow, ExtractionError, InMemorySource,
    OphysCache, OphysError, SessionData, SessionId, SessionInfo, WindowSpec,
};
use tempfile::tempdir;

const SPEC: WindowSpec = WindowSpec {
    repeats: 10,
    window_length: 900,
};

/// Epoch rows for `groups` repeats of `stimulus`, 900 samples apart.
fn epochs(stimulus: &str, groups: u32) -> Vec<EpochRow> {
    (0..groups)
        .map(|r| EpochRow {
            stimulus: stimulus.to_string(),
            repeat: r,
            start: 900 * r as usize,
            end: 900 * r as usize + 899,
        })
        .collect()
}

/// A session whose sample values encode session, cell and time.
fn session(id: u64, cells: &[u64], samples: usize, epochs: Vec<EpochRow>) -> SessionData {
    SessionData {
        session: SessionId(id),
        cell_ids: cells.iter().copied().map(CellId).collect(),
        traces: Array2::from_shape_fn((cells.len(), samples), |(c, t)| {
            id as f32 * 1.0e6 + cells[c] as f32 * 1.0e4 + t as f32
        }),
        epochs,
    }
}

fn info(id: u64, age: u32) -> SessionInfo {
    SessionInfo {
        id: SessionId(id),
        acquisition_age_days: age,
        session_type: "three_session_A".to_string(),
        stimuli: vec!["X".to_string()],
    }
}

fn container(id: u64) -> ContainerInfo {
    ContainerInfo {
        id: ContainerId(id),
        targeted_structure: "VISp".to_string(),
        imaging_depth: 175,
        specimen_name: "Emx1-IRES-Cre;Camk2a-tTA;Ai93-1".to_string(),
    }
}

fn open_cache(source: Arc<InMemorySource>) -> (OphysCache, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = Config {
        stimulus: "X".to_string(),
        ..Config::with_cache_root(dir.path())
    };
    let cache = OphysCache::open(config, source).unwrap();
    (cache, dir)
}

// ============================================================================
// Window extraction
// ============================================================================

#[test]
fn test_ten_repeats_of_five_cells() {
    let data = session(1, &[10, 11, 12, 13, 14], 9000, epochs("X", 10));
    let cells = data.cell_ids.clone();

    let windows = extract_windows(&data, "X", &cells, SPEC).unwrap();

    assert_eq!(windows.traces.shape(), &[5, 10, 900]);
    for r in 0..10 {
        let expected = data.traces.slice(s![.., 900 * r..900 * r + 900]);
        assert_eq!(windows.traces.slice(s![.., r, ..]), expected);
    }

    let labels: Vec<usize> = windows.trials.iter().map(|t| t.repeat).collect();
    assert_eq!(labels, (1..=10).collect::<Vec<_>>());
    assert_eq!(windows.trials[3].start, 2700);
}

#[test]
fn test_eight_repeat_groups_is_missing_data() {
    let data = session(1, &[1, 2], 9000, epochs("X", 8));
    let err = extract_windows(&data, "X", &data.cell_ids, SPEC).unwrap_err();

    match err {
        ExtractionError::MissingStimulusData {
            session,
            found,
            expected,
            ..
        } => {
            assert_eq!(session, SessionId(1));
            assert_eq!(found, 8);
            assert_eq!(expected, 10);
        }
        other => panic!("expected MissingStimulusData, got {other:?}"),
    }
}

#[test]
fn test_window_past_trace_end_is_out_of_range() {
    // Last repeat starts at 8100; 8100 + 900 > 8999.
    let data = session(1, &[1, 2], 8999, epochs("X", 10));
    let err = extract_windows(&data, "X", &data.cell_ids, SPEC).unwrap_err();

    match err {
        ExtractionError::StartOutOfRange {
            repeat,
            start,
            trace_length,
            ..
        } => {
            assert_eq!(repeat, 10);
            assert_eq!(start, 8100);
            assert_eq!(trace_length, 8999);
        }
        other => panic!("expected StartOutOfRange, got {other:?}"),
    }
}

#[test]
fn test_other_stimuli_are_ignored() {
    let mut rows = epochs("Y", 10);
    rows.extend(epochs("X", 10));
    let data = session(1, &[1], 9000, rows);

    let windows = extract_windows(&data, "X", &data.cell_ids, SPEC).unwrap();
    assert_eq!(windows.trials.len(), 10);
    assert!(extract_windows(&data, "Z", &data.cell_ids, SPEC).is_err());
}

#[test]
fn test_extraction_is_deterministic() {
    let data = session(3, &[5, 6, 7], 9000, epochs("X", 10));
    let first = extract_windows(&data, "X", &data.cell_ids, SPEC).unwrap();
    let second = extract_windows(&data, "X", &data.cell_ids, SPEC).unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Cell intersection
// ============================================================================

#[test]
fn test_common_cells_share_an_axis() {
    let sessions = vec![
        session(1, &[1, 2, 3], 9000, epochs("X", 10)),
        session(2, &[4, 3, 2], 9000, epochs("X", 10)),
    ];
    let alignment = align_sessions(&sessions, "X", SPEC).unwrap();

    assert_eq!(alignment.cells, vec![CellId(2), CellId(3)]);
    assert_eq!(alignment.dff.shape(), &[2, 2, 10, 900]);

    // Cell 2 sits at position 0 in both sessions.
    assert_eq!(alignment.dff[[0, 0, 0, 0]], 1.0e6 + 2.0e4);
    assert_eq!(alignment.dff[[0, 1, 0, 0]], 2.0e6 + 2.0e4);
    assert_eq!(alignment.dff[[1, 1, 2, 5]], 2.0e6 + 3.0e4 + 1805.0);
}

#[test]
fn test_disjoint_sessions_have_no_cells() {
    let sessions = vec![
        session(1, &[1, 2], 9000, epochs("X", 10)),
        session(2, &[3, 4], 9000, epochs("X", 10)),
    ];
    let alignment = align_sessions(&sessions, "X", SPEC).unwrap();
    assert!(alignment.cells.is_empty());
    assert_eq!(alignment.dff.shape(), &[0, 2, 10, 900]);
}

// ============================================================================
// Through the facade
// ============================================================================

#[test]
fn test_end_to_end_intersection() {
    let source = Arc::new(InMemorySource::new());
    source.add_container(container(100));
    source
        .add_session(
            ContainerId(100),
            info(1, 20),
            session(1, &[1, 2, 3], 9000, epochs("X", 10)),
        )
        .unwrap();
    source
        .add_session(
            ContainerId(100),
            info(2, 40),
            session(2, &[2, 3, 4], 9000, epochs("X", 10)),
        )
        .unwrap();
    let (cache, _dir) = open_cache(source);

    let subject = cache.subject(ContainerId(100)).unwrap();

    assert_eq!(subject.cells(), &[CellId(2), CellId(3)]);
    assert_eq!(subject.dff().shape()[0], 2);
    assert_eq!(subject.cell_index(CellId(2)), Some(0));
    let first = subject.trace(CellId(2), 0, 1).unwrap();
    let second = subject.trace(CellId(2), 1, 1).unwrap();
    assert_eq!(first[0], 1.0e6 + 2.0e4);
    assert_eq!(second[0], 2.0e6 + 2.0e4);
    assert_eq!(subject.name(), "Mouse_100_VISp_175");
}

#[test]
fn test_sessions_ordered_by_acquisition_age() {
    let source = Arc::new(InMemorySource::new());
    source.add_container(container(200));
    for (id, age) in [(21, 30), (22, 10), (23, 20)] {
        source
            .add_session(
                ContainerId(200),
                info(id, age),
                session(id, &[1, 2], 9000, epochs("X", 10)),
            )
            .unwrap();
    }
    let (cache, _dir) = open_cache(source);

    let subject = cache.subject(ContainerId(200)).unwrap();

    let ages: Vec<u32> = subject
        .sessions()
        .iter()
        .map(|s| s.acquisition_age_days)
        .collect();
    assert_eq!(ages, vec![10, 20, 30]);
    let ids: Vec<SessionId> = subject.sessions().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![SessionId(22), SessionId(23), SessionId(21)]);
    // Session axis follows the same order.
    assert_eq!(subject.dff()[[0, 0, 0, 0]], 22.0e6 + 1.0e4);
}

#[test]
fn test_failed_extraction_writes_nothing() {
    let source = Arc::new(InMemorySource::new());
    source.add_container(container(300));
    source
        .add_session(
            ContainerId(300),
            info(31, 10),
            session(31, &[1], 9000, epochs("X", 10)),
        )
        .unwrap();
    source
        .add_session(
            ContainerId(300),
            info(32, 20),
            session(32, &[1], 9000, epochs("X", 8)),
        )
        .unwrap();
    let (cache, _dir) = open_cache(source);

    let err = cache.subject(ContainerId(300)).unwrap_err();
    assert!(err.is_extraction());
    assert!(matches!(
        err,
        OphysError::Extraction(ExtractionError::MissingStimulusData { .. })
    ));

    let key = ophys_tensor::SubjectKey::new(ContainerId(300), "VISp", 175);
    assert!(!cache.store().contains(&key));
}
