//! In-memory data source.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{GatewayError, OphysError, Result, ValidationError};
use crate::types::{ContainerId, SessionId};

use super::{
    ContainerInfo, DataSource, ExperimentQuery, ExperimentSummary, SessionData, SessionInfo,
};

#[derive(Debug, Default)]
struct Catalogue {
    containers: BTreeMap<ContainerId, ContainerInfo>,
    sessions: BTreeMap<ContainerId, Vec<SessionInfo>>,
    data: HashMap<SessionId, SessionData>,
}

/// Data source backed by in-memory maps.
///
/// Sessions are returned in insertion order, so tests can feed sessions
/// out of chronological order and check that the assembler sorts them.
/// Raw-data fetches are counted; [`fetch_count`](Self::fetch_count) tells a
/// test whether a cache hit really skipped the source.
#[derive(Debug, Default)]
pub struct InMemorySource {
    catalogue: RwLock<Catalogue>,
    fetches: AtomicUsize,
}

impl InMemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a container.
    pub fn add_container(&self, container: ContainerInfo) {
        let mut catalogue = self.write();
        catalogue.sessions.entry(container.id).or_default();
        catalogue.containers.insert(container.id, container);
    }

    /// Registers a session of an existing container together with its data.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ContainerNotFound` if the container was not
    /// added first, and `ValidationError` if `data` belongs to another
    /// session id.
    pub fn add_session(
        &self,
        container: ContainerId,
        info: SessionInfo,
        data: SessionData,
    ) -> Result<()> {
        if data.session != info.id {
            return Err(ValidationError::invalid_field(
                "session",
                format!("data is for session {}, info for {}", data.session, info.id),
            )
            .into());
        }

        let mut catalogue = self.write();
        if !catalogue.containers.contains_key(&container) {
            return Err(GatewayError::ContainerNotFound(container).into());
        }
        catalogue.data.insert(info.id, data);
        catalogue.sessions.entry(container).or_default().push(info);
        Ok(())
    }

    /// Number of `session_data` calls answered so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Catalogue> {
        // Inserts never leave the maps half-updated, so poisoning is ignored.
        self.catalogue.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Catalogue> {
        self.catalogue.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl DataSource for InMemorySource {
    fn experiments(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentSummary>> {
        let catalogue = self.read();
        let mut rows = Vec::new();
        for (id, container) in &catalogue.containers {
            for session in catalogue.sessions.get(id).into_iter().flatten() {
                if query.matches(container, session) {
                    rows.push(ExperimentSummary::new(container, session));
                }
            }
        }
        Ok(rows)
    }

    fn container(&self, id: ContainerId) -> Result<ContainerInfo> {
        self.read()
            .containers
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::ContainerNotFound(id).into())
    }

    fn sessions(&self, container: ContainerId) -> Result<Vec<SessionInfo>> {
        self.read()
            .sessions
            .get(&container)
            .cloned()
            .ok_or_else(|| OphysError::from(GatewayError::ContainerNotFound(container)))
    }

    fn session_data(&self, session: SessionId) -> Result<SessionData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.read()
            .data
            .get(&session)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(session).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EpochRow;
    use crate::types::CellId;
    use ndarray::Array2;

    fn container(id: u64) -> ContainerInfo {
        ContainerInfo {
            id: ContainerId(id),
            targeted_structure: "VISp".into(),
            imaging_depth: 175,
            specimen_name: "Emx1-IRES-Cre;Camk2a-tTA;Ai93-229106".into(),
        }
    }

    fn session(id: u64, age: u32) -> (SessionInfo, SessionData) {
        let info = SessionInfo {
            id: SessionId(id),
            acquisition_age_days: age,
            session_type: "three_session_A".into(),
            stimuli: vec!["natural_movie_one".into()],
        };
        let data = SessionData {
            session: SessionId(id),
            cell_ids: vec![CellId(1)],
            traces: Array2::zeros((1, 4)),
            epochs: vec![EpochRow {
                stimulus: "natural_movie_one".into(),
                repeat: 0,
                start: 0,
                end: 3,
            }],
        };
        (info, data)
    }

    #[test]
    fn test_sessions_keep_insertion_order() {
        let source = InMemorySource::new();
        source.add_container(container(1));
        for (id, age) in [(11, 30), (12, 10)] {
            let (info, data) = session(id, age);
            source.add_session(ContainerId(1), info, data).unwrap();
        }

        let ids: Vec<u64> = source
            .sessions(ContainerId(1))
            .unwrap()
            .iter()
            .map(|s| s.id.get())
            .collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn test_add_session_requires_container() {
        let source = InMemorySource::new();
        let (info, data) = session(11, 30);
        let err = source.add_session(ContainerId(9), info, data).unwrap_err();
        assert!(err.is_gateway());
    }

    #[test]
    fn test_add_session_rejects_mismatched_data() {
        let source = InMemorySource::new();
        source.add_container(container(1));
        let (info, _) = session(11, 30);
        let (_, data) = session(12, 30);
        let err = source.add_session(ContainerId(1), info, data).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_fetch_count_tracks_session_data() {
        let source = InMemorySource::new();
        source.add_container(container(1));
        let (info, data) = session(11, 30);
        source.add_session(ContainerId(1), info, data).unwrap();

        assert_eq!(source.fetch_count(), 0);
        source.session_data(SessionId(11)).unwrap();
        assert!(source.session_data(SessionId(99)).is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_experiments_filtered_by_query() {
        let source = InMemorySource::new();
        source.add_container(container(1));
        let (info, data) = session(11, 30);
        source.add_session(ContainerId(1), info, data).unwrap();

        let all = source.experiments(&ExperimentQuery::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].container, ContainerId(1));

        let none = source
            .experiments(&ExperimentQuery {
                areas: vec!["VISam".into()],
                ..Default::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }
}
