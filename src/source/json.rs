//! Data source reading sessions exported to JSON.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//!   containers.json            Vec<ContainerInfo>
//!   sessions/<container>.json  Vec<SessionInfo>
//!   data/<session>.json        SessionExport
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{GatewayError, OphysError, Result};
use crate::types::{CellId, ContainerId, SessionId};

use super::{
    ContainerInfo, DataSource, EpochRow, ExperimentQuery, ExperimentSummary, SessionData,
    SessionInfo,
};

/// On-disk form of [`SessionData`]; traces are stored row by row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionExport {
    /// Cell ids in trace-row order.
    pub cell_ids: Vec<u64>,
    /// One ΔF/F row per cell.
    pub traces: Vec<Vec<f32>>,
    /// Stimulus epoch table.
    pub epochs: Vec<EpochRow>,
}

impl SessionExport {
    /// Converts an in-memory session into its export form.
    pub fn from_data(data: &SessionData) -> Self {
        Self {
            cell_ids: data.cell_ids.iter().map(CellId::get).collect(),
            traces: data.traces.rows().into_iter().map(|r| r.to_vec()).collect(),
            epochs: data.epochs.clone(),
        }
    }

    /// Converts the export into session data.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Malformed` if trace rows have differing lengths.
    pub fn into_data(self, session: SessionId) -> Result<SessionData> {
        let rows = self.traces.len();
        let cols = self.traces.first().map_or(0, Vec::len);
        if let Some(bad) = self.traces.iter().position(|r| r.len() != cols) {
            return Err(GatewayError::malformed(format!(
                "session {}: trace row {} has {} samples, expected {}",
                session,
                bad,
                self.traces[bad].len(),
                cols
            ))
            .into());
        }

        let flat: Vec<f32> = self.traces.into_iter().flatten().collect();
        let traces = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| GatewayError::malformed(format!("session {}: {}", session, e)))?;

        Ok(SessionData {
            session,
            cell_ids: self.cell_ids.into_iter().map(CellId).collect(),
            traces,
            epochs: self.epochs,
        })
    }
}

/// Data source over a directory of JSON exports.
#[derive(Clone, Debug)]
pub struct JsonDirectorySource {
    root: PathBuf,
}

impl JsonDirectorySource {
    /// Opens an export directory.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unavailable` if `root` is not a directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(GatewayError::unavailable(format!(
                "export directory {} does not exist",
                root.display()
            ))
            .into());
        }
        Ok(Self { root })
    }

    /// Returns the export directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the export files for one container and its sessions.
    ///
    /// Existing entries in `containers.json` with the same id are replaced.
    pub fn write_container(
        root: impl AsRef<Path>,
        container: &ContainerInfo,
        sessions: &[(SessionInfo, SessionData)],
    ) -> Result<()> {
        let root = root.as_ref();
        fs::create_dir_all(root.join("sessions"))?;
        fs::create_dir_all(root.join("data"))?;

        let index = root.join("containers.json");
        let mut containers: Vec<ContainerInfo> = if index.exists() {
            read_json(&index)?
        } else {
            Vec::new()
        };
        containers.retain(|c| c.id != container.id);
        containers.push(container.clone());
        write_json(&index, &containers)?;

        let infos: Vec<&SessionInfo> = sessions.iter().map(|(info, _)| info).collect();
        write_json(
            &root.join("sessions").join(format!("{}.json", container.id)),
            &infos,
        )?;

        for (info, data) in sessions {
            write_json(
                &root.join("data").join(format!("{}.json", info.id)),
                &SessionExport::from_data(data),
            )?;
        }
        Ok(())
    }

    fn containers(&self) -> Result<Vec<ContainerInfo>> {
        read_json(&self.root.join("containers.json"))
    }
}

impl DataSource for JsonDirectorySource {
    fn experiments(&self, query: &ExperimentQuery) -> Result<Vec<ExperimentSummary>> {
        let mut rows = Vec::new();
        for container in self.containers()? {
            for session in self.sessions(container.id)? {
                if query.matches(&container, &session) {
                    rows.push(ExperimentSummary::new(&container, &session));
                }
            }
        }
        Ok(rows)
    }

    fn container(&self, id: ContainerId) -> Result<ContainerInfo> {
        self.containers()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| GatewayError::ContainerNotFound(id).into())
    }

    fn sessions(&self, container: ContainerId) -> Result<Vec<SessionInfo>> {
        let path = self.root.join("sessions").join(format!("{}.json", container));
        if !path.exists() {
            return Err(GatewayError::ContainerNotFound(container).into());
        }
        read_json(&path)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    fn session_data(&self, session: SessionId) -> Result<SessionData> {
        let path = self.root.join("data").join(format!("{}.json", session));
        if !path.exists() {
            return Err(GatewayError::SessionNotFound(session).into());
        }
        let export: SessionExport = read_json(&path)?;
        debug!(cells = export.cell_ids.len(), "Session export loaded");
        export.into_data(session)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        OphysError::from(GatewayError::unavailable(format!(
            "{}: {}",
            path.display(),
            e
        )))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        GatewayError::malformed(format!("{}: {}", path.display(), e)).into()
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| GatewayError::malformed(format!("{}: {}", path.display(), e)))?;
    fs::write(path, bytes)?;
    Ok(())
}
