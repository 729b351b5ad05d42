//! State file storage.
//!
//! One JSON file per drone in the state directory. Writes go to a temporary
//! sibling first and are renamed into place, so readers never see a partial file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dronesim_core::record::{random_start, state_file_name, PersistedState};
use dronesim_core::VehicleState;
use tokio::fs;

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, drone_id: &str) -> PathBuf {
        self.dir.join(state_file_name(drone_id))
    }

    /// Read the record for `drone_id`. A missing file is `Ok(None)`.
    pub async fn load(&self, drone_id: &str) -> Result<Option<PersistedState>> {
        let path = self.path_for(drone_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let record = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(record))
    }

    /// Atomically replace the record for `record.drone_id`.
    pub async fn save(&self, record: &PersistedState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.path_for(&record.drone_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, &body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            fs::remove_file(&tmp).await.ok();
            return Err(e).with_context(|| format!("failed to replace {}", path.display()));
        }
        Ok(())
    }

    /// Resume the saved state for `drone_id`, or start fresh at a random spot.
    pub async fn restore_or_start(&self, drone_id: &str) -> VehicleState {
        match self.load(drone_id).await {
            Ok(Some(record)) => {
                if let Some(state) = record.restore(drone_id) {
                    tracing::info!(
                        "Restored state for {} saved at {}: {} at ({:.6}, {:.6}, {:.1} m), battery {:.1}%",
                        drone_id,
                        record.saved_at,
                        state.flight_state,
                        state.position.lat,
                        state.position.lon,
                        state.position.alt,
                        state.battery
                    );
                    return state;
                }
            }
            Ok(None) => {
                tracing::info!("No saved state for {}", drone_id);
            }
            Err(err) => {
                tracing::warn!("Ignoring unreadable state for {}: {:#}", drone_id, err);
            }
        }

        let state = random_start(&mut rand::rng());
        tracing::info!(
            "Starting {} fresh at ({:.6}, {:.6})",
            drone_id,
            state.position.lat,
            state.position.lon
        );
        state
    }
}
