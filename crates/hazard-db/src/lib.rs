//! # Hazard DB - Persistence Gateway
//!
//! Narrow storage contract used by the coordinator, with a ScyllaDB
//! implementation and an in-memory implementation for degraded mode and
//! tests. Snapshot crops are written as JPEG files; the event row keeps the
//! file path. Writes from the hot path go through the bounded
//! [`PersistenceWriter`].

pub mod error;
pub mod memory;
pub mod migrations;
pub mod scylla_gateway;
pub mod snapshots;
pub mod writer;

pub use error::{DbError, DbResult};
pub use memory::MemoryGateway;
pub use scylla_gateway::ScyllaGateway;
pub use snapshots::SnapshotStore;
pub use writer::{PersistJob, PersistenceWriter};

use async_trait::async_trait;
use bytes::Bytes;
use hazard_core::{
    AccessCondition, BirdRiskLevel, CameraId, InteractionLog, ObjectId, Sighting, StoredEvent,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which gateway the server runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    Scylla,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: DbBackend,
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    pub connection_timeout_secs: u64,
    /// Directory receiving snapshot JPEG files
    pub snapshot_dir: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::Scylla,
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "airfield_hazard".to_string(),
            replication_factor: 1,
            connection_timeout_secs: 10,
            snapshot_dir: "snapshots".to_string(),
        }
    }
}

impl DbConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Storage contract consumed by the coordinator
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Whether the backing store is reachable
    fn is_ready(&self) -> bool;

    /// Re-establish the connection when not ready
    async fn reconnect(&self) -> DbResult<()> {
        Ok(())
    }

    /// Persist first sightings and their crops (parallel slices) for one frame
    async fn save_detection_event(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        sightings: &[Sighting],
        crops: &[Bytes],
    ) -> DbResult<()>;

    async fn get_event_by_object_id(&self, object_id: ObjectId) -> DbResult<Option<StoredEvent>>;

    async fn save_bird_risk_log(&self, level: BirdRiskLevel) -> DbResult<()>;

    async fn add_interaction_log(&self, entry: &InteractionLog) -> DbResult<()>;

    async fn load_access_levels(&self) -> DbResult<AccessCondition>;

    /// Replace all zone rows at once; either every row is written or none
    async fn store_access_levels(&self, access: &AccessCondition) -> DbResult<()>;
}

pub(crate) fn check_parallel(sightings: &[Sighting], crops: &[Bytes]) -> DbResult<()> {
    if sightings.len() != crops.len() {
        return Err(DbError::invalid_data(format!(
            "{} sightings but {} crops",
            sightings.len(),
            crops.len()
        )));
    }
    Ok(())
}
