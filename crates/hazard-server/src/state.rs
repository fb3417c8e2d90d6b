//! Coordinator state shared by every channel and background task

use crate::config::ServerConfig;
use hazard_channels::{AdminPush, ConsoleHub};
use hazard_core::{BirdRiskLevel, CameraId, DetectionRecord, OutboundMessage};
use hazard_db::{
    DbBackend, DbConfig, MemoryGateway, PersistenceGateway, PersistenceWriter, ScyllaGateway,
    SnapshotStore,
};
use hazard_telemetry::MetricsCollector;
use hazard_tracker::{
    AccessControlCache, CalibrationTable, CalibrationWorker, FirstSightingDeduplicator,
    FrameRingBuffer, RunwayOccupancyTracker,
};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the coordinator knows, behind one `Arc`
pub struct CoordinationCore {
    pub config: ServerConfig,
    /// Storage collaborator; may be in a not-ready state
    pub gateway: Arc<dyn PersistenceGateway>,
    pub writer: PersistenceWriter,
    pub calibrations: CalibrationTable,
    pub calibration_worker: CalibrationWorker,
    pub runway: Mutex<RunwayOccupancyTracker>,
    pub dedup: FirstSightingDeduplicator,
    pub access: AccessControlCache,
    /// Recent frames per camera for snapshots and playback
    pub frames: DashMap<CameraId, FrameRingBuffer>,
    /// Latest detection list per camera, pushed as `ME_OD`
    pub latest: DashMap<CameraId, Vec<DetectionRecord>>,
    pub bird_risk: RwLock<BirdRiskLevel>,
    pub admin_hub: ConsoleHub<AdminPush>,
    pub pilot_hub: ConsoleHub<OutboundMessage>,
    /// Calibration results for detection producers
    pub intake_hub: ConsoleHub<OutboundMessage>,
    pub metrics: MetricsCollector,
    pub cancel: CancellationToken,
}

impl CoordinationCore {
    /// Build the state and start the calibration worker
    pub fn new(
        config: ServerConfig,
        gateway: Arc<dyn PersistenceGateway>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let metrics = MetricsCollector::new()?;
        metrics.set_db_connected(gateway.is_ready());

        let calibrations = CalibrationTable::new();
        let calibration_worker = CalibrationWorker::spawn(
            calibrations.clone(),
            config.calibration_queue,
            cancel.child_token(),
        );

        let core = Self {
            writer: PersistenceWriter::new(config.persist_queue),
            runway: Mutex::new(RunwayOccupancyTracker::new(&config.runway)),
            dedup: FirstSightingDeduplicator::new(),
            access: AccessControlCache::new(gateway.clone(), config.access_ttl()),
            frames: DashMap::new(),
            latest: DashMap::new(),
            bird_risk: RwLock::new(BirdRiskLevel::default()),
            admin_hub: ConsoleHub::new("admin"),
            pilot_hub: ConsoleHub::new("pilot"),
            intake_hub: ConsoleHub::new("intake"),
            calibrations,
            calibration_worker,
            gateway,
            metrics,
            cancel,
            config,
        };

        info!("Coordination core initialized");
        Ok(Arc::new(core))
    }

    pub fn bird_risk(&self) -> BirdRiskLevel {
        *self.bird_risk.read()
    }

    /// Store a received frame in its camera's ring buffer
    pub fn insert_frame(&self, camera_id: CameraId, img_id: u64, frame: bytes::Bytes) {
        let capacity = self.config.frame_capacity;
        self.frames
            .entry(camera_id)
            .or_insert_with(|| FrameRingBuffer::new(capacity))
            .insert(img_id, frame);
        self.metrics.record_frame();
    }
}

/// Build the configured gateway. A Scylla gateway that cannot connect yet is
/// returned in its not-ready state and reconnected in the background.
pub async fn build_gateway(config: &DbConfig) -> Arc<dyn PersistenceGateway> {
    let snapshots = SnapshotStore::new(config.snapshot_dir.clone());

    match config.backend {
        DbBackend::Memory => {
            warn!("Running with the in-memory store, events are not durable");
            Arc::new(MemoryGateway::new(snapshots))
        }
        DbBackend::Scylla => {
            let gateway = ScyllaGateway::connect(config.clone(), snapshots).await;
            if gateway.is_ready() {
                info!("Database connected");
            } else {
                warn!("Database unavailable, running in degraded mode");
            }
            Arc::new(gateway)
        }
    }
}
