//! ScyllaDB implementation of the persistence gateway

use crate::{check_parallel, migrations, DbConfig, DbError, DbResult, PersistenceGateway, SnapshotStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hazard_core::{
    AccessCondition, BirdRiskLevel, CameraId, EventKind, InteractionLog, ObjectId, Sighting,
    StoredEvent, ZONE_COUNT,
};
use parking_lot::RwLock;
use scylla::batch::{Batch, BatchType};
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use tracing::{info, warn};

/// Gateway over a ScyllaDB cluster. Starts not-ready when the cluster is
/// unreachable and can be reconnected later.
pub struct ScyllaGateway {
    config: DbConfig,
    snapshots: SnapshotStore,
    session: RwLock<Option<Arc<Session>>>,
}

impl ScyllaGateway {
    pub async fn connect(config: DbConfig, snapshots: SnapshotStore) -> Self {
        let gateway = Self {
            config,
            snapshots,
            session: RwLock::new(None),
        };

        if let Err(e) = gateway.reconnect().await {
            warn!("Database connection failed: {}", e);
        }
        gateway
    }

    async fn open_session(config: &DbConfig) -> DbResult<Arc<Session>> {
        info!("Connecting to ScyllaDB cluster: {:?}", config.hosts);

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(config.connection_timeout())
            .build()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let session = Arc::new(session);
        migrations::run_all(&session, config).await?;

        info!("Connected to ScyllaDB");
        Ok(session)
    }

    fn session(&self) -> DbResult<Arc<Session>> {
        self.session.read().clone().ok_or(DbError::NotReady)
    }

    pub fn events(&self) -> DbResult<EventRepository> {
        Ok(EventRepository::new(self.session()?))
    }

    pub fn bird_risk(&self) -> DbResult<BirdRiskRepository> {
        Ok(BirdRiskRepository::new(self.session()?))
    }

    pub fn interactions(&self) -> DbResult<InteractionRepository> {
        Ok(InteractionRepository::new(self.session()?))
    }

    pub fn access(&self) -> DbResult<AccessRepository> {
        Ok(AccessRepository::new(self.session()?))
    }
}

#[async_trait]
impl PersistenceGateway for ScyllaGateway {
    fn is_ready(&self) -> bool {
        self.session.read().is_some()
    }

    async fn reconnect(&self) -> DbResult<()> {
        let session = Self::open_session(&self.config).await?;
        *self.session.write() = Some(session);
        Ok(())
    }

    async fn save_detection_event(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        sightings: &[Sighting],
        crops: &[Bytes],
    ) -> DbResult<()> {
        check_parallel(sightings, crops)?;
        let events = self.events()?;

        for (sighting, crop) in sightings.iter().zip(crops) {
            let path = self
                .snapshots
                .write(camera_id, img_id, sighting.record.object_id, crop)
                .await?;
            events
                .insert(camera_id, img_id, sighting, &path.to_string_lossy())
                .await?;
        }
        Ok(())
    }

    async fn get_event_by_object_id(&self, object_id: ObjectId) -> DbResult<Option<StoredEvent>> {
        self.events()?.get(object_id).await
    }

    async fn save_bird_risk_log(&self, level: BirdRiskLevel) -> DbResult<()> {
        self.bird_risk()?.insert(level, Utc::now()).await
    }

    async fn add_interaction_log(&self, entry: &InteractionLog) -> DbResult<()> {
        self.interactions()?.insert(entry).await
    }

    async fn load_access_levels(&self) -> DbResult<AccessCondition> {
        self.access()?.load().await
    }

    async fn store_access_levels(&self, access: &AccessCondition) -> DbResult<()> {
        self.access()?.store(access).await
    }
}

// ============================================================================
// REPOSITORY IMPLEMENTATIONS
// ============================================================================

type EventRow = (
    i64,
    String,
    i64,
    i32,
    String,
    f64,
    f64,
    i32,
    Option<i32>,
    Option<String>,
    i64,
);

fn day_key(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Repository for first-sighting events
#[derive(Clone)]
pub struct EventRepository {
    session: Arc<Session>,
}

impl EventRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        sighting: &Sighting,
        image_path: &str,
    ) -> DbResult<()> {
        let query = r#"
            INSERT INTO detection_events (
                object_id, camera_id, img_id, event_type, class,
                map_x, map_y, zone, rescue_level, image_path, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let record = &sighting.record;
        self.session
            .query_unpaged(
                query,
                (
                    record.object_id.0,
                    camera_id.as_str(),
                    img_id as i64,
                    sighting.kind.code() as i32,
                    record.class.label(),
                    record.map_x,
                    record.map_y,
                    record.zone_code() as i32,
                    record.rescue_level.map(i32::from),
                    image_path,
                    sighting.detected_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, object_id: ObjectId) -> DbResult<Option<StoredEvent>> {
        let query = r#"
            SELECT object_id, camera_id, img_id, event_type, class,
                   map_x, map_y, zone, rescue_level, image_path, detected_at
            FROM detection_events
            WHERE object_id = ?
        "#;

        let result = self
            .session
            .query_unpaged(query, (object_id.0,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;
        let row = rows
            .maybe_first_row::<EventRow>()
            .map_err(|e| DbError::InvalidData(e.to_string()))?;

        row.map(event_from_row).transpose()
    }
}

fn event_from_row(row: EventRow) -> DbResult<StoredEvent> {
    let (object_id, camera_id, img_id, event_type, class, map_x, map_y, zone, rescue_level, image_path, detected_at) =
        row;

    let kind = EventKind::from_code(event_type)
        .ok_or_else(|| DbError::invalid_data(format!("event type {}", event_type)))?;
    let detected_at = DateTime::<Utc>::from_timestamp_millis(detected_at)
        .ok_or_else(|| DbError::invalid_data(format!("timestamp {}", detected_at)))?;

    Ok(StoredEvent {
        object_id: ObjectId(object_id),
        kind,
        class,
        zone: zone.clamp(0, u8::MAX as i32) as u8,
        camera_id: CameraId(camera_id),
        img_id: img_id.max(0) as u64,
        map_x,
        map_y,
        rescue_level: rescue_level.map(|l| l.clamp(0, u8::MAX as i32) as u8),
        image_path,
        detected_at,
    })
}

/// Repository for bird risk changes
#[derive(Clone)]
pub struct BirdRiskRepository {
    session: Arc<Session>,
}

impl BirdRiskRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(&self, level: BirdRiskLevel, at: DateTime<Utc>) -> DbResult<()> {
        let query = "INSERT INTO bird_risk_log (day, logged_at, level) VALUES (?, ?, ?)";

        self.session
            .query_unpaged(query, (day_key(&at), at.timestamp_millis(), level.code() as i32))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }
}

/// Repository for pilot request/response pairs
#[derive(Clone)]
pub struct InteractionRepository {
    session: Arc<Session>,
}

impl InteractionRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn insert(&self, entry: &InteractionLog) -> DbResult<()> {
        let query = r#"
            INSERT INTO interaction_log (day, requested_at, request_id, response_id, responded_at)
            VALUES (?, ?, ?, ?, ?)
        "#;

        self.session
            .query_unpaged(
                query,
                (
                    day_key(&entry.requested_at),
                    entry.requested_at.timestamp_millis(),
                    entry.request_id,
                    entry.response_id,
                    entry.responded_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }
}

/// Repository for zone authority levels
#[derive(Clone)]
pub struct AccessRepository {
    session: Arc<Session>,
}

impl AccessRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn load(&self) -> DbResult<AccessCondition> {
        let result = self
            .session
            .query_unpaged("SELECT zone_id, authority_level FROM access_conditions", ())
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let mut levels: Vec<Option<i64>> = vec![None; ZONE_COUNT];
        for row in rows
            .rows::<(i32, i32)>()
            .map_err(|e| DbError::InvalidData(e.to_string()))?
        {
            let (zone, level) = row.map_err(|e| DbError::InvalidData(e.to_string()))?;
            match usize::try_from(zone).ok().and_then(|z| z.checked_sub(1)) {
                Some(index) if index < ZONE_COUNT => levels[index] = Some(level as i64),
                _ => warn!("Ignoring access row for unknown zone {}", zone),
            }
        }

        let levels: Vec<i64> = levels
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DbError::invalid_data("access_conditions is missing zone rows"))?;

        AccessCondition::from_levels(&levels).map_err(|e| DbError::InvalidData(e.to_string()))
    }

    /// Write all zone rows in one logged batch
    pub async fn store(&self, access: &AccessCondition) -> DbResult<()> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(ZONE_COUNT);

        for (index, level) in access.levels().iter().enumerate() {
            batch.append_statement("INSERT INTO access_conditions (zone_id, authority_level) VALUES (?, ?)");
            values.push(((index + 1) as i32, *level as i32));
        }

        self.session
            .batch(&batch, values)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_row() {
        let row: EventRow = (
            42,
            "A".to_string(),
            9,
            3,
            "fallen_person".to_string(),
            10.0,
            20.0,
            5,
            Some(2),
            Some("/tmp/a.jpg".to_string()),
            1_700_000_000_000,
        );

        let event = event_from_row(row).unwrap();
        assert_eq!(event.object_id, ObjectId(42));
        assert_eq!(event.kind, EventKind::Rescue);
        assert_eq!(event.rescue_level, Some(2));
        assert_eq!(event.detected_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_event_from_row_rejects_unknown_type() {
        let row: EventRow = (1, "A".into(), 1, 9, "bird".into(), 0.0, 0.0, 0, None, None, 0);
        assert!(matches!(event_from_row(row), Err(DbError::InvalidData(_))));
    }

    #[test]
    fn test_day_key() {
        let at = DateTime::<Utc>::from_timestamp_millis(0).unwrap();
        assert_eq!(day_key(&at), "1970-01-01");
    }
}
