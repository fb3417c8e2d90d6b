//! In-memory gateway used in degraded mode (no database) and in tests

use crate::{check_parallel, DbError, DbResult, PersistenceGateway, SnapshotStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hazard_core::{
    AccessCondition, BirdRiskLevel, CameraId, InteractionLog, ObjectId, Sighting, StoredEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct MemoryGateway {
    snapshots: SnapshotStore,
    events: Mutex<HashMap<ObjectId, StoredEvent>>,
    bird_log: Mutex<Vec<(DateTime<Utc>, BirdRiskLevel)>>,
    interactions: Mutex<Vec<InteractionLog>>,
    access: Mutex<AccessCondition>,
    ready: AtomicBool,
    fail_writes: AtomicBool,
    access_loads: AtomicUsize,
}

impl MemoryGateway {
    pub fn new(snapshots: SnapshotStore) -> Self {
        Self {
            snapshots,
            events: Mutex::new(HashMap::new()),
            bird_log: Mutex::new(Vec::new()),
            interactions: Mutex::new(Vec::new()),
            access: Mutex::new(AccessCondition::default()),
            ready: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            access_loads: AtomicUsize::new(0),
        }
    }

    /// Make every write fail (failure injection)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Insert an event row directly
    pub fn insert_event(&self, event: StoredEvent) {
        self.events.lock().insert(event.object_id, event);
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn bird_log(&self) -> Vec<BirdRiskLevel> {
        self.bird_log.lock().iter().map(|(_, level)| *level).collect()
    }

    pub fn interactions(&self) -> Vec<InteractionLog> {
        self.interactions.lock().clone()
    }

    /// Number of times access levels were read from this store
    pub fn access_load_count(&self) -> usize {
        self.access_loads.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> DbResult<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(DbError::NotReady);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::query("write rejected"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn save_detection_event(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        sightings: &[Sighting],
        crops: &[Bytes],
    ) -> DbResult<()> {
        self.check_write()?;
        check_parallel(sightings, crops)?;

        let mut rows = Vec::with_capacity(sightings.len());
        for (sighting, crop) in sightings.iter().zip(crops) {
            let record = &sighting.record;
            let path = self.snapshots.write(camera_id, img_id, record.object_id, crop).await?;

            rows.push(StoredEvent {
                object_id: record.object_id,
                kind: sighting.kind,
                class: record.class.label().to_string(),
                zone: record.zone_code(),
                camera_id: camera_id.clone(),
                img_id,
                map_x: record.map_x,
                map_y: record.map_y,
                rescue_level: record.rescue_level,
                image_path: Some(path.to_string_lossy().into_owned()),
                detected_at: sighting.detected_at,
            });
        }

        let mut events = self.events.lock();
        for row in rows {
            events.insert(row.object_id, row);
        }
        Ok(())
    }

    async fn get_event_by_object_id(&self, object_id: ObjectId) -> DbResult<Option<StoredEvent>> {
        if !self.is_ready() {
            return Err(DbError::NotReady);
        }
        Ok(self.events.lock().get(&object_id).cloned())
    }

    async fn save_bird_risk_log(&self, level: BirdRiskLevel) -> DbResult<()> {
        self.check_write()?;
        self.bird_log.lock().push((Utc::now(), level));
        Ok(())
    }

    async fn add_interaction_log(&self, entry: &InteractionLog) -> DbResult<()> {
        self.check_write()?;
        self.interactions.lock().push(*entry);
        Ok(())
    }

    async fn load_access_levels(&self) -> DbResult<AccessCondition> {
        if !self.is_ready() {
            return Err(DbError::NotReady);
        }
        self.access_loads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.access.lock())
    }

    async fn store_access_levels(&self, access: &AccessCondition) -> DbResult<()> {
        self.check_write()?;
        *self.access.lock() = *access;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::{BoundingBox, DetectionRecord, EventKind, ObjectClass, ZoneId};

    fn sighting(id: i64) -> Sighting {
        Sighting {
            record: DetectionRecord {
                object_id: ObjectId(id),
                class: ObjectClass::Bird,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                center: (5.0, 5.0),
                map_x: 100.0,
                map_y: 250.0,
                zone: Some(ZoneId(5)),
                rescue_level: None,
                confidence: 0.9,
                camera_id: CameraId::new("A"),
                img_id: 3,
            },
            kind: EventKind::Hazard,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = MemoryGateway::new(SnapshotStore::new(dir.path()));

        gateway
            .save_detection_event(&CameraId::new("A"), 3, &[sighting(9)], &[Bytes::from_static(b"jpg")])
            .await
            .unwrap();

        let stored = gateway.get_event_by_object_id(ObjectId(9)).await.unwrap().unwrap();
        assert_eq!(stored.kind, EventKind::Hazard);
        assert_eq!(stored.zone, 5);
        let bytes = tokio::fs::read(stored.image_path.unwrap()).await.unwrap();
        assert_eq!(bytes, b"jpg");

        assert!(gateway.get_event_by_object_id(ObjectId(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = MemoryGateway::new(SnapshotStore::new(dir.path()));
        gateway.set_fail_writes(true);

        let result = gateway
            .save_detection_event(&CameraId::new("A"), 3, &[sighting(9)], &[Bytes::from_static(b"jpg")])
            .await;
        assert!(result.is_err());
        assert_eq!(gateway.event_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_crops_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = MemoryGateway::new(SnapshotStore::new(dir.path()));

        let result = gateway.save_detection_event(&CameraId::new("A"), 3, &[sighting(9)], &[]).await;
        assert!(matches!(result, Err(DbError::InvalidData(_))));
    }
}
