//! First-sighting deduplication
//!
//! Every alertable object produces exactly one first-sighting event. An
//! object moves through three states: unknown, pending (its persistence job
//! is in flight) and alerted. A failed or skipped persist returns it to
//! unknown so a later batch can retry. Alerted objects not seen for the
//! idle TTL are forgotten by [`FirstSightingDeduplicator::evict_idle`].

use crate::snapshot::crop_snapshot;
use bytes::Bytes;
use hazard_core::{CameraId, ObjectId, Sighting};
use hazard_db::{PersistJob, PersistenceWriter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertState {
    Pending,
    Alerted,
}

#[derive(Debug, Clone, Copy)]
struct AlertRecord {
    state: AlertState,
    rescue_level: Option<u8>,
    last_seen: Instant,
}

/// A new sighting with its encoded crop
#[derive(Debug, Clone)]
pub struct FirstSighting {
    pub sighting: Sighting,
    pub crop: Bytes,
}

#[derive(Debug, Default)]
pub struct FirstSightingDeduplicator {
    alerts: Mutex<HashMap<ObjectId, AlertRecord>>,
}

impl FirstSightingDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only sightings whose object was never recorded, marking them pending.
    ///
    /// For rescue subjects a changed rescue level on a recorded object is
    /// stored but does not make the object new again.
    pub fn select_new(&self, sightings: Vec<Sighting>) -> Vec<Sighting> {
        let mut alerts = self.alerts.lock();
        let mut fresh = Vec::new();
        let now = Instant::now();

        for sighting in sightings {
            let record = &sighting.record;
            match alerts.get_mut(&record.object_id) {
                Some(existing) => {
                    existing.last_seen = now;
                    if record.class.is_rescue_subject() && existing.rescue_level != record.rescue_level {
                        debug!(
                            object_id = %record.object_id,
                            from = ?existing.rescue_level,
                            to = ?record.rescue_level,
                            "Rescue level changed"
                        );
                        existing.rescue_level = record.rescue_level;
                    }
                }
                None => {
                    alerts.insert(
                        record.object_id,
                        AlertRecord {
                            state: AlertState::Pending,
                            rescue_level: record.rescue_level,
                            last_seen: now,
                        },
                    );
                    fresh.push(sighting);
                }
            }
        }

        fresh
    }

    /// Mark objects as alerted after a successful persist
    pub fn confirm(&self, ids: impl IntoIterator<Item = ObjectId>) {
        let mut alerts = self.alerts.lock();
        for id in ids {
            if let Some(record) = alerts.get_mut(&id) {
                record.state = AlertState::Alerted;
            }
        }
    }

    /// Forget pending objects so they are eligible again
    pub fn release(&self, ids: impl IntoIterator<Item = ObjectId>) {
        let mut alerts = self.alerts.lock();
        for id in ids {
            if alerts.get(&id).is_some_and(|r| r.state == AlertState::Pending) {
                alerts.remove(&id);
            }
        }
    }

    /// Crop every sighting out of its frame. Sightings without a usable crop
    /// are released.
    pub fn prepare_snapshots(&self, sightings: Vec<Sighting>, frame: Option<&Bytes>) -> Vec<FirstSighting> {
        let Some(frame) = frame else {
            if let Some(first) = sightings.first() {
                warn!(
                    camera = %first.record.camera_id,
                    img_id = first.record.img_id,
                    count = sightings.len(),
                    "Frame no longer retained, skipping snapshots"
                );
            }
            self.release(sightings.iter().map(|s| s.record.object_id));
            return Vec::new();
        };

        let mut prepared = Vec::with_capacity(sightings.len());
        for sighting in sightings {
            match crop_snapshot(frame, &sighting.record.bbox) {
                Ok(crop) => prepared.push(FirstSighting { sighting, crop }),
                Err(e) => {
                    warn!(object_id = %sighting.record.object_id, error = %e, "Snapshot crop failed");
                    self.release([sighting.record.object_id]);
                }
            }
        }
        prepared
    }

    /// Queue the sightings for persistence and wait for the outcome.
    /// Returns the sightings that were stored; the rest are released.
    pub async fn persist(
        &self,
        writer: &PersistenceWriter,
        camera_id: &CameraId,
        img_id: u64,
        firsts: Vec<FirstSighting>,
    ) -> Vec<FirstSighting> {
        if firsts.is_empty() {
            return firsts;
        }

        let ids: Vec<ObjectId> = firsts.iter().map(|f| f.sighting.record.object_id).collect();
        let (done, stored) = oneshot::channel();

        writer.submit(PersistJob::DetectionEvent {
            camera_id: camera_id.clone(),
            img_id,
            sightings: firsts.iter().map(|f| f.sighting.clone()).collect(),
            crops: firsts.iter().map(|f| f.crop.clone()).collect(),
            done: Some(done),
        });

        if stored.await.unwrap_or(false) {
            info!(camera = %camera_id, img_id, count = ids.len(), "First sightings stored");
            self.confirm(ids);
            firsts
        } else {
            self.release(ids);
            Vec::new()
        }
    }

    pub fn is_alerted(&self, id: ObjectId) -> bool {
        self.alerts
            .lock()
            .get(&id)
            .is_some_and(|r| r.state == AlertState::Alerted)
    }

    pub fn rescue_level(&self, id: ObjectId) -> Option<u8> {
        self.alerts.lock().get(&id).and_then(|r| r.rescue_level)
    }

    pub fn tracked(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Forget alerted objects unseen for longer than `ttl`; returns how many.
    /// Pending objects are left to their persist outcome.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut alerts = self.alerts.lock();
        let before = alerts.len();
        alerts.retain(|_, r| r.state == AlertState::Pending || r.last_seen.elapsed() <= ttl);

        let evicted = before - alerts.len();
        if evicted > 0 {
            debug!(evicted, remaining = alerts.len(), "Idle alert records evicted");
        }
        evicted
    }
}
