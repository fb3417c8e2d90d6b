//! Detection batch processing and admin/pilot pushes

use crate::state::CoordinationCore;
use bytes::Bytes;
use hazard_channels::{AdminFrame, AdminPush, AdminTopic};
use hazard_core::{
    classify, wire_timestamp, AccessCondition, BoundingBox, CalibrationEntry, CameraId,
    DetectionBatch, DetectionRecord, ObjectClass, ObjectDetected, ObjectId, OutboundMessage,
    RawDetection, RunwayId, RunwayStatus, Sighting,
};
use hazard_tracker::FirstSighting;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl CoordinationCore {
    /// Map a producer detection onto the airfield map
    pub fn build_record(
        &self,
        camera_id: &CameraId,
        img_id: u64,
        raw: RawDetection,
        calibration: Option<&CalibrationEntry>,
    ) -> DetectionRecord {
        let bbox = BoundingBox::from_array(raw.bbox);
        let center = bbox.center();
        let (map_x, map_y) = self.config.projection.to_map(center, calibration);
        let zone = self.config.zones.resolve(map_x, map_y);
        let class = ObjectClass::from_label(&raw.class);
        let rescue_level = if class.is_person_like() { raw.rescue_level } else { None };

        DetectionRecord {
            object_id: ObjectId(raw.object_id),
            class,
            bbox,
            center,
            map_x,
            map_y,
            zone,
            rescue_level,
            confidence: raw.confidence,
            camera_id: camera_id.clone(),
            img_id,
        }
    }

    /// Process one `object_detected` event end to end.
    ///
    /// Runway state and the detection list are updated inline. New
    /// first sightings are cropped and persisted on a separate task and
    /// pushed to admins once stored.
    pub async fn handle_detections(self: &Arc<Self>, message: ObjectDetected) {
        let started = Instant::now();
        let camera_id = message.camera_id;
        let img_id = message.img_id;

        let calibration = self.calibrations.get(&camera_id);
        let records = message
            .detections
            .into_iter()
            .map(|raw| self.build_record(&camera_id, img_id, raw, calibration.as_deref()))
            .collect();
        let batch = DetectionBatch::new(camera_id, img_id, records);

        debug!(
            camera = %batch.camera_id,
            img_id,
            count = batch.records.len(),
            calibrated = calibration.is_some(),
            "Processing detection batch"
        );

        let changes = {
            let mut runway = self.runway.lock();
            runway.update(&batch.records);
            runway.check_status_changes()
        };
        self.publish_runway_changes(changes);

        self.latest.insert(batch.camera_id.clone(), batch.records.clone());
        self.admin_hub.broadcast(AdminPush::new(
            AdminTopic::MapView,
            AdminFrame::line(self.detection_list_line()),
        ));

        let sightings = self.classify_batch(&batch).await;
        let fresh = self.dedup.select_new(sightings);

        self.metrics
            .record_batch(batch.records.len(), started.elapsed().as_secs_f64());

        if fresh.is_empty() {
            return;
        }

        let frame = self
            .frames
            .get(&batch.camera_id)
            .and_then(|buffer| buffer.get(img_id));
        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.store_first_sightings(batch.camera_id, img_id, fresh, frame).await;
        });
    }

    /// Alertable records of the batch, reading the authority table once
    async fn classify_batch(&self, batch: &DetectionBatch) -> Vec<Sighting> {
        let access = match self.access.get().await {
            Ok(access) => Some(access),
            Err(e) => {
                warn!(error = %e, "Access levels unavailable, skipping access checks");
                None
            }
        };

        batch
            .records
            .iter()
            .filter_map(|record| {
                let kind = match &access {
                    Some(access) => classify(&record.class, record.zone, access),
                    // Without the table only class-based alerts can be decided
                    None if record.class.clearance().is_none() => {
                        classify(&record.class, record.zone, &AccessCondition::default())
                    }
                    None => None,
                }?;

                Some(Sighting {
                    record: record.clone(),
                    kind,
                    detected_at: batch.received_at,
                })
            })
            .collect()
    }

    async fn store_first_sightings(
        self: Arc<Self>,
        camera_id: CameraId,
        img_id: u64,
        fresh: Vec<Sighting>,
        frame: Option<Bytes>,
    ) {
        let ids: Vec<ObjectId> = fresh.iter().map(|s| s.record.object_id).collect();

        let cropper = Arc::clone(&self);
        let prepared = match tokio::task::spawn_blocking(move || {
            cropper.dedup.prepare_snapshots(fresh, frame.as_ref())
        })
        .await
        {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(camera = %camera_id, img_id, error = %e, "Snapshot task failed");
                self.dedup.release(ids);
                return;
            }
        };

        let stored = self
            .dedup
            .persist(&self.writer, &camera_id, img_id, prepared)
            .await;

        let failed = ids.len() - stored.len();
        if failed > 0 {
            warn!(camera = %camera_id, img_id, failed, "First sightings not stored, will retry on a later batch");
            self.metrics.record_first_sightings_failed(failed);
        }

        for first in &stored {
            self.metrics.record_first_sighting(first.sighting.kind);
            self.admin_hub.broadcast(first_sighting_push(first));
        }
    }

    /// `ME_OD` line with the latest list of every camera
    pub fn detection_list_line(&self) -> String {
        let mut cameras: Vec<(CameraId, Vec<DetectionRecord>)> = self
            .latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        cameras.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let entries: Vec<String> = cameras
            .iter()
            .flat_map(|(_, records)| records.iter().map(detection_entry))
            .collect();
        format!("ME_OD:{}", entries.join(";"))
    }

    pub fn publish_runway_changes(&self, changes: Vec<(RunwayId, RunwayStatus)>) {
        for (runway, status) in changes {
            info!(runway = %runway, status = status.as_str(), "Runway status changed");
            self.metrics.set_runway_status(runway, status);

            self.admin_hub.broadcast(AdminPush::new(
                AdminTopic::All,
                AdminFrame::line(format!("ME_R{}:{}", runway, status.code())),
            ));
            self.pilot_hub.broadcast(OutboundMessage::event(
                format!("RWY_{}_STATUS_CHANGED", runway),
                status.as_str(),
            ));
        }
    }
}

fn detection_entry(record: &DetectionRecord) -> String {
    let (x, y) = record.map_point();
    let mut entry = format!(
        "{},{},{},{},{}",
        record.object_id,
        record.class,
        x,
        y,
        record.zone_code()
    );
    if let Some(level) = record.rescue_level {
        entry.push_str(&format!(",{}", level));
    }
    entry
}

/// `ME_FD` header followed by the crop bytes
fn first_sighting_push(first: &FirstSighting) -> AdminPush {
    let sighting = &first.sighting;
    let record = &sighting.record;
    let (x, y) = record.map_point();

    let mut header = format!(
        "ME_FD:{},{},{},{},{},{},{}",
        sighting.kind.code(),
        record.object_id,
        record.class,
        x,
        y,
        record.zone_code(),
        wire_timestamp(&sighting.detected_at)
    );
    if let Some(level) = record.rescue_level {
        header.push_str(&format!(",{}", level));
    }
    header.push_str(&format!(",{},", first.crop.len()));

    AdminPush::new(AdminTopic::All, AdminFrame::binary(header, first.crop.clone()))
}

// ============================================================================
// TESTS
// ============================================================================
