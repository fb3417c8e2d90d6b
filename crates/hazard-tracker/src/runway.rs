//! Runway occupancy state machine with debounced clearing

use hazard_core::{DetectionRecord, RunwayAvailability, RunwayId, RunwayStatus, ZoneId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Runway zone assignment and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunwayConfig {
    pub runway_a_zone: u8,
    pub runway_b_zone: u8,
    /// Time without detections before a runway reports clear
    pub clear_delay_ms: u64,
    /// Interval of the re-evaluation poll when no batch arrives
    pub poll_interval_ms: u64,
}

impl Default for RunwayConfig {
    fn default() -> Self {
        Self {
            runway_a_zone: 5,
            runway_b_zone: 6,
            clear_delay_ms: 5_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl RunwayConfig {
    pub fn clear_delay(&self) -> Duration {
        Duration::from_millis(self.clear_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone)]
struct RunwayState {
    id: RunwayId,
    zone: ZoneId,
    status: RunwayStatus,
    last_seen: Option<Instant>,
    /// Status last handed out by `check_status_changes`
    reported: RunwayStatus,
}

impl RunwayState {
    fn new(id: RunwayId, zone: u8) -> Self {
        Self {
            id,
            zone: ZoneId(zone),
            status: RunwayStatus::Clear,
            last_seen: None,
            reported: RunwayStatus::Clear,
        }
    }
}

/// CLEAR/WARNING state of both runways.
///
/// A runway is WARNING while the current cycle has a record in its zone or
/// the last such record is at most `clear_delay` old.
#[derive(Debug, Clone)]
pub struct RunwayOccupancyTracker {
    runways: [RunwayState; 2],
    clear_delay: Duration,
}

impl RunwayOccupancyTracker {
    pub fn new(config: &RunwayConfig) -> Self {
        Self {
            runways: [
                RunwayState::new(RunwayId::A, config.runway_a_zone),
                RunwayState::new(RunwayId::B, config.runway_b_zone),
            ],
            clear_delay: config.clear_delay(),
        }
    }

    /// Apply one detection batch
    pub fn update(&mut self, records: &[DetectionRecord]) {
        self.update_at(records, Instant::now());
    }

    pub fn update_at(&mut self, records: &[DetectionRecord], now: Instant) {
        for runway in &mut self.runways {
            let occupied = records.iter().any(|r| r.zone == Some(runway.zone));
            if occupied {
                runway.last_seen = Some(now);
            }

            let recent = runway
                .last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) <= self.clear_delay);

            runway.status = if occupied || recent {
                RunwayStatus::Warning
            } else {
                RunwayStatus::Clear
            };
        }
    }

    /// Re-evaluate without a batch so CLEAR is reached when detections stop
    pub fn refresh(&mut self) {
        self.refresh_at(Instant::now());
    }

    pub fn refresh_at(&mut self, now: Instant) {
        self.update_at(&[], now);
    }

    /// Runways whose status differs from the last call. Consumes the changes.
    pub fn check_status_changes(&mut self) -> Vec<(RunwayId, RunwayStatus)> {
        let mut changes = Vec::new();
        for runway in &mut self.runways {
            if runway.status != runway.reported {
                debug!(runway = %runway.id, status = runway.status.as_str(), "Runway status changed");
                runway.reported = runway.status;
                changes.push((runway.id, runway.status));
            }
        }
        changes
    }

    pub fn status(&self, id: RunwayId) -> RunwayStatus {
        self.runways
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn availability(&self) -> RunwayAvailability {
        RunwayAvailability::from_statuses(self.status(RunwayId::A), self.status(RunwayId::B))
    }
}

impl Default for RunwayOccupancyTracker {
    fn default() -> Self {
        Self::new(&RunwayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::{BoundingBox, CameraId, ObjectClass, ObjectId};

    fn record_in(zone: u8) -> DetectionRecord {
        DetectionRecord {
            object_id: ObjectId(1),
            class: ObjectClass::from_label("airplane"),
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            center: (5.0, 5.0),
            map_x: 100.0,
            map_y: 250.0,
            zone: Some(ZoneId(zone)),
            rescue_level: None,
            confidence: 0.8,
            camera_id: CameraId::new("A"),
            img_id: 1,
        }
    }

    #[test]
    fn test_debounced_clear() {
        let mut tracker = RunwayOccupancyTracker::default();
        let t0 = Instant::now();

        tracker.update_at(&[record_in(5)], t0);
        assert_eq!(tracker.status(RunwayId::A), RunwayStatus::Warning);
        assert_eq!(tracker.check_status_changes(), vec![(RunwayId::A, RunwayStatus::Warning)]);

        tracker.refresh_at(t0 + Duration::from_millis(4_900));
        assert_eq!(tracker.status(RunwayId::A), RunwayStatus::Warning);
        assert!(tracker.check_status_changes().is_empty());

        tracker.refresh_at(t0 + Duration::from_millis(5_100));
        assert_eq!(tracker.status(RunwayId::A), RunwayStatus::Clear);
        assert_eq!(tracker.check_status_changes(), vec![(RunwayId::A, RunwayStatus::Clear)]);
    }

    #[test]
    fn test_changes_consumed_once() {
        let mut tracker = RunwayOccupancyTracker::default();
        tracker.update_at(&[record_in(6)], Instant::now());

        assert_eq!(tracker.check_status_changes().len(), 1);
        assert!(tracker.check_status_changes().is_empty());
    }

    #[test]
    fn test_other_zones_leave_runways_clear() {
        let mut tracker = RunwayOccupancyTracker::default();
        tracker.update_at(&[record_in(3)], Instant::now());

        assert_eq!(tracker.availability(), RunwayAvailability::All);
        assert!(tracker.check_status_changes().is_empty());
    }

    #[test]
    fn test_new_detection_extends_warning() {
        let mut tracker = RunwayOccupancyTracker::default();
        let t0 = Instant::now();

        tracker.update_at(&[record_in(5)], t0);
        tracker.update_at(&[record_in(5)], t0 + Duration::from_secs(4));
        tracker.refresh_at(t0 + Duration::from_secs(8));

        assert_eq!(tracker.status(RunwayId::A), RunwayStatus::Warning);
        assert_eq!(tracker.availability(), RunwayAvailability::OnlyB);
    }
}
