//! # Hazard Tracker - Stateful Detection Processing
//!
//! The state the coordinator keeps between detection batches.
//!
//! ## Components
//! - [`RunwayOccupancyTracker`]: CLEAR/WARNING per runway with debounced clearing
//! - [`FirstSightingDeduplicator`]: one snapshot event per object
//! - [`FrameRingBuffer`]: recent frames per camera for snapshot retrieval and playback
//! - [`AccessControlCache`]: TTL cache over the zone authority table
//! - [`CalibrationWorker`]: validates and commits per-camera homographies

pub mod access;
pub mod calibration;
pub mod dedup;
pub mod frames;
pub mod runway;
pub mod snapshot;

pub use access::{AccessControlCache, AccessError, AccessResult, DEFAULT_ACCESS_TTL};
pub use calibration::{
    CalibrationError, CalibrationOutcome, CalibrationTable, CalibrationWorker, STOP_TIMEOUT,
};
pub use dedup::{FirstSighting, FirstSightingDeduplicator};
pub use frames::{FrameRingBuffer, DEFAULT_FRAME_CAPACITY};
pub use runway::{RunwayConfig, RunwayOccupancyTracker};
pub use snapshot::{crop_snapshot, SnapshotError};
