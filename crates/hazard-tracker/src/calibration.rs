//! Per-camera calibration table and the worker that commits to it

use hazard_core::{CalibrationEntry, CalibrationRequest, CameraId, Homography, OutboundMessage};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound on how long `stop` waits for the worker task
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("camera_id must be a string or integer")]
    InvalidCameraId,

    #[error("matrix must be 3x3 finite numbers: {0}")]
    InvalidMatrix(String),

    #[error("scale must be a finite number greater than 0")]
    InvalidScale,
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;

// ============================================================================
// TABLE
// ============================================================================

/// Committed calibrations. Entries are swapped whole, so readers see either
/// the previous or the new entry.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    entries: Arc<RwLock<HashMap<CameraId, Arc<CalibrationEntry>>>>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, camera_id: &CameraId) -> Option<Arc<CalibrationEntry>> {
        self.entries.read().get(camera_id).cloned()
    }

    pub fn commit(&self, camera_id: CameraId, entry: CalibrationEntry) {
        self.entries.write().insert(camera_id, Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

fn parse_matrix(value: &Value) -> CalibrationResult<Homography> {
    let rows = value
        .as_array()
        .ok_or_else(|| CalibrationError::InvalidMatrix("not an array".to_string()))?;
    if rows.len() != 3 {
        return Err(CalibrationError::InvalidMatrix(format!("{} rows", rows.len())));
    }

    let mut matrix = [[0.0; 3]; 3];
    for (r, row) in rows.iter().enumerate() {
        let cols = row
            .as_array()
            .ok_or_else(|| CalibrationError::InvalidMatrix(format!("row {} is not an array", r)))?;
        if cols.len() != 3 {
            return Err(CalibrationError::InvalidMatrix(format!("row {} has {} columns", r, cols.len())));
        }
        for (c, cell) in cols.iter().enumerate() {
            matrix[r][c] = cell
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| CalibrationError::InvalidMatrix(format!("cell [{}][{}]", r, c)))?;
        }
    }

    Ok(Homography(matrix))
}

/// Check a request completely before anything is committed
pub fn validate(request: &CalibrationRequest) -> CalibrationResult<(CameraId, CalibrationEntry)> {
    let camera_id = match &request.camera_id {
        None | Some(Value::Null) => return Err(CalibrationError::MissingField("camera_id")),
        Some(value) => CameraId::from_json(value).ok_or(CalibrationError::InvalidCameraId)?,
    };

    let matrix = request
        .matrix
        .as_ref()
        .ok_or(CalibrationError::MissingField("matrix"))?;
    let homography = parse_matrix(matrix)?;

    let scale = request
        .scale
        .as_ref()
        .ok_or(CalibrationError::MissingField("scale"))?
        .as_f64()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or(CalibrationError::InvalidScale)?;

    Ok((camera_id, CalibrationEntry { homography, scale }))
}

// ============================================================================
// WORKER
// ============================================================================

/// Result of one calibration request
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Committed {
        camera_id: CameraId,
    },
    Rejected {
        camera_id: Option<CameraId>,
        reason: String,
    },
}

impl CalibrationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CalibrationOutcome::Committed { .. })
    }

    /// Result event reported back to intake peers
    pub fn to_message(&self) -> OutboundMessage {
        match self {
            CalibrationOutcome::Committed { camera_id } => {
                OutboundMessage::calibration_result(camera_id.as_str(), None)
            }
            CalibrationOutcome::Rejected { camera_id, reason } => OutboundMessage::calibration_result(
                camera_id.as_ref().map(CameraId::as_str).unwrap_or("unknown"),
                Some(reason.clone()),
            ),
        }
    }
}

fn process(table: &CalibrationTable, request: &CalibrationRequest) -> CalibrationOutcome {
    match validate(request) {
        Ok((camera_id, entry)) => {
            table.commit(camera_id.clone(), entry);
            info!(camera = %camera_id, scale = entry.scale, "Calibration committed");
            CalibrationOutcome::Committed { camera_id }
        }
        Err(e) => {
            let camera_id = request.camera_id.as_ref().and_then(CameraId::from_json);
            warn!(camera = ?camera_id, error = %e, "Calibration rejected");
            CalibrationOutcome::Rejected {
                camera_id,
                reason: e.to_string(),
            }
        }
    }
}

/// Single consumer of calibration requests.
///
/// Requests are enqueued without blocking; a full queue drops the request.
pub struct CalibrationWorker {
    tx: mpsc::Sender<CalibrationRequest>,
    outcomes: broadcast::Sender<CalibrationOutcome>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CalibrationWorker {
    pub fn spawn(table: CalibrationTable, capacity: usize, cancel: CancellationToken) -> Self {
        let (tx, mut rx) = mpsc::channel::<CalibrationRequest>(capacity.max(1));
        let (outcomes, _) = broadcast::channel(64);
        let worker_outcomes = outcomes.clone();
        let worker_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            info!("Calibration worker started");
            loop {
                tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    request = rx.recv() => {
                        let Some(request) = request else { break };
                        let outcome = process(&table, &request);
                        // No subscribers is fine
                        let _ = worker_outcomes.send(outcome);
                    }
                }
            }
            info!("Calibration worker stopped");
        });

        Self {
            tx,
            outcomes,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue without waiting. Returns false when the request was dropped.
    pub fn submit(&self, request: CalibrationRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => {
                debug!("Calibration request queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Calibration queue full, dropping request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Calibration worker stopped, dropping request");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CalibrationOutcome> {
        self.outcomes.subscribe()
    }

    /// Cancel the worker and wait for it, at most [`STOP_TIMEOUT`].
    /// Returns false when the worker did not finish in time.
    pub async fn stop(&self) -> bool {
        self.cancel.cancel();

        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Calibration worker did not stop within {:?}", STOP_TIMEOUT);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::ProjectionConfig;
    use serde_json::json;

    fn request(camera_id: Value, matrix: Value, scale: Value) -> CalibrationRequest {
        CalibrationRequest {
            camera_id: Some(camera_id),
            matrix: Some(matrix),
            scale: Some(scale),
        }
    }

    #[test]
    fn test_valid_request() {
        let req = request(json!(3), json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]]), json!(2.5));
        let (camera, entry) = validate(&req).unwrap();

        assert_eq!(camera, CameraId::new("3"));
        assert_eq!(entry.homography, Homography::IDENTITY);
        assert_eq!(entry.scale, 2.5);
    }

    #[test]
    fn test_rejections() {
        let identity = json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);

        let missing = CalibrationRequest {
            camera_id: Some(json!("A")),
            matrix: Some(identity.clone()),
            scale: None,
        };
        assert_eq!(validate(&missing), Err(CalibrationError::MissingField("scale")));

        let bad_scale = request(json!("A"), identity.clone(), json!(0));
        assert_eq!(validate(&bad_scale), Err(CalibrationError::InvalidScale));

        let bad_cell = request(json!("A"), json!([[1, 0, 0], [0, "x", 0], [0, 0, 1]]), json!(1));
        assert!(matches!(validate(&bad_cell), Err(CalibrationError::InvalidMatrix(_))));

        let bad_camera = request(json!([1]), identity, json!(1));
        assert_eq!(validate(&bad_camera), Err(CalibrationError::InvalidCameraId));
    }

    #[test]
    fn test_two_by_two_rejected_and_linear_fallback() {
        let table = CalibrationTable::new();
        let req = request(json!("A"), json!([[1, 0], [0, 1]]), json!(1.0));

        let outcome = process(&table, &req);
        assert!(!outcome.is_committed());
        assert!(table.get(&CameraId::new("A")).is_none());

        let projection = ProjectionConfig::default();
        let pixel = (960.0, 540.0);
        let entry = table.get(&CameraId::new("A"));
        assert_eq!(projection.to_map(pixel, entry.as_deref()), projection.linear(pixel));
    }

    #[test]
    fn test_rejection_message_names_unknown_camera() {
        let outcome = process(&CalibrationTable::new(), &CalibrationRequest::default());
        let line = outcome.to_message().to_line();

        assert!(line.contains("\"camera_id\":\"unknown\""));
        assert!(line.contains("\"result\":\"ERROR\""));
    }

    #[tokio::test]
    async fn test_worker_commits_and_stops() {
        let table = CalibrationTable::new();
        let worker = CalibrationWorker::spawn(table.clone(), DEFAULT_QUEUE_CAPACITY, CancellationToken::new());
        let mut outcomes = worker.subscribe();

        assert!(worker.submit(request(
            json!("B"),
            json!([[2, 0, 0], [0, 2, 0], [0, 0, 1]]),
            json!(1.5)
        )));

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome, CalibrationOutcome::Committed { camera_id: CameraId::new("B") });
        assert_eq!(table.get(&CameraId::new("B")).unwrap().scale, 1.5);

        assert!(worker.stop().await);
        assert!(!worker.submit(CalibrationRequest::default()));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let table = CalibrationTable::new();
        // current_thread runtime: the worker cannot drain until this test yields
        let worker = CalibrationWorker::spawn(table.clone(), 1, CancellationToken::new());
        let mut outcomes = worker.subscribe();
        let identity = json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);

        assert!(worker.submit(request(json!("A"), identity.clone(), json!(1.0))));
        assert!(!worker.submit(request(json!("B"), identity, json!(1.0))));

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome, CalibrationOutcome::Committed { camera_id: CameraId::new("A") });
        assert!(table.get(&CameraId::new("B")).is_none());
        assert!(worker.stop().await);
    }
}
