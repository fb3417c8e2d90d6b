//! Bounded asynchronous persistence writer
//!
//! Hot-path callers enqueue jobs and never wait on the database. When the
//! queue is full the oldest job is discarded; a discarded detection job
//! reports failure through its completion channel so its objects can be
//! retried on a later frame.

use crate::PersistenceGateway;
use bytes::Bytes;
use hazard_core::{BirdRiskLevel, CameraId, InteractionLog, Sighting};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A unit of work for the gateway
#[derive(Debug)]
pub enum PersistJob {
    DetectionEvent {
        camera_id: CameraId,
        img_id: u64,
        sightings: Vec<Sighting>,
        crops: Vec<Bytes>,
        /// Receives `true` once the rows are stored, `false` otherwise
        done: Option<oneshot::Sender<bool>>,
    },
    BirdRisk(BirdRiskLevel),
    Interaction(InteractionLog),
}

impl PersistJob {
    fn kind(&self) -> &'static str {
        match self {
            PersistJob::DetectionEvent { .. } => "detection_event",
            PersistJob::BirdRisk(_) => "bird_risk",
            PersistJob::Interaction(_) => "interaction",
        }
    }

    /// Resolve the completion channel without running the job
    fn abandon(self) {
        if let PersistJob::DetectionEvent { done: Some(done), .. } = self {
            let _ = done.send(false);
        }
    }
}

struct Queue {
    jobs: Mutex<VecDeque<PersistJob>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// Cloneable handle to the shared job queue
#[derive(Clone)]
pub struct PersistenceWriter {
    queue: Arc<Queue>,
}

impl PersistenceWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Queue {
                jobs: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue a job. Returns `false` when an older job had to be dropped.
    pub fn submit(&self, job: PersistJob) -> bool {
        let evicted = {
            let mut jobs = self.queue.jobs.lock();
            let evicted = if jobs.len() >= self.queue.capacity {
                jobs.pop_front()
            } else {
                None
            };
            jobs.push_back(job);
            evicted
        };
        self.queue.notify.notify_one();

        match evicted {
            Some(old) => {
                let total = self.queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(kind = old.kind(), total, "Persistence queue full, dropped oldest job");
                old.abandon();
                false
            }
            None => true,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.jobs.lock().len()
    }

    /// Jobs discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Start the single consumer task
    pub fn spawn(
        &self,
        gateway: Arc<dyn PersistenceGateway>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = self.queue.clone();

        tokio::spawn(async move {
            info!("Persistence writer started");

            loop {
                let next = queue.jobs.lock().pop_front();
                match next {
                    Some(job) => run_job(gateway.as_ref(), job).await,
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = queue.notify.notified() => {}
                        }
                    }
                }

                if cancel.is_cancelled() {
                    break;
                }
            }

            let remaining: Vec<PersistJob> = queue.jobs.lock().drain(..).collect();
            if !remaining.is_empty() {
                warn!(count = remaining.len(), "Discarding unwritten jobs on shutdown");
            }
            for job in remaining {
                job.abandon();
            }

            info!("Persistence writer stopped");
        })
    }
}

impl Default for PersistenceWriter {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

async fn run_job(gateway: &dyn PersistenceGateway, job: PersistJob) {
    match job {
        PersistJob::DetectionEvent {
            camera_id,
            img_id,
            sightings,
            crops,
            done,
        } => {
            let result = gateway
                .save_detection_event(&camera_id, img_id, &sightings, &crops)
                .await;

            match &result {
                Ok(()) => debug!(camera = %camera_id, img_id, count = sightings.len(), "Stored detection event"),
                Err(e) => error!(camera = %camera_id, img_id, error = %e, "Failed to store detection event"),
            }
            if let Some(done) = done {
                let _ = done.send(result.is_ok());
            }
        }
        PersistJob::BirdRisk(level) => {
            if let Err(e) = gateway.save_bird_risk_log(level).await {
                warn!(level = level.as_wire(), error = %e, "Failed to log bird risk");
            }
        }
        PersistJob::Interaction(entry) => {
            if let Err(e) = gateway.add_interaction_log(&entry).await {
                warn!(request_id = entry.request_id, error = %e, "Failed to log pilot interaction");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryGateway, SnapshotStore};
    use std::time::Duration;

    fn detection_job(done: oneshot::Sender<bool>) -> PersistJob {
        PersistJob::DetectionEvent {
            camera_id: CameraId::new("A"),
            img_id: 1,
            sightings: Vec::new(),
            crops: Vec::new(),
            done: Some(done),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let writer = PersistenceWriter::new(2);
        let (tx, rx) = oneshot::channel();

        assert!(writer.submit(detection_job(tx)));
        assert!(writer.submit(PersistJob::BirdRisk(BirdRiskLevel::Low)));
        assert!(!writer.submit(PersistJob::BirdRisk(BirdRiskLevel::High)));

        assert_eq!(writer.pending(), 2);
        assert_eq!(writer.dropped(), 1);
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_jobs_reach_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MemoryGateway::new(SnapshotStore::new(dir.path())));
        let writer = PersistenceWriter::default();
        let cancel = CancellationToken::new();
        let handle = writer.spawn(gateway.clone(), cancel.clone());

        let (tx, rx) = oneshot::channel();
        writer.submit(PersistJob::BirdRisk(BirdRiskLevel::Medium));
        writer.submit(detection_job(tx));

        let stored = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert!(stored);
        assert_eq!(gateway.bird_log(), vec![BirdRiskLevel::Medium]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MemoryGateway::new(SnapshotStore::new(dir.path())));
        gateway.set_fail_writes(true);

        let writer = PersistenceWriter::default();
        let cancel = CancellationToken::new();
        let handle = writer.spawn(gateway, cancel.clone());

        let (tx, rx) = oneshot::channel();
        writer.submit(detection_job(tx));
        assert!(!rx.await.unwrap());

        cancel.cancel();
        handle.await.unwrap();
    }
}
