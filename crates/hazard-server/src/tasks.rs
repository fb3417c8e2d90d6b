//! Background tasks driven by timers rather than connections

use crate::state::CoordinationCore;
use bytes::Bytes;
use hazard_channels::{AdminFrame, AdminPush, AdminTopic};
use hazard_core::CameraId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const ALERT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start every background task of the coordinator
pub fn spawn_background(core: &Arc<CoordinationCore>) -> Vec<JoinHandle<()>> {
    vec![
        core.writer.spawn(core.gateway.clone(), core.cancel.child_token()),
        spawn_calibration_forwarder(core.clone()),
        spawn_runway_poll(core.clone()),
        spawn_playback(core.clone()),
        spawn_reconnect(core.clone()),
        spawn_alert_sweep(core.clone()),
    ]
}

/// Relay calibration outcomes to connected detection producers
pub fn spawn_calibration_forwarder(core: Arc<CoordinationCore>) -> JoinHandle<()> {
    let mut outcomes = core.calibration_worker.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = core.cancel.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Ok(outcome) => {
                        core.metrics.record_calibration(outcome.is_committed());
                        core.intake_hub.broadcast(outcome.to_message());
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Calibration forwarder lagged, skipped {} outcomes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Re-evaluate runways between batches so CLEAR is reported when detections stop
pub fn spawn_runway_poll(core: Arc<CoordinationCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(core.config.runway.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = core.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let changes = {
                        let mut runway = core.runway.lock();
                        runway.refresh();
                        runway.check_status_changes()
                    };
                    core.publish_runway_changes(changes);
                }
            }
        }
    })
}

/// Advance every camera's playback cursor and push the frame to viewers
pub fn spawn_playback(core: Arc<CoordinationCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(core.config.playback_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = core.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for (camera_id, img_id, frame) in advance_playback(&core) {
                        core.admin_hub.broadcast(camera_frame_push(camera_id, img_id, frame));
                    }
                }
            }
        }
    })
}

fn advance_playback(core: &CoordinationCore) -> Vec<(CameraId, u64, Bytes)> {
    core.frames
        .iter_mut()
        .filter_map(|mut entry| {
            let img_id = entry.value_mut().advance()?;
            let frame = entry.value().get(img_id)?;
            Some((entry.key().clone(), img_id, frame))
        })
        .collect()
}

fn camera_frame_push(camera_id: CameraId, img_id: u64, frame: Bytes) -> AdminPush {
    let header = format!("ME_CV:{},{},{},", camera_id, img_id, frame.len());
    AdminPush::new(AdminTopic::Camera(camera_id), AdminFrame::binary(header, frame))
}

/// Keep trying to reach the store while it is not ready
pub fn spawn_reconnect(core: Arc<CoordinationCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(core.config.reconnect_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = core.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !core.gateway.is_ready() {
                        match core.gateway.reconnect().await {
                            Ok(()) if core.gateway.is_ready() => info!("Database reconnected"),
                            Ok(()) => {}
                            Err(e) => warn!(error = %e, "Database reconnect failed"),
                        }
                    }
                    core.metrics.set_db_connected(core.gateway.is_ready());
                }
            }
        }
    })
}

/// Drop first-sighting records of objects that left the field of view
pub fn spawn_alert_sweep(core: Arc<CoordinationCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = core.config.alert_idle_ttl();
        let mut ticker = tokio::time::interval(ALERT_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = core.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    core.dedup.evict_idle(ttl);
                }
            }
        }
    })
}
