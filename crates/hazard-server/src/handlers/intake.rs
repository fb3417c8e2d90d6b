//! Detection intake: detections, calibration requests and camera frames

use super::{reject, LineService};
use crate::state::CoordinationCore;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use hazard_channels::ConsoleHub;
use hazard_core::{decode_intake, CameraId, CoreError, FrameCaptured, IntakeEvent, OutboundMessage};
use std::sync::Arc;
use tracing::trace;

pub struct IntakeService {
    core: Arc<CoordinationCore>,
}

impl IntakeService {
    pub fn new(core: Arc<CoordinationCore>) -> Self {
        Self { core }
    }

    fn store_frame(&self, frame: FrameCaptured) -> Result<(), CoreError> {
        let data = STANDARD
            .decode(frame.image.as_bytes())
            .map_err(|e| CoreError::invalid_field(format!("frame image: {}", e)))?;

        trace!(camera = %frame.camera_id, img_id = frame.img_id, size = data.len(), "Frame received");
        self.core.insert_frame(frame.camera_id, frame.img_id, Bytes::from(data));
        Ok(())
    }
}

#[async_trait]
impl LineService for IntakeService {
    fn channel(&self) -> &'static str {
        "intake"
    }

    fn core(&self) -> &Arc<CoordinationCore> {
        &self.core
    }

    fn pushes(&self) -> Option<&ConsoleHub<OutboundMessage>> {
        Some(&self.core.intake_hub)
    }

    async fn on_line(&self, line: &str) -> Option<OutboundMessage> {
        let event = match decode_intake(line) {
            Ok(event) => event,
            Err(e) => return Some(reject(&self.core, self.channel(), &e)),
        };

        match event {
            IntakeEvent::ObjectDetected(message) => {
                self.core.handle_detections(message).await;
                None
            }
            IntakeEvent::MapCalibration(request) => {
                let camera_id = request.camera_id.as_ref().and_then(CameraId::from_json);
                if self.core.calibration_worker.submit(request) {
                    None
                } else {
                    self.core.metrics.record_calibration(false);
                    Some(OutboundMessage::calibration_result(
                        camera_id.as_ref().map(CameraId::as_str).unwrap_or("unknown"),
                        Some("calibration queue full".to_string()),
                    ))
                }
            }
            IntakeEvent::FrameCaptured(frame) => match self.store_frame(frame) {
                Ok(()) => None,
                Err(e) => Some(reject(&self.core, self.channel(), &e)),
            },
        }
    }
}
