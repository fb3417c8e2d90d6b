//! Pilot console: inquiries answered from current state

use super::{reject, LineService};
use crate::state::CoordinationCore;
use async_trait::async_trait;
use chrono::Utc;
use hazard_channels::ConsoleHub;
use hazard_core::{decode_pilot, InteractionLog, OutboundMessage, PilotCommand, PilotReply, RunwayId};
use hazard_db::PersistJob;
use std::sync::Arc;
use tracing::debug;

impl CoordinationCore {
    pub fn answer_pilot(&self, command: PilotCommand) -> PilotReply {
        match command {
            PilotCommand::BirdRiskInquiry => PilotReply::BirdRisk(self.bird_risk()),
            PilotCommand::RunwayAStatus => PilotReply::Runway(self.runway.lock().status(RunwayId::A)),
            PilotCommand::RunwayBStatus => PilotReply::Runway(self.runway.lock().status(RunwayId::B)),
            PilotCommand::RunwayAvailability => PilotReply::Availability(self.runway.lock().availability()),
        }
    }
}

pub struct PilotService {
    core: Arc<CoordinationCore>,
}

impl PilotService {
    pub fn new(core: Arc<CoordinationCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl LineService for PilotService {
    fn channel(&self) -> &'static str {
        "pilot"
    }

    fn core(&self) -> &Arc<CoordinationCore> {
        &self.core
    }

    fn pushes(&self) -> Option<&ConsoleHub<OutboundMessage>> {
        Some(&self.core.pilot_hub)
    }

    async fn on_line(&self, line: &str) -> Option<OutboundMessage> {
        let requested_at = Utc::now();
        let command = match decode_pilot(line) {
            Ok(command) => command,
            Err(e) => return Some(reject(&self.core, self.channel(), &e)),
        };

        let reply = self.core.answer_pilot(command);
        debug!(command = command.as_wire(), result = reply.as_wire(), "Pilot inquiry answered");

        self.core.writer.submit(PersistJob::Interaction(InteractionLog {
            request_id: command.log_id(),
            response_id: reply.log_id(),
            requested_at,
            responded_at: Utc::now(),
        }));

        Some(OutboundMessage::response(command, reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use hazard_core::BirdRiskLevel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runway_inquiry_clear_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = test_support::core(dir.path());
        let service = PilotService::new(core);

        let reply = service
            .on_line(r#"{"type":"command","command":"RWY_A_STATUS"}"#)
            .await
            .unwrap();
        assert_eq!(
            reply,
            OutboundMessage::Response {
                command: "RWY_A_STATUS".into(),
                result: "CLEAR".into()
            }
        );
    }

    #[tokio::test]
    async fn test_bird_inquiry_logs_interaction() {
        let dir = tempfile::tempdir().unwrap();
        let (core, gateway) = test_support::core(dir.path());
        core.apply_bird_risk(BirdRiskLevel::Medium);
        let service = PilotService::new(core);

        let reply = service
            .on_line(r#"{"type":"command","command":"BR_INQ"}"#)
            .await
            .unwrap();
        assert_eq!(
            reply,
            OutboundMessage::Response {
                command: "BR_INQ".into(),
                result: "BR_MEDIUM".into()
            }
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.interactions().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let log = gateway.interactions()[0];
        assert_eq!(log.request_id, 1);
        assert_eq!(log.response_id, 11);
        assert!(log.responded_at >= log.requested_at);
    }

    #[tokio::test]
    async fn test_availability_follows_runways() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = test_support::core(dir.path());
        assert_eq!(
            core.answer_pilot(PilotCommand::RunwayAvailability).as_wire(),
            "ALL"
        );

        core.handle_detections(hazard_core::ObjectDetected {
            camera_id: hazard_core::CameraId::new("A"),
            img_id: 1,
            detections: vec![hazard_core::RawDetection {
                object_id: 1,
                class: "airplane".into(),
                bbox: [900.0, 400.0, 1020.0, 500.0],
                confidence: 0.9,
                rescue_level: None,
            }],
        })
        .await;

        assert_eq!(
            core.answer_pilot(PilotCommand::RunwayAvailability).as_wire(),
            "RWY_B"
        );
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (core, gateway) = test_support::core(dir.path());
        let service = PilotService::new(core);

        let reply = service
            .on_line(r#"{"type":"command","command":"TAXI_INQ"}"#)
            .await
            .unwrap();
        assert!(matches!(reply, OutboundMessage::Error { code: 2, .. }));
        assert!(gateway.interactions().is_empty());
    }
}
