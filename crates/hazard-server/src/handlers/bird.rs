//! Bird subsystem channel

use super::{reject, LineService};
use crate::state::CoordinationCore;
use async_trait::async_trait;
use hazard_channels::{AdminFrame, AdminPush, AdminTopic};
use hazard_core::{decode_bird, BirdRiskLevel, OutboundMessage};
use hazard_db::PersistJob;
use std::sync::Arc;
use tracing::info;

impl CoordinationCore {
    /// Record a new bird risk level and tell admins and pilots
    pub fn apply_bird_risk(&self, level: BirdRiskLevel) {
        let previous = std::mem::replace(&mut *self.bird_risk.write(), level);
        info!(from = previous.as_wire(), to = level.as_wire(), "Bird risk updated");

        self.metrics.set_bird_risk(level);
        self.admin_hub.broadcast(AdminPush::new(
            AdminTopic::All,
            AdminFrame::line(format!("ME_BR:{}", level.code())),
        ));
        self.pilot_hub
            .broadcast(OutboundMessage::event("BR_CHANGED", level.as_wire()));
        self.writer.submit(PersistJob::BirdRisk(level));
    }
}

pub struct BirdService {
    core: Arc<CoordinationCore>,
}

impl BirdService {
    pub fn new(core: Arc<CoordinationCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl LineService for BirdService {
    fn channel(&self) -> &'static str {
        "bird"
    }

    fn core(&self) -> &Arc<CoordinationCore> {
        &self.core
    }

    async fn on_line(&self, line: &str) -> Option<OutboundMessage> {
        match decode_bird(line) {
            Ok(level) => {
                self.core.apply_bird_risk(level);
                None
            }
            Err(e) => Some(reject(&self.core, self.channel(), &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_bird_change_fans_out() {
        let dir = tempfile::tempdir().unwrap();
        let (core, gateway) = test_support::core(dir.path());
        let mut admin = core.admin_hub.register_client(Uuid::new_v4(), test_support::peer());
        let mut pilot = core.pilot_hub.register_client(Uuid::new_v4(), test_support::peer());
        let service = BirdService::new(core.clone());

        let reply = service
            .on_line(r#"{"type":"event","event":"BR_CHANGED","result":"BR_HIGH"}"#)
            .await;
        assert!(reply.is_none());
        assert_eq!(core.bird_risk(), BirdRiskLevel::High);

        assert_eq!(admin.recv().await.unwrap().frame, AdminFrame::line("ME_BR:2"));
        assert_eq!(
            pilot.recv().await.unwrap(),
            OutboundMessage::event("BR_CHANGED", "BR_HIGH")
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.bird_log().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(gateway.bird_log(), vec![BirdRiskLevel::High]);
    }

    #[tokio::test]
    async fn test_invalid_level_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = test_support::core(dir.path());
        let service = BirdService::new(core.clone());

        let reply = service
            .on_line(r#"{"type":"event","event":"BR_CHANGED","result":"BR_EXTREME"}"#)
            .await
            .unwrap();
        assert!(matches!(reply, OutboundMessage::Error { code: 3, .. }));
        assert_eq!(core.bird_risk(), BirdRiskLevel::Low);
    }
}
