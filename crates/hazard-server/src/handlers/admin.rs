//! Admin console: text commands, text or header+image replies, filtered pushes

use crate::error::AdminError;
use crate::state::CoordinationCore;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hazard_channels::{AdminCodec, AdminFrame, AdminView, ChannelResult, ConnectionHandler, Inbound};
use hazard_core::{wire_timestamp, AccessCondition, ObjectId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Parsed admin command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand<'a> {
    ObjectDetail(&'a str),
    MapView,
    CameraA,
    CameraB,
    ReadAccess,
    UpdateAccess(&'a str),
    Unknown(&'a str),
}

impl<'a> AdminCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let (name, arg) = match line.split_once(':') {
            Some((name, arg)) => (name, arg),
            None => (line, ""),
        };

        match name {
            "MC_OD" => AdminCommand::ObjectDetail(arg),
            "MC_MP" => AdminCommand::MapView,
            "MC_CA" => AdminCommand::CameraA,
            "MC_CB" => AdminCommand::CameraB,
            "AC_AC" => AdminCommand::ReadAccess,
            "AC_UA" => AdminCommand::UpdateAccess(arg),
            _ => AdminCommand::Unknown(line),
        }
    }
}

impl CoordinationCore {
    /// Answer one admin command; view switches update `view`
    pub async fn handle_admin_command(&self, line: &str, view: &mut AdminView) -> AdminFrame {
        match AdminCommand::parse(line) {
            AdminCommand::ObjectDetail(arg) => match self.object_detail(arg).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Object detail failed");
                    AdminFrame::line(format!("MR_OD:ERR,{}", e.code()))
                }
            },
            AdminCommand::MapView => {
                *view = AdminView::Map;
                AdminFrame::line("MR_MP:OK")
            }
            AdminCommand::CameraA => {
                *view = AdminView::Camera(self.config.camera_a());
                AdminFrame::line("MR_CA:OK")
            }
            AdminCommand::CameraB => {
                *view = AdminView::Camera(self.config.camera_b());
                AdminFrame::line("MR_CB:OK")
            }
            AdminCommand::ReadAccess => match self.access.get().await {
                Ok(access) => AdminFrame::line(format!("AR_AC:OK,{}", access.to_wire())),
                Err(e) => {
                    warn!(error = %e, "Access levels unavailable");
                    AdminFrame::line(format!("AR_AC:ERR,{}", e.code()))
                }
            },
            AdminCommand::UpdateAccess(arg) => {
                let result = match AccessCondition::parse_wire(arg) {
                    Ok(access) => self.access.commit(access).await,
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(access) => {
                        info!(levels = %access.to_wire(), "Access levels updated");
                        AdminFrame::line("AR_UA:OK")
                    }
                    Err(e) => {
                        warn!(error = %e, "Access level update rejected");
                        AdminFrame::line(format!("AR_UA:ERR,{}", e.code()))
                    }
                }
            }
            AdminCommand::Unknown(command) => {
                debug!(command, "Unknown admin command");
                AdminFrame::line("ER_UK:ERR,1")
            }
        }
    }

    /// `MR_OD:OK` header and the stored snapshot of a first sighting
    async fn object_detail(&self, arg: &str) -> Result<AdminFrame, AdminError> {
        let object_id = ObjectId::parse(arg).map_err(|_| AdminError::InvalidObjectId(arg.to_string()))?;

        if !self.gateway.is_ready() {
            return Err(AdminError::NotReady);
        }

        let event = self
            .gateway
            .get_event_by_object_id(object_id)
            .await?
            .ok_or(AdminError::NotFound(object_id.0))?;

        let path = event
            .image_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(AdminError::NoImagePath(object_id.0))?;
        let image = tokio::fs::read(path).await?;

        let header = format!(
            "MR_OD:OK,{},{},{},{},{},{}\n",
            event.kind.code(),
            event.object_id,
            event.class,
            event.zone,
            wire_timestamp(&event.detected_at),
            image.len()
        );
        Ok(AdminFrame::binary(header, Bytes::from(image)))
    }
}

pub struct AdminHandler {
    core: Arc<CoordinationCore>,
}

impl AdminHandler {
    pub fn new(core: Arc<CoordinationCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl ConnectionHandler for AdminHandler {
    fn channel(&self) -> &'static str {
        "admin"
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> ChannelResult<()> {
        let core = &self.core;
        let client_id = Uuid::new_v4();
        let mut pushes = core.admin_hub.register_client(client_id, peer);
        core.metrics.connection_opened("admin");

        let mut framed = Framed::new(stream, AdminCodec::new());
        let mut view = AdminView::default();

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                push = pushes.recv() => match push {
                    Ok(push) if push.topic.visible_in(&view) => {
                        if let Err(e) = framed.send(push.frame).await {
                            break Err(e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Admin {} lagged, skipped {} pushes", peer, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },

                line = framed.next() => match line {
                    Some(Ok(Inbound::Line(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        core.metrics.record_message("admin");
                        let reply = core.handle_admin_command(&line, &mut view).await;
                        if let Err(e) = framed.send(reply).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Inbound::Oversized)) => {
                        warn!("Oversized admin command from {} discarded", peer);
                        core.metrics.record_protocol_error("admin");
                        if let Err(e) = framed.send(AdminFrame::line("ER_UK:ERR,1")).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },
            }
        };

        core.admin_hub.unregister_client(client_id);
        core.metrics.connection_closed("admin");
        result
    }
}

// ============================================================================
// TESTS
// ============================================================================
