//! Connection handlers for the four TCP channels

pub mod admin;
pub mod bird;
pub mod intake;
pub mod pilot;

pub use admin::AdminHandler;
pub use bird::BirdService;
pub use intake::IntakeService;
pub use pilot::PilotService;

use crate::state::CoordinationCore;
use async_trait::async_trait;
use futures::StreamExt;
use hazard_channels::{send_json, ChannelResult, ConnectionHandler, ConsoleHub, Inbound, JsonLineCodec, MAX_JSON_LINE};
use hazard_core::{CoreError, OutboundMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Request/reply logic of a newline-delimited JSON channel
#[async_trait]
pub trait LineService: Send + Sync + 'static {
    fn channel(&self) -> &'static str;

    fn core(&self) -> &Arc<CoordinationCore>;

    /// Hub whose pushes are forwarded to every session of this channel
    fn pushes(&self) -> Option<&ConsoleHub<OutboundMessage>> {
        None
    }

    /// Handle one inbound line; the returned message is sent back to the peer
    async fn on_line(&self, line: &str) -> Option<OutboundMessage>;
}

/// Drives a [`LineService`] over one connection
pub struct JsonChannel<S> {
    service: S,
    max_line: usize,
}

impl<S: LineService> JsonChannel<S> {
    pub fn new(service: S) -> Self {
        Self::with_max_line(service, MAX_JSON_LINE)
    }

    pub fn with_max_line(service: S, max_line: usize) -> Self {
        Self { service, max_line }
    }
}

#[async_trait]
impl<S: LineService> ConnectionHandler for JsonChannel<S> {
    fn channel(&self) -> &'static str {
        self.service.channel()
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> ChannelResult<()> {
        let service = &self.service;
        let channel = service.channel();
        let metrics = &service.core().metrics;
        let client_id = Uuid::new_v4();

        let mut pushes = match service.pushes() {
            Some(hub) => Some(hub.register_client(client_id, peer)),
            None => {
                info!(channel, "Client {} connected", peer);
                None
            }
        };
        metrics.connection_opened(channel);

        let mut framed = Framed::new(stream, JsonLineCodec::with_max_length(self.max_line));
        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                push = next_push(&mut pushes) => match push {
                    Ok(message) => {
                        if let Err(e) = send_json(&mut framed, &message).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel, "Client {} lagged, skipped {} messages", peer, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                },

                line = framed.next() => match line {
                    Some(Ok(Inbound::Line(line))) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        metrics.record_message(channel);
                        if let Some(reply) = service.on_line(&line).await {
                            if let Err(e) = send_json(&mut framed, &reply).await {
                                break Err(e);
                            }
                        }
                    }
                    Some(Ok(Inbound::Oversized)) => {
                        let reply = reject(service.core(), channel, &CoreError::LineTooLong(self.max_line));
                        if let Err(e) = send_json(&mut framed, &reply).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },
            }
        };

        match service.pushes() {
            Some(hub) => hub.unregister_client(client_id),
            None => info!(channel, "Client {} disconnected", peer),
        }
        metrics.connection_closed(channel);
        debug!(channel, "Session with {} ended", peer);
        result
    }
}

/// Next push, or never when the channel has no hub
async fn next_push<M: Clone>(
    pushes: &mut Option<broadcast::Receiver<M>>,
) -> Result<M, broadcast::error::RecvError> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Coded error reply for a rejected line
pub(crate) fn reject(core: &CoordinationCore, channel: &'static str, err: &hazard_core::CoreError) -> OutboundMessage {
    warn!(channel, error = %err, "Rejected message");
    core.metrics.record_protocol_error(channel);
    OutboundMessage::error(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use futures::SinkExt;
    use tokio_util::codec::LinesCodec;

    async fn next_message(client: &mut Framed<TcpStream, LinesCodec>) -> OutboundMessage {
        let line = tokio::time::timeout(std::time::Duration::from_secs(5), client.next())
            .await
            .expect("no line within 5s")
            .expect("connection closed")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_pilot_session_replies_and_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = test_support::core(dir.path());
        let addr = test_support::listen(&core, JsonChannel::new(PilotService::new(core.clone()))).await;
        let mut client = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());

        client.send(r#"{"type":"command","command":"RWY_B_STATUS"}"#).await.unwrap();
        assert_eq!(
            next_message(&mut client).await,
            OutboundMessage::Response {
                command: "RWY_B_STATUS".into(),
                result: "CLEAR".into(),
            }
        );

        core.pilot_hub.broadcast(OutboundMessage::event("BR_CHANGED", "BR_HIGH"));
        assert_eq!(
            next_message(&mut client).await,
            OutboundMessage::event("BR_CHANGED", "BR_HIGH")
        );

        core.cancel.cancel();
    }

    #[tokio::test]
    async fn test_session_survives_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _) = test_support::core(dir.path());
        let handler = JsonChannel::with_max_line(PilotService::new(core.clone()), 64);
        let addr = test_support::listen(&core, handler).await;
        let mut client = Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new());

        client.send("{oops").await.unwrap();
        assert!(matches!(next_message(&mut client).await, OutboundMessage::Error { code: 1, .. }));

        client.send("x".repeat(200)).await.unwrap();
        match next_message(&mut client).await {
            OutboundMessage::Error { code, reason } => {
                assert_eq!(code, 1);
                assert!(reason.contains("64"));
            }
            other => panic!("unexpected {:?}", other),
        }

        client.send(r#"{"type":"command","command":"BR_INQ"}"#).await.unwrap();
        assert_eq!(
            next_message(&mut client).await,
            OutboundMessage::Response {
                command: "BR_INQ".into(),
                result: "BR_LOW".into(),
            }
        );

        core.cancel.cancel();
    }
}
