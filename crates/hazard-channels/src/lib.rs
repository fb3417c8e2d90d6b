//! # Hazard Channels
//!
//! Plumbing for the four TCP channels of the coordinator:
//! - [`ConsoleHub`]: per-channel broadcast of pushes to connected sessions
//! - [`listener::serve`]: cancellable accept loop, one task per connection
//! - [`AdminCodec`]: line commands in, text or header+bytes frames out
//! - [`JsonLineCodec`]: one JSON object per line for intake, bird and pilot
//!
//! Both codecs report an overlong line as [`Inbound::Oversized`] and keep
//! the connection usable.

pub mod admin;
pub mod error;
pub mod hub;
pub mod lines;
pub mod listener;

pub use admin::{AdminCodec, AdminFrame, AdminPush, AdminTopic, AdminView};
pub use error::{ChannelError, ChannelResult};
pub use hub::ConsoleHub;
pub use lines::{Inbound, JsonLineCodec, MAX_JSON_LINE};
pub use listener::{bind, serve, ConnectionHandler};

use futures::{Sink, SinkExt};
use hazard_core::OutboundMessage;

/// Write one outbound message as a JSON line
pub async fn send_json<S>(sink: &mut S, message: &OutboundMessage) -> ChannelResult<()>
where
    S: Sink<String, Error = ChannelError> + Unpin,
{
    sink.send(message.to_line()).await?;
    Ok(())
}
