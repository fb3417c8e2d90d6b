//! Admin console framing
//!
//! Commands arrive as newline-terminated text. Replies and pushes are either
//! a text line or a header followed directly by raw image bytes; the header
//! carries its own terminator so the console knows where the bytes start.

use crate::error::ChannelError;
use crate::lines::{recover, Inbound};
use bytes::{BufMut, Bytes, BytesMut};
use hazard_core::CameraId;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

/// Longest accepted admin command
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// One outbound unit on the admin channel
#[derive(Debug, Clone, PartialEq)]
pub enum AdminFrame {
    /// Text line, newline added on encode
    Line(String),
    /// Self-terminated header followed by exactly `payload.len()` bytes
    Binary { header: String, payload: Bytes },
}

impl AdminFrame {
    pub fn line(text: impl Into<String>) -> Self {
        AdminFrame::Line(text.into())
    }

    pub fn binary(header: impl Into<String>, payload: Bytes) -> Self {
        AdminFrame::Binary {
            header: header.into(),
            payload,
        }
    }
}

/// What an admin session is currently looking at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AdminView {
    #[default]
    Map,
    Camera(CameraId),
}

/// Audience of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminTopic {
    All,
    MapView,
    Camera(CameraId),
}

impl AdminTopic {
    pub fn visible_in(&self, view: &AdminView) -> bool {
        match (self, view) {
            (AdminTopic::All, _) => true,
            (AdminTopic::MapView, AdminView::Map) => true,
            (AdminTopic::Camera(topic), AdminView::Camera(viewing)) => topic == viewing,
            _ => false,
        }
    }
}

/// Push broadcast to admin sessions
#[derive(Debug, Clone)]
pub struct AdminPush {
    pub topic: AdminTopic,
    pub frame: AdminFrame,
}

impl AdminPush {
    pub fn new(topic: AdminTopic, frame: AdminFrame) -> Self {
        Self { topic, frame }
    }
}

/// Line decoder and line/binary encoder for the admin channel
#[derive(Debug)]
pub struct AdminCodec {
    lines: LinesCodec,
}

impl AdminCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_COMMAND_LENGTH),
        }
    }
}

impl Default for AdminCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AdminCodec {
    type Item = Inbound;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        recover(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        recover(self.lines.decode_eof(src))
    }
}

impl Encoder<AdminFrame> for AdminCodec {
    type Error = ChannelError;

    fn encode(&mut self, frame: AdminFrame, dst: &mut BytesMut) -> Result<(), ChannelError> {
        match frame {
            AdminFrame::Line(text) => {
                dst.reserve(text.len() + 1);
                dst.put_slice(text.as_bytes());
                dst.put_u8(b'\n');
            }
            AdminFrame::Binary { header, payload } => {
                dst.reserve(header.len() + payload.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_line() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(AdminFrame::line("MR_MP:OK"), &mut buf).unwrap();

        assert_eq!(&buf[..], b"MR_MP:OK\n");
    }

    #[test]
    fn test_encode_binary_follows_header() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::new();
        let payload = Bytes::from_static(&[0xFF, 0xD8, 0x00, 0x0A]);
        codec
            .encode(AdminFrame::binary("ME_FD:1,7,bird,10,20,5,t,4,", payload), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], b"ME_FD:1,7,bird,10,20,5,t,4,\xFF\xD8\x00\x0A");
    }

    #[test]
    fn test_decode_commands() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::from(&b"MC_MP\r\nMC_OD:4"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Line("MC_MP".to_string())));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Inbound::Line("MC_OD:4".to_string())));
    }

    #[test]
    fn test_overlong_command_then_next_command() {
        let mut codec = AdminCodec::new();
        let mut bytes = vec![b'A'; MAX_COMMAND_LENGTH + 10];
        bytes.extend_from_slice(b"\nMC_MP\n");
        let mut buf = BytesMut::from(bytes.as_slice());

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Oversized));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Inbound::Line("MC_MP".to_string())));
    }

    #[test]
    fn test_topic_visibility() {
        let cam_a = CameraId::new("A");
        let camera_view = AdminView::Camera(cam_a.clone());

        assert!(AdminTopic::All.visible_in(&camera_view));
        assert!(AdminTopic::MapView.visible_in(&AdminView::Map));
        assert!(!AdminTopic::MapView.visible_in(&camera_view));
        assert!(AdminTopic::Camera(cam_a).visible_in(&camera_view));
        assert!(!AdminTopic::Camera(CameraId::new("B")).visible_in(&camera_view));
    }
}
