//! Line decoding that survives oversized input
//!
//! `Framed` ends the stream after the first decoder error, so an overlong
//! line is reported as [`Inbound::Oversized`] instead. `LinesCodec` has
//! already switched to discarding up to the next newline at that point,
//! and the following line decodes normally.

use crate::error::ChannelError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest accepted JSON line; frame events carry base64 JPEGs
pub const MAX_JSON_LINE: usize = 16 * 1024 * 1024;

/// One inbound unit on a line-oriented channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Line(String),
    /// A line exceeded the length limit and was dropped
    Oversized,
}

pub(crate) fn recover(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<Inbound>, ChannelError> {
    match decoded {
        Ok(line) => Ok(line.map(Inbound::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Inbound::Oversized)),
        Err(e) => Err(e.into()),
    }
}

/// Newline-delimited JSON codec for the intake, bird and pilot channels
#[derive(Debug)]
pub struct JsonLineCodec {
    lines: LinesCodec,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_JSON_LINE)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = Inbound;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        recover(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, ChannelError> {
        recover(self.lines.decode_eof(src))
    }
}

impl Encoder<String> for JsonLineCodec {
    type Error = ChannelError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), ChannelError> {
        Ok(self.lines.encode(line, dst)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn test_stream_continues_after_oversized_line() {
        let (mut tx, rx) = tokio::io::duplex(64 * 1024);
        let mut framed = FramedRead::new(rx, JsonLineCodec::with_max_length(32));

        let mut input = vec![b'x'; 100];
        input.extend_from_slice(b"\n{\"ok\":true}\n");
        tx.write_all(&input).await.unwrap();
        drop(tx);

        assert_eq!(framed.next().await.unwrap().unwrap(), Inbound::Oversized);
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Inbound::Line("{\"ok\":true}".to_string())
        );
        assert!(framed.next().await.is_none());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{}".to_string(), &mut buf).unwrap();

        assert_eq!(&buf[..], b"{}\n");
    }
}
