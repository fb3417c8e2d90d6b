//! Channel error types

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type ChannelResult<T> = Result<T, ChannelError>;
