//! Error types for the hazard coordinator domain

use thiserror::Error;

/// Core error type: protocol decoding and domain validation failures
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("Line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Expected {expected} zone entries, got {actual}")]
    WrongZoneCount { expected: usize, actual: usize },

    #[error("Invalid authority level: {0}")]
    InvalidAuthorityLevel(String),

    #[error("Invalid object id: {0}")]
    InvalidObjectId(String),
}

impl CoreError {
    pub fn unknown(what: impl Into<String>) -> Self {
        Self::UnknownMessage(what.into())
    }

    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }

    /// Numeric code reported on the JSON channels
    pub fn wire_code(&self) -> u8 {
        match self {
            CoreError::MalformedJson(_) | CoreError::LineTooLong(_) => 1,
            CoreError::UnknownMessage(_) => 2,
            _ => 3,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
