//! Database error types

use thiserror::Error;

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Persistence not ready")]
    NotReady,

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}

pub type DbResult<T> = Result<T, DbError>;
