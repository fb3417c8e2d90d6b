//! Admin object-detail errors and their wire codes

use hazard_db::DbError;
use thiserror::Error;

/// Failure of an `MC_OD` lookup, reported as `MR_OD:ERR,<code>`
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Object id is not an integer: {0}")]
    InvalidObjectId(String),

    #[error("Persistence not ready")]
    NotReady,

    #[error("No event recorded for object {0}")]
    NotFound(i64),

    #[error("Event for object {0} has no image path")]
    NoImagePath(i64),

    #[error("Snapshot unreadable: {0}")]
    ImageUnreadable(#[from] std::io::Error),
}

impl AdminError {
    pub fn code(&self) -> u8 {
        match self {
            AdminError::InvalidObjectId(_) => 1,
            AdminError::NotReady => 2,
            AdminError::NotFound(_) => 3,
            AdminError::NoImagePath(_) => 4,
            AdminError::ImageUnreadable(_) => 5,
        }
    }
}

impl From<DbError> for AdminError {
    // A failed lookup is reported the same way as an unreachable store
    fn from(_: DbError) -> Self {
        AdminError::NotReady
    }
}
