//! Node error types.
//!
//! Four-way taxonomy named directly after the data model's error handling
//! section: a caller-facing command was malformed (`User`), a quorum could
//! not be reached within the deadline but may succeed on retry
//! (`Transient`), a `get` found no rows at all for a key (`ReadMiss`), or
//! something the node cannot recover from on its own (`Fatal`).

use dynamo_storage::StorageError;
use dynamo_wire::WireError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bad request: {0}")]
    User(String),

    #[error("quorum not reached within the deadline: {0}")]
    Transient(String),

    #[error("no rows found for key")]
    ReadMiss,

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("ring error: {0}")]
    Ring(#[from] dynamo_ring::RingError),

    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl ServerError {
    pub fn is_user_error(&self) -> bool {
        matches!(self, ServerError::User(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServerError::Transient(_))
    }
}
