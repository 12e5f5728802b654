//! Upload and queue error types.

use voxlift_job_store::{InvalidTransition, StoreError};
use voxlift_protocol::UploadStatus;
use voxlift_transfer::TransferError;

/// Coarse error class used for retry decisions and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Server,
    Auth,
    Corruption,
    Storage,
}

/// Failure of one upload attempt or one protocol call.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("not authorized: {0}")]
    Auth(String),

    #[error("transfer session expired")]
    SessionExpired,

    #[error("payload checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("chunk {chunk} rejected: {reason}")]
    ChunkRejected { chunk: u32, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_)
            | UploadError::Timeout
            | UploadError::SessionExpired
            | UploadError::ChunkRejected { .. }
            | UploadError::Store(_) => true,
            UploadError::Server { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            UploadError::Validation(_)
            | UploadError::Auth(_)
            | UploadError::ChecksumMismatch(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(_) => ErrorKind::Validation,
            UploadError::Network(_) | UploadError::Timeout => ErrorKind::Network,
            UploadError::Server { .. }
            | UploadError::SessionExpired
            | UploadError::ChunkRejected { .. } => ErrorKind::Server,
            UploadError::Auth(_) => ErrorKind::Auth,
            UploadError::ChecksumMismatch(_) => ErrorKind::Corruption,
            UploadError::Store(_) => ErrorKind::Storage,
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        UploadError::Validation(e.to_string())
    }
}

/// Errors returned by the public queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {id} is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: UploadStatus,
        action: &'static str,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("queue already initialized")]
    AlreadyRunning,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl From<TransferError> for QueueError {
    fn from(e: TransferError) -> Self {
        QueueError::Validation(e.to_string())
    }
}
