pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    ChunkAck, CompleteRequest, CompleteResponse, CreateSessionRequest, ErrorResponse,
    TransferSession, UploadChunkHeader,
};
pub use types::{Priority, RecordingMetadata, UploadProgress, UploadStatus};
