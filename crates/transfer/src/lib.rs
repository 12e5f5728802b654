//! Chunked transfer primitives: deterministic chunk planning with resume
//! arithmetic, SHA-256 checksums, and transfer speed tracking.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkPlan, checksum_bytes};
pub use progress::SpeedCalculator;
pub use types::Chunk;
pub use validation::{effective_chunk_size, validate_metadata};

/// Default chunk size: 1 MiB.
///
/// Used when the session does not recommend a size.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("chunk {number} out of range (total {total})")]
    ChunkOutOfRange { number: u32, total: u32 },
}
