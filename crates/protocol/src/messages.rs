use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RecordingMetadata;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a transfer session for one job attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub metadata: RecordingMetadata,
    pub total_bytes: u64,
    /// SHA-256 hex digest of the whole payload.
    pub checksum: String,
}

/// Describes one chunk sent to the chunk endpoint.
///
/// The chunk bytes travel as the raw request body; this header rides along
/// as request headers (HTTP) or as the JSON half of a framed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkHeader {
    pub session_id: String,
    /// 1-based chunk number.
    pub chunk_number: u32,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Asks the server to assemble the uploaded chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub session_id: String,
    pub validate_checksum: bool,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Server-issued handle correlating all chunks of one job attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    pub session_id: String,
    pub upload_endpoint: String,
    pub complete_endpoint: String,
    #[serde(default)]
    pub recommended_chunk_size_bytes: u64,
    #[serde(default)]
    pub max_chunk_size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

impl TransferSession {
    /// Returns `true` once `expires_at` has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Acknowledges receipt of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub chunk_number: u32,
    pub received: bool,
    /// Checksum the server computed over the bytes it stored, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub final_artifact_ref: String,
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Error code the complete endpoint uses for a payload checksum mismatch.
pub const CHECKSUM_MISMATCH_CODE: &str = "checksum_mismatch";
