//! Upload job model and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use voxlift_protocol::{
    Priority, RecordingMetadata, TransferSession, UploadProgress, UploadStatus,
};

/// Why a job sits in `paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseReason {
    /// Explicit pause request; only an explicit resume clears it.
    User,
    /// Connectivity loss; cleared when the network comes back.
    Offline,
}

/// Per-job transfer settings, fixed at enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Preferred chunk size, used when the session recommends none.
    pub chunk_size_bytes: u64,
    pub compression_enabled: bool,
    /// Ask the server to validate the whole-payload checksum on complete,
    /// and compare per-chunk checksums the server echoes back.
    pub validation_enabled: bool,
}

/// One acknowledged chunk. Its existence is the proof of durable progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ChunkRecord {
    /// A positively acknowledged chunk.
    pub fn acknowledged(checksum: impl Into<String>) -> Self {
        Self {
            uploaded: true,
            checksum: Some(checksum.into()),
        }
    }
}

/// Returned when a status change is not an edge of the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: UploadStatus,
    pub to: UploadStatus,
}

/// One logical transfer of a recorded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJob {
    pub id: String,
    pub metadata: RecordingMetadata,
    pub status: UploadStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub progress: UploadProgress,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub config: JobConfig,
    /// SHA-256 hex digest of the whole payload.
    pub checksum: String,
    /// Session of the current attempt, reused until it expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<TransferSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReason>,
    /// Final artifact reference returned by a successful complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    /// Chunk size the stored chunk records were cut with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_chunk_size: Option<u64>,
}

impl UploadJob {
    /// Creates a `pending` job with a fresh id.
    pub fn new(
        metadata: RecordingMetadata,
        priority: Priority,
        max_retries: u32,
        config: JobConfig,
        checksum: String,
    ) -> Self {
        let created_at = metadata.created_at;
        let progress = UploadProgress::new(metadata.size_bytes);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata,
            status: UploadStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            last_error: None,
            progress,
            created_at,
            started_at: None,
            last_activity_at: None,
            completed_at: None,
            config,
            checksum,
            session: None,
            pause_reason: None,
            artifact_ref: None,
            acknowledged_chunk_size: None,
        }
    }

    /// Returns `true` if `to` is an edge out of the current status.
    pub fn can_transition_to(&self, to: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self.status, to),
            (Pending, Uploading)
                | (Pending, Paused)
                | (Pending, Cancelled)
                | (Uploading, Completed)
                | (Uploading, Pending)
                | (Uploading, Failed)
                | (Uploading, Paused)
                | (Uploading, Cancelled)
                | (Paused, Pending)
                | (Paused, Cancelled)
                | (Failed, Pending)
        )
    }

    /// Moves the job to `to`, maintaining timestamps.
    pub fn transition(
        &mut self,
        to: UploadStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.last_activity_at = Some(now);
        if to != UploadStatus::Paused {
            self.pause_reason = None;
        }
        match to {
            UploadStatus::Uploading => {
                self.started_at.get_or_insert(now);
            }
            UploadStatus::Completed => {
                self.completed_at.get_or_insert(now);
                self.progress.finish();
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns `true` once the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Drops the session. Acknowledged progress survives; the next session
    /// resumes after the last acknowledged chunk.
    pub fn discard_session(&mut self) {
        self.session = None;
    }

    /// Forgets all acknowledged progress. The caller clears the chunk records.
    pub fn reset_progress(&mut self) {
        let total = self.progress.total_bytes;
        self.progress.reset(0, total);
        self.acknowledged_chunk_size = None;
    }
}
