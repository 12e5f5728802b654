use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl UploadStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [UploadStatus; 6] = [
        UploadStatus::Pending,
        UploadStatus::Uploading,
        UploadStatus::Paused,
        UploadStatus::Completed,
        UploadStatus::Failed,
        UploadStatus::Cancelled,
    ];

    /// Returns `true` for states no automatic transition leaves.
    ///
    /// `Failed` counts as terminal: only an explicit retry re-queues it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }

    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Paused => "paused",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UploadStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown upload status: {s}"))
    }
}

/// Scheduling priority, fixed at enqueue.
///
/// Variants are declared most-urgent first so the derived `Ord` sorts
/// `Urgent` ahead of `Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "urgent" => Ok(Priority::Urgent),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Descriptive fields of a recorded audio artifact. Immutable after enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub subject: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    /// Recording length in seconds.
    pub duration_secs: f64,
    /// Size of the payload handed to the queue (after optional compression).
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Chunk-granular progress of the current attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub chunks_uploaded: u32,
    pub total_chunks: u32,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub percentage: f64,
}

impl UploadProgress {
    /// Empty progress for a payload of `total_bytes`; chunk count unknown until
    /// a session fixes the chunk size.
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            ..Self::default()
        }
    }

    /// Resets counters for a freshly created session.
    pub fn reset(&mut self, total_chunks: u32, total_bytes: u64) {
        self.total_chunks = total_chunks;
        self.total_bytes = total_bytes;
        self.chunks_uploaded = 0;
        self.bytes_uploaded = 0;
        self.percentage = 0.0;
    }

    /// Overwrites the counters from the set of acknowledged chunks.
    ///
    /// Values are clamped so the invariants `chunks <= total_chunks` and
    /// `bytes <= total_bytes` hold even for inconsistent input.
    pub fn set_acknowledged(&mut self, chunks: u32, bytes: u64) {
        self.chunks_uploaded = chunks.min(self.total_chunks);
        self.bytes_uploaded = bytes.min(self.total_bytes);
        self.percentage = self.compute_percentage();
    }

    /// Marks every chunk as transferred.
    pub fn finish(&mut self) {
        self.set_acknowledged(self.total_chunks, self.total_bytes);
        self.percentage = 100.0;
    }

    fn compute_percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_uploaded as f64 / self.total_bytes as f64 * 100.0
    }
}
