//! Store error types.

/// Errors produced by a [`JobStore`](crate::JobStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid job id: {0}")]
    InvalidId(String),

    #[error("payload missing for job {0}")]
    PayloadMissing(String),

    #[error("payload range {start}..{end} out of bounds for job {job_id} ({len} bytes)")]
    PayloadRange {
        job_id: String,
        start: u64,
        end: u64,
        len: u64,
    },
}

/// Rejects ids that could escape the store directory.
///
/// Job ids are generated UUIDs, but ids also arrive from callers (CLI
/// arguments, UI requests), so anything beyond `[A-Za-z0-9_-]` is refused.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
