use voxlift_protocol::RecordingMetadata;

use crate::TransferError;

/// Validates recording metadata before it is enqueued or sent to the
/// session endpoint.
///
/// Rejects:
/// - Blank title or subject
/// - Negative, NaN or infinite duration
/// - Empty payloads
pub fn validate_metadata(metadata: &RecordingMetadata) -> Result<(), TransferError> {
    if metadata.title.trim().is_empty() {
        return Err(TransferError::InvalidMetadata("title is empty".into()));
    }
    if metadata.subject.trim().is_empty() {
        return Err(TransferError::InvalidMetadata("subject is empty".into()));
    }
    if !metadata.duration_secs.is_finite() || metadata.duration_secs < 0.0 {
        return Err(TransferError::InvalidMetadata(format!(
            "invalid duration: {}",
            metadata.duration_secs
        )));
    }
    if metadata.size_bytes == 0 {
        return Err(TransferError::InvalidMetadata("payload is empty".into()));
    }
    Ok(())
}

/// Picks the chunk size for a session.
///
/// Uses the session's recommendation, falling back to `fallback` when it
/// recommends nothing, and never exceeds a non-zero `max`.
pub fn effective_chunk_size(
    recommended: u64,
    max: u64,
    fallback: u64,
) -> Result<u64, TransferError> {
    let mut size = if recommended > 0 { recommended } else { fallback };
    if max > 0 {
        size = size.min(max);
    }
    if size == 0 {
        return Err(TransferError::InvalidChunkSize(
            "no usable chunk size".into(),
        ));
    }
    Ok(size)
}
