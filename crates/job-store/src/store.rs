//! The store contract shared by the file-backed and in-memory stores.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use voxlift_protocol::UploadStatus;

use crate::error::StoreError;
use crate::job::{ChunkRecord, UploadJob};

/// Durable record store for upload jobs.
///
/// Writes are atomic per record and visible to a process restart as soon as
/// the call returns. There are no cross-record transactions; callers that
/// need read-modify-write consistency serialize those sequences themselves.
pub trait JobStore: Send + Sync {
    /// Inserts or replaces a job record.
    fn put(&self, job: &UploadJob) -> Result<(), StoreError>;

    /// Returns the job with `id`, if any.
    fn get(&self, id: &str) -> Result<Option<UploadJob>, StoreError>;

    /// Returns every job record.
    fn list(&self) -> Result<Vec<UploadJob>, StoreError>;

    /// Returns the jobs currently in `status`.
    fn list_by_status(&self, status: UploadStatus) -> Result<Vec<UploadJob>, StoreError> {
        let mut jobs = self.list()?;
        jobs.retain(|job| job.status == status);
        Ok(jobs)
    }

    /// Records the acknowledgment state of one chunk.
    fn put_chunk_record(
        &self,
        job_id: &str,
        chunk_number: u32,
        record: &ChunkRecord,
    ) -> Result<(), StoreError>;

    /// All chunk records of a job, ordered by chunk number.
    fn chunk_records(&self, job_id: &str) -> Result<BTreeMap<u32, ChunkRecord>, StoreError>;

    /// Returns `true` if chunk `chunk_number` was positively acknowledged.
    fn has_chunk_record(&self, job_id: &str, chunk_number: u32) -> Result<bool, StoreError> {
        Ok(self
            .chunk_records(job_id)?
            .get(&chunk_number)
            .is_some_and(|record| record.uploaded))
    }

    /// Chunk numbers positively acknowledged for a job.
    fn acknowledged_chunks(&self, job_id: &str) -> Result<BTreeSet<u32>, StoreError> {
        Ok(self
            .chunk_records(job_id)?
            .into_iter()
            .filter(|(_, record)| record.uploaded)
            .map(|(number, _)| number)
            .collect())
    }

    /// Removes every chunk record of a job.
    fn clear_chunk_records(&self, job_id: &str) -> Result<(), StoreError>;

    /// Stores the payload owned by a job.
    fn put_payload(&self, job_id: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Reads `range` of a job's payload.
    fn read_payload(&self, job_id: &str, range: Range<u64>) -> Result<Vec<u8>, StoreError>;

    /// Releases a job's payload. Missing payloads are not an error.
    fn delete_payload(&self, job_id: &str) -> Result<(), StoreError>;

    /// Deletes a job together with its chunk records and payload.
    fn delete_job(&self, id: &str) -> Result<(), StoreError>;
}
