//! Volatile job store, used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::{PoisonError, RwLock};

use crate::error::{StoreError, validate_id};
use crate::job::{ChunkRecord, UploadJob};
use crate::store::JobStore;

#[derive(Default)]
struct State {
    jobs: HashMap<String, UploadJob>,
    chunks: HashMap<String, BTreeMap<u32, ChunkRecord>>,
    payloads: HashMap<String, Vec<u8>>,
}

/// Job store that keeps everything in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, job: &UploadJob) -> Result<(), StoreError> {
        validate_id(&job.id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<UploadJob>, StoreError> {
        validate_id(id)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.jobs.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<UploadJob>, StoreError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.jobs.values().cloned().collect())
    }

    fn put_chunk_record(
        &self,
        job_id: &str,
        chunk_number: u32,
        record: &ChunkRecord,
    ) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .chunks
            .entry(job_id.to_string())
            .or_default()
            .insert(chunk_number, record.clone());
        Ok(())
    }

    fn chunk_records(&self, job_id: &str) -> Result<BTreeMap<u32, ChunkRecord>, StoreError> {
        validate_id(job_id)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.chunks.get(job_id).cloned().unwrap_or_default())
    }

    fn clear_chunk_records(&self, job_id: &str) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.chunks.remove(job_id);
        Ok(())
    }

    fn put_payload(&self, job_id: &str, data: &[u8]) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.payloads.insert(job_id.to_string(), data.to_vec());
        Ok(())
    }

    fn read_payload(&self, job_id: &str, range: Range<u64>) -> Result<Vec<u8>, StoreError> {
        validate_id(job_id)?;
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let payload = state
            .payloads
            .get(job_id)
            .ok_or_else(|| StoreError::PayloadMissing(job_id.to_string()))?;
        let len = payload.len() as u64;
        if range.start > range.end || range.end > len {
            return Err(StoreError::PayloadRange {
                job_id: job_id.to_string(),
                start: range.start,
                end: range.end,
                len,
            });
        }
        Ok(payload[range.start as usize..range.end as usize].to_vec())
    }

    fn delete_payload(&self, job_id: &str) -> Result<(), StoreError> {
        validate_id(job_id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.payloads.remove(job_id);
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.jobs.remove(id);
        state.chunks.remove(id);
        state.payloads.remove(id);
        Ok(())
    }
}
