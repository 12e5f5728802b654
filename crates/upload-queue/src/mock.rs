//! Scripted in-process transport for scheduler tests.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use voxlift_job_store::{ChunkRecord, JobStore, MemoryJobStore, StoreError, UploadJob};
use voxlift_protocol::{
    ChunkAck, CompleteRequest, CompleteResponse, CreateSessionRequest, TransferSession,
    UploadStatus,
};
use voxlift_transfer::Chunk;

use crate::error::UploadError;
use crate::transport::{ChunkTransport, TransportFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailMode {
    None,
    /// Every chunk call fails with a 503.
    ChunksUnavailable,
    /// Complete reports a payload checksum mismatch.
    ChecksumMismatch,
}

pub(crate) struct MockTransport {
    chunk_size: u64,
    chunk_delay: Duration,
    fail: Mutex<FailMode>,
    /// Chunk number whose next upload reports the session as gone.
    expire_at: Mutex<Option<u32>>,
    next_session: AtomicU32,
    /// Session id -> recording title.
    titles: Mutex<HashMap<String, String>>,
    /// Titles in session-creation order.
    pub(crate) sessions: Mutex<Vec<String>>,
    /// `(title, chunk number)` for every acknowledged chunk.
    pub(crate) chunks: Mutex<Vec<(String, u32)>>,
    pub(crate) completes: AtomicU32,
    store: Mutex<Option<Arc<dyn JobStore>>>,
    pub(crate) max_uploading: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new(chunk_size: u64) -> Self {
        Self::with_delay(chunk_size, Duration::ZERO)
    }

    pub(crate) fn with_delay(chunk_size: u64, chunk_delay: Duration) -> Self {
        Self {
            chunk_size,
            chunk_delay,
            fail: Mutex::new(FailMode::None),
            expire_at: Mutex::new(None),
            next_session: AtomicU32::new(1),
            titles: Mutex::new(HashMap::new()),
            sessions: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
            completes: AtomicU32::new(0),
            store: Mutex::new(None),
            max_uploading: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_fail(&self, mode: FailMode) {
        *self.fail.lock().unwrap() = mode;
    }

    /// The next upload of chunk `number` fails with `SessionExpired`, once.
    pub(crate) fn expire_session_at(&self, number: u32) {
        *self.expire_at.lock().unwrap() = Some(number);
    }

    /// Samples the store's `uploading` count on every chunk call.
    pub(crate) fn watch_store(&self, store: Arc<dyn JobStore>) {
        *self.store.lock().unwrap() = Some(store);
    }

    pub(crate) fn session_titles(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }

    pub(crate) fn chunk_numbers(&self) -> Vec<u32> {
        self.chunks.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }

    fn fail_mode(&self) -> FailMode {
        *self.fail.lock().unwrap()
    }

    fn sample_uploading(&self) {
        let store = self.store.lock().unwrap().clone();
        if let Some(store) = store {
            let uploading = store
                .list_by_status(UploadStatus::Uploading)
                .map(|jobs| jobs.len())
                .unwrap_or(0);
            self.max_uploading.fetch_max(uploading, Ordering::SeqCst);
        }
    }
}

impl ChunkTransport for MockTransport {
    fn create_session<'a>(
        &'a self,
        request: &'a CreateSessionRequest,
    ) -> TransportFuture<'a, TransferSession> {
        Box::pin(async move {
            let n = self.next_session.fetch_add(1, Ordering::SeqCst);
            let session_id = format!("s-{n}");
            self.titles
                .lock()
                .unwrap()
                .insert(session_id.clone(), request.metadata.title.clone());
            self.sessions
                .lock()
                .unwrap()
                .push(request.metadata.title.clone());
            Ok(TransferSession {
                upload_endpoint: format!("/{session_id}/chunks"),
                complete_endpoint: format!("/{session_id}/complete"),
                session_id,
                recommended_chunk_size_bytes: self.chunk_size,
                max_chunk_size_bytes: 0,
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        session: &'a TransferSession,
        chunk: &'a Chunk,
        _total_chunks: u32,
    ) -> TransportFuture<'a, ChunkAck> {
        Box::pin(async move {
            self.sample_uploading();
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            {
                let mut expire_at = self.expire_at.lock().unwrap();
                if *expire_at == Some(chunk.number) {
                    *expire_at = None;
                    return Err(UploadError::SessionExpired);
                }
            }
            if self.fail_mode() == FailMode::ChunksUnavailable {
                return Err(UploadError::Server {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            let title = self
                .titles
                .lock()
                .unwrap()
                .get(&session.session_id)
                .cloned()
                .unwrap_or_default();
            self.chunks.lock().unwrap().push((title, chunk.number));
            Ok(ChunkAck {
                chunk_number: chunk.number,
                received: true,
                checksum: Some(chunk.checksum.clone()),
            })
        })
    }

    fn complete<'a>(
        &'a self,
        session: &'a TransferSession,
        _request: &'a CompleteRequest,
    ) -> TransportFuture<'a, CompleteResponse> {
        Box::pin(async move {
            if self.fail_mode() == FailMode::ChecksumMismatch {
                return Err(UploadError::ChecksumMismatch("assembled digest differs".into()));
            }
            self.completes.fetch_add(1, Ordering::SeqCst);
            Ok(CompleteResponse {
                final_artifact_ref: format!("artifact://{}", session.session_id),
            })
        })
    }
}

/// In-memory store whose listing fails while `broken` is set.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryJobStore,
    pub(crate) broken: AtomicBool,
}

impl JobStore for FlakyStore {
    fn put(&self, job: &UploadJob) -> Result<(), StoreError> {
        self.inner.put(job)
    }

    fn get(&self, id: &str) -> Result<Option<UploadJob>, StoreError> {
        self.inner.get(id)
    }

    fn list(&self) -> Result<Vec<UploadJob>, StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.list()
    }

    fn put_chunk_record(
        &self,
        job_id: &str,
        chunk_number: u32,
        record: &ChunkRecord,
    ) -> Result<(), StoreError> {
        self.inner.put_chunk_record(job_id, chunk_number, record)
    }

    fn chunk_records(&self, job_id: &str) -> Result<BTreeMap<u32, ChunkRecord>, StoreError> {
        self.inner.chunk_records(job_id)
    }

    fn clear_chunk_records(&self, job_id: &str) -> Result<(), StoreError> {
        self.inner.clear_chunk_records(job_id)
    }

    fn put_payload(&self, job_id: &str, data: &[u8]) -> Result<(), StoreError> {
        self.inner.put_payload(job_id, data)
    }

    fn read_payload(&self, job_id: &str, range: Range<u64>) -> Result<Vec<u8>, StoreError> {
        self.inner.read_payload(job_id, range)
    }

    fn delete_payload(&self, job_id: &str) -> Result<(), StoreError> {
        self.inner.delete_payload(job_id)
    }

    fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_job(id)
    }
}
