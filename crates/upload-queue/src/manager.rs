//! The process-wide upload queue and its shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxlift_job_store::{ChunkRecord, JobConfig, JobStore, PauseReason, StoreError, UploadJob};
use voxlift_protocol::{
    Priority, RecordingMetadata, TransferSession, UploadProgress, UploadStatus,
};
use voxlift_transfer::{checksum_bytes, validate_metadata};

use crate::compress::Compressor;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{EventBus, EventTopic, QueueEvent, Subscription};
use crate::metrics::MetricsSnapshot;
use crate::network::NetworkMonitor;
use crate::retry::RetryPolicy;
use crate::scheduler;
use crate::transport::ChunkTransport;

// ---------------------------------------------------------------------------
// Public request types
// ---------------------------------------------------------------------------

/// Caller-supplied descriptive fields; size and creation time are derived.
#[derive(Debug, Clone, Default)]
pub struct RecordingInfo {
    pub subject: String,
    pub title: String,
    pub author: String,
    pub duration_secs: f64,
}

/// Per-job options fixed at enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Overrides `retry.maxRetries`.
    pub max_retries: Option<u32>,
    /// Overrides `defaultChunkSizeBytes` when the session recommends none.
    pub chunk_size_bytes: Option<u64>,
    pub compression_enabled: bool,
    pub validation_enabled: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            max_retries: None,
            chunk_size_bytes: None,
            compression_enabled: false,
            validation_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Signals from the API to a running attempt.
#[derive(Clone)]
pub(crate) struct JobControl {
    pub(crate) cancel: CancellationToken,
    pub(crate) pause: Arc<AtomicBool>,
}

/// State shared by the facade, the scheduler task and the network watcher.
pub(crate) struct Inner {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) transport: Arc<dyn ChunkTransport>,
    compressor: RwLock<Option<Arc<dyn Compressor>>>,
    pub(crate) network: NetworkMonitor,
    pub(crate) events: EventBus,
    pub(crate) retry: RetryPolicy,
    /// Attempts currently running, keyed by job id.
    controls: Mutex<HashMap<String, JobControl>>,
    /// Backoff deadlines of re-queued jobs. In memory only: after a restart
    /// re-queued jobs are immediately eligible.
    backoff: Mutex<HashMap<String, Instant>>,
    pub(crate) wake: Notify,
    pub(crate) shutdown: CancellationToken,
    /// Serializes read-modify-write sequences on job records.
    write_lock: Mutex<()>,
    /// Jobs holding a concurrency slot. Written only by the scheduler.
    pub(crate) active: AtomicUsize,
}

impl Inner {
    pub(crate) fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the stored job and writes it back if `f` returns `Some`.
    pub(crate) fn update_job<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut UploadJob) -> Option<T>,
    ) -> Result<Option<(UploadJob, T)>, StoreError> {
        let _guard = self.write_guard();
        let Some(mut job) = self.store.get(id)? else {
            return Ok(None);
        };
        let Some(value) = f(&mut job) else {
            return Ok(None);
        };
        self.store.put(&job)?;
        Ok(Some((job, value)))
    }

    /// Attaches a fresh session. Chunk records survive unless the session
    /// cuts the payload at a different chunk size than they were cut with.
    pub(crate) fn install_session(
        &self,
        id: &str,
        session: &TransferSession,
        total_chunks: u32,
        chunk_size: u64,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_guard();
        let Some(mut job) = self.store.get(id)? else {
            return Ok(false);
        };
        if job.status != UploadStatus::Uploading {
            return Ok(false);
        }
        if let Some(previous) = job.acknowledged_chunk_size
            && previous != chunk_size
        {
            debug!(
                job = %id,
                previous,
                chunk_size,
                "chunk size changed, dropping acknowledged chunks"
            );
            self.store.clear_chunk_records(id)?;
            job.reset_progress();
        }
        job.session = Some(session.clone());
        job.acknowledged_chunk_size = Some(chunk_size);
        job.progress.total_chunks = total_chunks;
        job.progress.total_bytes = job.metadata.size_bytes;
        let (chunks, bytes) = (job.progress.chunks_uploaded, job.progress.bytes_uploaded);
        job.progress.set_acknowledged(chunks, bytes);
        job.last_activity_at = Some(Utc::now());
        self.store.put(&job)?;
        Ok(true)
    }

    /// Aligns stored progress with the acknowledged chunks of the current plan.
    pub(crate) fn sync_progress(
        &self,
        id: &str,
        total_chunks: u32,
        chunks: u32,
        bytes: u64,
    ) -> Result<bool, StoreError> {
        let updated = self.update_job(id, |job| {
            if job.status != UploadStatus::Uploading {
                return None;
            }
            job.progress.total_chunks = total_chunks;
            job.progress.total_bytes = job.metadata.size_bytes;
            job.progress.set_acknowledged(chunks, bytes);
            Some(())
        })?;
        Ok(updated.is_some())
    }

    /// Persists an acknowledged chunk, then the job's progress. Returns
    /// `None` (and persists nothing) once the job has left `uploading`.
    pub(crate) fn commit_chunk(
        &self,
        id: &str,
        number: u32,
        record: &ChunkRecord,
        chunks: u32,
        bytes: u64,
    ) -> Result<Option<UploadProgress>, StoreError> {
        let _guard = self.write_guard();
        let Some(mut job) = self.store.get(id)? else {
            return Ok(None);
        };
        if job.status != UploadStatus::Uploading {
            return Ok(None);
        }
        self.store.put_chunk_record(id, number, record)?;
        job.progress.set_acknowledged(chunks, bytes);
        job.last_activity_at = Some(Utc::now());
        self.store.put(&job)?;
        Ok(Some(job.progress))
    }

    pub(crate) fn register_control(&self, id: &str) -> JobControl {
        let control = JobControl {
            cancel: CancellationToken::new(),
            pause: Arc::new(AtomicBool::new(false)),
        };
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), control.clone());
        control
    }

    pub(crate) fn control(&self, id: &str) -> Option<JobControl> {
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub(crate) fn remove_control(&self, id: &str) {
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    pub(crate) fn set_backoff(&self, id: &str, until: Instant) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), until);
    }

    pub(crate) fn clear_backoff(&self, id: &str) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Splits pending jobs into those eligible now, in scheduling order, and
    /// the earliest backoff deadline among the rest.
    pub(crate) fn eligible(
        &self,
        mut pending: Vec<UploadJob>,
        now: Instant,
    ) -> (Vec<UploadJob>, Option<Instant>) {
        let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
        backoff.retain(|_, until| *until > now);
        let mut next: Option<Instant> = None;
        pending.retain(|job| match backoff.get(&job.id) {
            Some(&until) => {
                next = Some(next.map_or(until, |n| n.min(until)));
                false
            }
            None => true,
        });
        pending.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        (pending, next)
    }

    /// Moves every `uploading` job back to `pending` without touching its
    /// retry counter. Run before the scheduler starts.
    pub(crate) fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let mut recovered = 0;
        for job in self.store.list_by_status(UploadStatus::Uploading)? {
            let now = Utc::now();
            let demoted = self.update_job(&job.id, |job| {
                job.transition(UploadStatus::Pending, now).ok()
            })?;
            if demoted.is_some() {
                info!(job = %job.id, retry_count = job.retry_count, "recovered interrupted upload");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Returns connectivity-paused jobs to `pending`. User pauses are left alone.
    pub(crate) fn resume_offline_paused(&self) -> Result<usize, StoreError> {
        let mut resumed = 0;
        for job in self.store.list_by_status(UploadStatus::Paused)? {
            if job.pause_reason != Some(PauseReason::Offline) {
                continue;
            }
            let now = Utc::now();
            let updated = self.update_job(&job.id, |job| {
                if job.status != UploadStatus::Paused
                    || job.pause_reason != Some(PauseReason::Offline)
                {
                    return None;
                }
                job.transition(UploadStatus::Pending, now).ok()
            })?;
            if updated.is_some() {
                debug!(job = %job.id, "connectivity restored, resuming");
                self.events.publish(QueueEvent::Resumed {
                    job_id: job.id.clone(),
                });
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Deletes completed jobs older than the retention window.
    pub(crate) fn sweep_retention(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - self.config.retention();
        let mut removed = 0;
        for job in self.store.list_by_status(UploadStatus::Completed)? {
            if job.completed_at.is_some_and(|at| at < cutoff) {
                self.store.delete_job(&job.id)?;
                debug!(job = %job.id, "retention expired, job deleted");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "retention sweep deleted completed jobs");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// UploadQueue
// ---------------------------------------------------------------------------

/// The upload queue.
///
/// Construct once per process, call [`init`](Self::init) to start the
/// scheduler, and [`shutdown`](Self::shutdown) before exit. Management calls
/// (`enqueue`, `pause`, `cancel`, ...) work before `init` as well; they only
/// touch the store.
pub struct UploadQueue {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl UploadQueue {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        transport: Arc<dyn ChunkTransport>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                transport,
                compressor: RwLock::new(None),
                network: NetworkMonitor::default(),
                events,
                retry,
                controls: Mutex::new(HashMap::new()),
                backoff: Mutex::new(HashMap::new()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                write_lock: Mutex::new(()),
                active: AtomicUsize::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Installs the compressor used for jobs enqueued with compression on.
    pub fn set_compressor(&self, compressor: Arc<dyn Compressor>) {
        *self
            .inner
            .compressor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(compressor);
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    /// Feeds a connectivity change into the queue.
    pub fn set_online(&self, online: bool) {
        self.inner.network.set_online(online);
    }

    /// Recovers interrupted jobs, sweeps retention, and starts the scheduler,
    /// network watcher and retention sweeper. Must be called from within a
    /// tokio runtime. A failed init may be retried.
    pub fn init(&self) -> Result<(), QueueError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyRunning);
        }
        let (recovered, swept) = match self.prepare() {
            Ok(counts) => counts,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!(
            recovered,
            swept,
            max_concurrent = self.inner.config.max_concurrent,
            "upload queue started"
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(tokio::spawn(scheduler::run(Arc::clone(&self.inner))));
        tasks.push(tokio::spawn(scheduler::watch_network(Arc::clone(&self.inner))));
        tasks.push(tokio::spawn(scheduler::sweep_periodically(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Stops the scheduler. In-flight attempts are abandoned and their jobs
    /// return to `pending` without consuming retry budget.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("queue task ended abnormally: {e}");
            }
        }
        info!("upload queue stopped");
    }

    /// Takes custody of `payload` and queues it. Returns the new job id.
    pub fn enqueue(
        &self,
        payload: Vec<u8>,
        info: RecordingInfo,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let inner = &self.inner;
        let original_len = payload.len();
        let (payload, compressed) = if options.compression_enabled {
            self.compress(payload)
        } else {
            (payload, false)
        };

        let metadata = RecordingMetadata {
            subject: info.subject,
            title: info.title,
            author: info.author,
            duration_secs: info.duration_secs,
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
        };
        validate_metadata(&metadata)?;
        let chunk_size = options
            .chunk_size_bytes
            .unwrap_or(inner.config.default_chunk_size_bytes);
        if chunk_size == 0 {
            return Err(QueueError::Validation("chunk size must be positive".into()));
        }

        let job = UploadJob::new(
            metadata,
            options.priority,
            options.max_retries.unwrap_or(inner.config.retry.max_retries),
            JobConfig {
                chunk_size_bytes: chunk_size,
                compression_enabled: compressed,
                validation_enabled: options.validation_enabled,
            },
            checksum_bytes(&payload),
        );
        inner.store.put_payload(&job.id, &payload)?;
        inner.store.put(&job)?;

        info!(
            job = %job.id,
            title = %job.metadata.title,
            priority = ?job.priority,
            bytes = job.metadata.size_bytes,
            original_bytes = original_len,
            "upload queued"
        );
        inner.events.publish(QueueEvent::Queued {
            job_id: job.id.clone(),
            priority: job.priority,
        });
        inner.wake.notify_one();
        Ok(job.id)
    }

    /// Compresses `payload`, falling back to the original bytes on failure.
    fn compress(&self, payload: Vec<u8>) -> (Vec<u8>, bool) {
        let compressor = self
            .inner
            .compressor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(compressor) = compressor else {
            warn!("compression requested but no compressor installed, keeping original payload");
            return (payload, false);
        };
        match compressor.compress(&payload) {
            Ok(packed) => {
                debug!(original = payload.len(), compressed = packed.len(), "payload compressed");
                (packed, true)
            }
            Err(e) => {
                warn!(error = %e, "compression failed, keeping original payload");
                (payload, false)
            }
        }
    }

    /// Pauses a job. Pending jobs pause immediately; uploading jobs pause at
    /// the next chunk boundary.
    pub fn pause(&self, id: &str) -> Result<UploadJob, QueueError> {
        let inner = &self.inner;
        let guard = inner.write_guard();
        let mut job = self.load(id)?;
        match job.status {
            UploadStatus::Pending => {
                job.transition(UploadStatus::Paused, Utc::now())?;
                job.pause_reason = Some(PauseReason::User);
                inner.store.put(&job)?;
                drop(guard);
                inner.clear_backoff(id);
                info!(job = %id, "upload paused");
                inner.events.publish(QueueEvent::Paused {
                    job_id: id.to_string(),
                    reason: PauseReason::User,
                });
            }
            UploadStatus::Uploading => {
                if let Some(control) = inner.control(id) {
                    control.pause.store(true, Ordering::SeqCst);
                }
                debug!(job = %id, "pause requested, takes effect at next chunk boundary");
            }
            UploadStatus::Paused => {
                // An explicit pause outlives the connectivity that caused it.
                if job.pause_reason != Some(PauseReason::User) {
                    job.pause_reason = Some(PauseReason::User);
                    inner.store.put(&job)?;
                }
            }
            status => {
                return Err(QueueError::InvalidState {
                    id: id.to_string(),
                    status,
                    action: "pause",
                });
            }
        }
        Ok(job)
    }

    /// Resumes a paused job. Resuming a job that is not paused is a no-op.
    pub fn resume(&self, id: &str) -> Result<UploadJob, QueueError> {
        let inner = &self.inner;
        let guard = inner.write_guard();
        let mut job = self.load(id)?;
        match job.status {
            UploadStatus::Paused => {
                job.transition(UploadStatus::Pending, Utc::now())?;
                inner.store.put(&job)?;
                drop(guard);
                info!(job = %id, "upload resumed");
                inner.events.publish(QueueEvent::Resumed {
                    job_id: id.to_string(),
                });
                inner.wake.notify_one();
            }
            UploadStatus::Uploading => {
                if let Some(control) = inner.control(id) {
                    control.pause.store(false, Ordering::SeqCst);
                }
            }
            UploadStatus::Pending => {}
            status => {
                return Err(QueueError::InvalidState {
                    id: id.to_string(),
                    status,
                    action: "resume",
                });
            }
        }
        Ok(job)
    }

    /// Cancels a non-terminal job. In-flight calls are abandoned and the
    /// job's chunk records are discarded.
    pub fn cancel(&self, id: &str) -> Result<UploadJob, QueueError> {
        let inner = &self.inner;
        let guard = inner.write_guard();
        let mut job = self.load(id)?;
        if job.status.is_terminal() {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status,
                action: "cancel",
            });
        }
        job.transition(UploadStatus::Cancelled, Utc::now())?;
        job.discard_session();
        job.reset_progress();
        inner.store.put(&job)?;
        inner.store.clear_chunk_records(id)?;
        drop(guard);

        inner.clear_backoff(id);
        if let Some(control) = inner.control(id) {
            control.cancel.cancel();
        }
        info!(job = %id, "upload cancelled");
        inner.events.publish(QueueEvent::Cancelled {
            job_id: id.to_string(),
        });
        inner.wake.notify_one();
        Ok(job)
    }

    /// Re-queues a failed job with a fresh retry budget.
    pub fn retry(&self, id: &str) -> Result<UploadJob, QueueError> {
        let inner = &self.inner;
        let guard = inner.write_guard();
        let mut job = self.load(id)?;
        if job.status != UploadStatus::Failed {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status,
                action: "retry",
            });
        }
        job.transition(UploadStatus::Pending, Utc::now())?;
        job.retry_count = 0;
        job.last_error = None;
        inner.store.put(&job)?;
        drop(guard);

        inner.clear_backoff(id);
        info!(job = %id, "failed upload re-queued");
        inner.events.publish(QueueEvent::Queued {
            job_id: id.to_string(),
            priority: job.priority,
        });
        inner.wake.notify_one();
        Ok(job)
    }

    /// Deletes a cancelled job together with its chunk records and payload.
    pub fn acknowledge_cancellation(&self, id: &str) -> Result<(), QueueError> {
        let inner = &self.inner;
        let _guard = inner.write_guard();
        let job = self.load(id)?;
        if job.status != UploadStatus::Cancelled {
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                status: job.status,
                action: "acknowledge cancellation of",
            });
        }
        inner.store.delete_job(id)?;
        debug!(job = %id, "cancelled job deleted");
        Ok(())
    }

    pub fn get_status(&self, id: &str) -> Result<UploadJob, QueueError> {
        self.load(id)
    }

    /// Lists jobs in scheduling order (priority, then age), optionally
    /// filtered by status and truncated to `limit`.
    pub fn list(
        &self,
        status: Option<UploadStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<UploadJob>, QueueError> {
        let mut jobs = match status {
            Some(status) => self.inner.store.list_by_status(status)?,
            None => self.inner.store.list()?,
        };
        jobs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    pub fn get_metrics(&self) -> Result<MetricsSnapshot, QueueError> {
        let jobs = self.inner.store.list()?;
        Ok(MetricsSnapshot::from_jobs(&jobs))
    }

    /// Subscribes to `topics` (all topics if empty).
    pub fn subscribe(&self, topics: &[EventTopic]) -> Subscription {
        self.inner.events.subscribe(topics)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Deletes completed jobs older than `retentionDays`. Returns the count.
    pub fn sweep_retention(&self) -> Result<usize, QueueError> {
        Ok(self.inner.sweep_retention()?)
    }

    /// Startup store pass: `(recovered, swept)`.
    fn prepare(&self) -> Result<(usize, usize), QueueError> {
        let recovered = self.inner.recover_interrupted()?;
        let swept = self.inner.sweep_retention()?;
        if self.inner.network.is_online() {
            self.inner.resume_offline_paused()?;
        }
        Ok((recovered, swept))
    }

    fn load(&self, id: &str) -> Result<UploadJob, QueueError> {
        self.inner
            .store
            .get(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use voxlift_job_store::{FileJobStore, MemoryJobStore};

    use crate::compress::GzipCompressor;
    use crate::mock::{FailMode, FlakyStore, MockTransport};

    fn fast_config() -> QueueConfig {
        let mut config = QueueConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 40;
        config.chunk_timeout_ms = 2_000;
        config
    }

    fn info(title: &str) -> RecordingInfo {
        RecordingInfo {
            subject: "Physics".into(),
            title: title.into(),
            author: "Dr. Who".into(),
            duration_secs: 60.0,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn priority(priority: Priority) -> EnqueueOptions {
        EnqueueOptions {
            priority,
            ..EnqueueOptions::default()
        }
    }

    fn setup(
        config: QueueConfig,
        transport: MockTransport,
    ) -> (UploadQueue, Arc<MemoryJobStore>, Arc<MockTransport>) {
        let store = Arc::new(MemoryJobStore::new());
        let transport = Arc::new(transport);
        let queue = UploadQueue::new(config, store.clone(), transport.clone());
        (queue, store, transport)
    }

    /// Receives events until one matches, returning everything seen.
    async fn collect_until(
        sub: &mut Subscription,
        done: impl Fn(&QueueEvent) -> bool,
    ) -> Vec<QueueEvent> {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            loop {
                let event = sub.receiver.recv().await.expect("event bus closed");
                let stop = done(&event);
                seen.push(event);
                if stop {
                    return seen;
                }
            }
        })
        .await
        .expect("timed out waiting for queue event")
    }

    async fn wait_for(sub: &mut Subscription, done: impl Fn(&QueueEvent) -> bool) -> QueueEvent {
        let mut seen = collect_until(sub, done).await;
        seen.pop().unwrap()
    }

    fn is_completed(id: &str) -> impl Fn(&QueueEvent) -> bool + '_ {
        move |e| matches!(e, QueueEvent::Completed { job_id, .. } if job_id == id)
    }

    fn is_failed(id: &str) -> impl Fn(&QueueEvent) -> bool + '_ {
        move |e| matches!(e, QueueEvent::Failed { job_id, .. } if job_id == id)
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_metadata() {
        let (queue, store, _) = setup(fast_config(), MockTransport::new(100));
        let err = queue
            .enqueue(payload(10), info("  "), EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));

        let err = queue
            .enqueue(Vec::new(), info("Empty"), EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn enqueue_takes_custody_of_payload() {
        let (queue, store, _) = setup(fast_config(), MockTransport::new(100));
        let data = payload(1000);
        let id = queue
            .enqueue(data.clone(), info("Lecture"), EnqueueOptions::default())
            .unwrap();

        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Pending);
        assert_eq!(job.metadata.size_bytes, 1000);
        assert_eq!(job.checksum, checksum_bytes(&data));
        assert_eq!(job.max_retries, 3);
        assert_eq!(store.read_payload(&id, 0..1000).unwrap(), data);
    }

    #[tokio::test]
    async fn compression_applies_or_falls_back() {
        let (queue, _, _) = setup(fast_config(), MockTransport::new(100));
        let options = EnqueueOptions {
            compression_enabled: true,
            ..EnqueueOptions::default()
        };

        let id = queue
            .enqueue(vec![0u8; 4096], info("Raw"), options.clone())
            .unwrap();
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.metadata.size_bytes, 4096);
        assert!(!job.config.compression_enabled);

        queue.set_compressor(Arc::new(GzipCompressor::default()));
        let id = queue
            .enqueue(vec![0u8; 4096], info("Packed"), options)
            .unwrap();
        let job = queue.get_status(&id).unwrap();
        assert!(job.metadata.size_bytes < 4096);
        assert!(job.config.compression_enabled);
    }

    #[tokio::test]
    async fn uploads_every_chunk_then_completes() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        let mut sub = queue.subscribe(&[]);
        let id = queue
            .enqueue(payload(1000), info("Lecture"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        let events = collect_until(&mut sub, is_completed(&id)).await;
        let progress = events
            .iter()
            .filter(|e| e.topic() == EventTopic::Progress)
            .count();
        assert_eq!(progress, 10);

        assert_eq!(transport.chunk_numbers(), (1..=10).collect::<Vec<_>>());
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Completed);
        assert_eq!(job.artifact_ref.as_deref(), Some("artifact://s-1"));
        assert_eq!(job.progress.chunks_uploaded, 10);
        assert_eq!(job.progress.bytes_uploaded, 1000);
        assert!(job.completed_at.is_some());
        assert!(matches!(
            store.read_payload(&id, 0..1),
            Err(StoreError::PayloadMissing(_))
        ));

        let metrics = queue.get_metrics().unwrap();
        assert_eq!(metrics.completed_jobs, 1);
        assert_eq!(metrics.bytes_transferred, 1000);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);

        wait_for(&mut sub, |e| *e == QueueEvent::QueueEmpty).await;
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn starts_jobs_in_priority_order() {
        let mut config = fast_config();
        config.max_concurrent = 1;
        let (queue, _, transport) = setup(config, MockTransport::new(100));
        let mut sub = queue.subscribe(&[EventTopic::Completed]);

        queue
            .enqueue(payload(200), info("A"), priority(Priority::Normal))
            .unwrap();
        queue
            .enqueue(payload(200), info("B"), priority(Priority::Urgent))
            .unwrap();
        queue
            .enqueue(payload(200), info("C"), priority(Priority::High))
            .unwrap();
        queue.init().unwrap();

        for _ in 0..3 {
            wait_for(&mut sub, |e| e.topic() == EventTopic::Completed).await;
        }
        assert_eq!(transport.session_titles(), vec!["B", "C", "A"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_ceiling() {
        let (queue, store, transport) = setup(
            fast_config(),
            MockTransport::with_delay(100, Duration::from_millis(5)),
        );
        transport.watch_store(store.clone());
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        for i in 0..5 {
            queue
                .enqueue(payload(300), info(&format!("job {i}")), EnqueueOptions::default())
                .unwrap();
        }
        queue.init().unwrap();

        for _ in 0..5 {
            wait_for(&mut sub, |e| e.topic() == EventTopic::Completed).await;
        }
        let peak = transport
            .max_uploading
            .load(std::sync::atomic::Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak uploading = {peak}");
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn retryable_failures_exhaust_budget() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        transport.set_fail(FailMode::ChunksUnavailable);
        let id = queue
            .enqueue(payload(300), info("Flaky"), EnqueueOptions::default())
            .unwrap();
        let topics = [EventTopic::Queued, EventTopic::Started, EventTopic::Failed];
        let mut sub = queue.subscribe(&topics);
        queue.init().unwrap();

        let events = collect_until(&mut sub, is_failed(&id)).await;
        let started = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::Started { .. }))
            .count();
        let requeued: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Requeued { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(started, 4);
        assert_eq!(requeued, vec![1, 2, 3]);

        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert!(job.last_error.as_deref().is_some_and(|e| e.contains("503")));
        // Payload stays for an explicit retry.
        assert!(store.read_payload(&id, 0..10).is_ok());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_immediately_then_retries_fresh() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        transport.set_fail(FailMode::ChecksumMismatch);
        let mut sub = queue.subscribe(&[EventTopic::Failed, EventTopic::Completed]);
        let id = queue
            .enqueue(payload(500), info("Corrupt"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        wait_for(&mut sub, is_failed(&id)).await;
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert!(job.session.is_none());
        assert!(job.acknowledged_chunk_size.is_none());
        assert_eq!(job.progress.chunks_uploaded, 0);
        assert!(store.chunk_records(&id).unwrap().is_empty());

        transport.set_fail(FailMode::None);
        let retried = queue.retry(&id).unwrap();
        assert_eq!(retried.retry_count, 0);
        assert!(retried.last_error.is_none());

        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.session_titles().len(), 2);
        assert_eq!(transport.chunk_numbers().len(), 10);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn recovery_demotes_without_touching_retry_count() {
        let (queue, store, _) = setup(fast_config(), MockTransport::new(100));
        let id = queue
            .enqueue(payload(300), info("Crashed"), EnqueueOptions::default())
            .unwrap();
        let mut job = store.get(&id).unwrap().unwrap();
        job.status = UploadStatus::Uploading;
        job.retry_count = 2;
        store.put(&job).unwrap();
        store
            .put_chunk_record(&id, 1, &ChunkRecord::acknowledged("x"))
            .unwrap();

        assert_eq!(queue.inner.recover_interrupted().unwrap(), 1);
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Pending);
        assert_eq!(job.retry_count, 2);
        assert!(store.has_chunk_record(&id, 1).unwrap());
    }

    /// Stores an `uploading` job for `data` in 100-byte chunks whose first
    /// `acked` chunks were acknowledged to session "s-old".
    fn interrupted_job(
        store: &MemoryJobStore,
        data: &[u8],
        title: &str,
        expires_at: chrono::DateTime<Utc>,
        acked: u32,
    ) -> UploadJob {
        let metadata = RecordingMetadata {
            subject: "Physics".into(),
            title: title.into(),
            author: String::new(),
            duration_secs: 60.0,
            size_bytes: data.len() as u64,
            created_at: Utc::now(),
        };
        let mut job = UploadJob::new(
            metadata,
            Priority::Normal,
            3,
            JobConfig {
                chunk_size_bytes: 100,
                compression_enabled: false,
                validation_enabled: true,
            },
            checksum_bytes(data),
        );
        job.status = UploadStatus::Uploading;
        job.retry_count = 1;
        job.session = Some(TransferSession {
            session_id: "s-old".into(),
            upload_endpoint: "/s-old/chunks".into(),
            complete_endpoint: "/s-old/complete".into(),
            recommended_chunk_size_bytes: 100,
            max_chunk_size_bytes: 0,
            expires_at,
        });
        job.acknowledged_chunk_size = Some(100);
        let total_chunks = data.len().div_ceil(100) as u32;
        job.progress.reset(total_chunks, data.len() as u64);
        job.progress.set_acknowledged(acked, u64::from(acked) * 100);
        store.put_payload(&job.id, data).unwrap();
        store.put(&job).unwrap();
        for n in 1..=acked {
            let start = (n as usize - 1) * 100;
            let record = ChunkRecord::acknowledged(checksum_bytes(&data[start..start + 100]));
            store.put_chunk_record(&job.id, n, &record).unwrap();
        }
        job
    }

    #[tokio::test]
    async fn resumes_from_last_acknowledged_chunk() {
        let store = Arc::new(MemoryJobStore::new());
        let data = payload(1000);
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        let job = interrupted_job(&store, &data, "Interrupted", expires_at, 3);

        let transport = Arc::new(MockTransport::new(100));
        let queue = UploadQueue::new(fast_config(), store.clone(), transport.clone());
        let mut sub = queue.subscribe(&[EventTopic::Started, EventTopic::Completed]);
        queue.init().unwrap();

        let started = wait_for(&mut sub, |e| e.topic() == EventTopic::Started).await;
        assert!(matches!(started, QueueEvent::Started { retry_count: 1, .. }));
        wait_for(&mut sub, is_completed(&job.id)).await;

        assert_eq!(transport.chunk_numbers(), (4..=10).collect::<Vec<_>>());
        assert!(transport.session_titles().is_empty(), "live session reused");
        let done = queue.get_status(&job.id).unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
        assert_eq!(done.retry_count, 1);
        assert_eq!(done.artifact_ref.as_deref(), Some("artifact://s-old"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn expired_session_resumes_after_acknowledged_chunks() {
        let store = Arc::new(MemoryJobStore::new());
        let data = payload(1000);
        let expires_at = Utc::now() - chrono::Duration::minutes(1);
        let job = interrupted_job(&store, &data, "Overnight", expires_at, 3);

        let transport = Arc::new(MockTransport::new(100));
        let queue = UploadQueue::new(fast_config(), store.clone(), transport.clone());
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        queue.init().unwrap();

        wait_for(&mut sub, is_completed(&job.id)).await;
        assert_eq!(transport.session_titles(), vec!["Overnight"]);
        assert_eq!(transport.chunk_numbers(), (4..=10).collect::<Vec<_>>());
        let done = queue.get_status(&job.id).unwrap();
        assert_eq!(done.artifact_ref.as_deref(), Some("artifact://s-1"));
        assert_eq!(done.progress.chunks_uploaded, 10);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn expired_session_resumes_from_chunk_two() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        let data = payload(300);
        let id = queue
            .enqueue(data.clone(), info("Stale"), EnqueueOptions::default())
            .unwrap();
        let mut job = store.get(&id).unwrap().unwrap();
        job.session = Some(TransferSession {
            session_id: "s-expired".into(),
            upload_endpoint: "/x".into(),
            complete_endpoint: "/y".into(),
            recommended_chunk_size_bytes: 100,
            max_chunk_size_bytes: 0,
            expires_at: Utc::now() - chrono::Duration::minutes(1),
        });
        job.acknowledged_chunk_size = Some(100);
        store.put(&job).unwrap();
        store
            .put_chunk_record(&id, 1, &ChunkRecord::acknowledged(checksum_bytes(&data[..100])))
            .unwrap();
        queue.init().unwrap();

        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.session_titles(), vec!["Stale"]);
        assert_eq!(transport.chunk_numbers(), vec![2, 3]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn session_lost_mid_upload_keeps_acknowledged_chunks() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        transport.expire_session_at(4);
        let topics = [EventTopic::Queued, EventTopic::Completed];
        let mut sub = queue.subscribe(&topics);
        let id = queue
            .enqueue(payload(1000), info("Gone"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        let events = collect_until(&mut sub, is_completed(&id)).await;
        assert!(matches!(events[0], QueueEvent::Requeued { attempt: 1, .. }));
        // Chunks 1-3 went to the first session and were not sent again.
        assert_eq!(transport.chunk_numbers(), (1..=10).collect::<Vec<_>>());
        assert_eq!(transport.session_titles(), vec!["Gone", "Gone"]);
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.artifact_ref.as_deref(), Some("artifact://s-2"));
        assert_eq!(store.chunk_records(&id).unwrap().len(), 10);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn chunk_size_change_discards_acknowledged_chunks() {
        let (queue, store, transport) = setup(fast_config(), MockTransport::new(100));
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        let data = payload(300);
        let id = queue
            .enqueue(data.clone(), info("Resized"), EnqueueOptions::default())
            .unwrap();
        let mut job = store.get(&id).unwrap().unwrap();
        job.acknowledged_chunk_size = Some(50);
        job.progress.reset(6, 300);
        job.progress.set_acknowledged(2, 100);
        store.put(&job).unwrap();
        for n in 1..=2u32 {
            let start = (n as usize - 1) * 50;
            let record = ChunkRecord::acknowledged(checksum_bytes(&data[start..start + 50]));
            store.put_chunk_record(&id, n, &record).unwrap();
        }
        queue.init().unwrap();

        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.chunk_numbers(), vec![1, 2, 3]);
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.acknowledged_chunk_size, Some(100));
        assert_eq!(job.progress.total_chunks, 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn pause_pending_and_resume_is_idempotent() {
        let (queue, _, _) = setup(fast_config(), MockTransport::new(100));
        let mut sub = queue.subscribe(&[EventTopic::Paused, EventTopic::Resumed]);
        let id = queue
            .enqueue(payload(100), info("Idle"), EnqueueOptions::default())
            .unwrap();

        let paused = queue.pause(&id).unwrap();
        assert_eq!(paused.status, UploadStatus::Paused);
        assert_eq!(paused.pause_reason, Some(PauseReason::User));

        assert_eq!(queue.resume(&id).unwrap().status, UploadStatus::Pending);
        assert_eq!(queue.resume(&id).unwrap().status, UploadStatus::Pending);

        assert!(matches!(
            sub.receiver.try_recv().unwrap(),
            QueueEvent::Paused { reason: PauseReason::User, .. }
        ));
        assert!(matches!(
            sub.receiver.try_recv().unwrap(),
            QueueEvent::Resumed { .. }
        ));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelling_paused_job_discards_progress() {
        let (queue, store, _) = setup(fast_config(), MockTransport::new(100));
        let id = queue
            .enqueue(payload(300), info("Abandoned"), EnqueueOptions::default())
            .unwrap();
        store
            .put_chunk_record(&id, 1, &ChunkRecord::acknowledged("x"))
            .unwrap();
        queue.pause(&id).unwrap();

        let cancelled = queue.cancel(&id).unwrap();
        assert_eq!(cancelled.status, UploadStatus::Cancelled);
        assert!(cancelled.session.is_none());
        assert!(store.chunk_records(&id).unwrap().is_empty());

        assert!(matches!(
            queue.cancel(&id),
            Err(QueueError::InvalidState { action: "cancel", .. })
        ));
        assert!(matches!(
            queue.retry(&id),
            Err(QueueError::InvalidState { .. })
        ));

        queue.acknowledge_cancellation(&id).unwrap();
        assert!(matches!(queue.get_status(&id), Err(QueueError::NotFound(_))));
        assert!(store.read_payload(&id, 0..1).is_err());
    }

    #[tokio::test]
    async fn cancelling_uploading_job_abandons_attempt() {
        let mut config = fast_config();
        config.max_concurrent = 1;
        let (queue, store, _) = setup(
            config,
            MockTransport::with_delay(100, Duration::from_millis(20)),
        );
        let mut sub = queue.subscribe(&[]);
        let long = queue
            .enqueue(payload(1000), info("Long"), priority(Priority::Urgent))
            .unwrap();
        let next = queue
            .enqueue(payload(200), info("Next"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        wait_for(&mut sub, |e| {
            matches!(e, QueueEvent::Progress { job_id, .. } if *job_id == long)
        })
        .await;
        let cancelled = queue.cancel(&long).unwrap();
        assert_eq!(cancelled.progress.chunks_uploaded, 0);

        let events = collect_until(&mut sub, is_completed(&next)).await;
        assert!(!events.iter().any(|e| is_completed(&long)(e)));
        assert!(events.iter().any(|e| {
            matches!(e, QueueEvent::Cancelled { job_id } if *job_id == long)
        }));

        let job = queue.get_status(&long).unwrap();
        assert_eq!(job.status, UploadStatus::Cancelled);
        assert!(job.session.is_none());
        assert!(store.chunk_records(&long).unwrap().is_empty());
        assert_eq!(
            queue.get_status(&next).unwrap().status,
            UploadStatus::Completed
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn pause_takes_effect_at_chunk_boundary() {
        let (queue, _, transport) = setup(
            fast_config(),
            MockTransport::with_delay(100, Duration::from_millis(20)),
        );
        let mut sub = queue.subscribe(&[]);
        let id = queue
            .enqueue(payload(1000), info("Long"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        wait_for(&mut sub, |e| e.topic() == EventTopic::Progress).await;
        queue.pause(&id).unwrap();
        wait_for(&mut sub, |e| e.topic() == EventTopic::Paused).await;

        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Paused);
        assert_eq!(job.pause_reason, Some(PauseReason::User));
        assert!(job.progress.chunks_uploaded >= 1 && job.progress.chunks_uploaded < 10);

        queue.resume(&id).unwrap();
        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.chunk_numbers(), (1..=10).collect::<Vec<_>>());
        assert_eq!(transport.session_titles().len(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn connectivity_loss_pauses_and_recovery_resumes() {
        let (queue, _, transport) = setup(
            fast_config(),
            MockTransport::with_delay(100, Duration::from_millis(20)),
        );
        let mut sub = queue.subscribe(&[]);
        let id = queue
            .enqueue(payload(1000), info("Commute"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        wait_for(&mut sub, |e| e.topic() == EventTopic::Progress).await;
        queue.set_online(false);
        let paused = wait_for(&mut sub, |e| e.topic() == EventTopic::Paused).await;
        assert!(matches!(
            paused,
            QueueEvent::Paused { reason: PauseReason::Offline, .. }
        ));
        assert_eq!(queue.get_status(&id).unwrap().retry_count, 0);

        queue.set_online(true);
        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.chunk_numbers(), (1..=10).collect::<Vec<_>>());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn offline_queue_waits_for_connectivity() {
        let (queue, _, transport) = setup(fast_config(), MockTransport::new(100));
        queue.set_online(false);
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        let id = queue
            .enqueue(payload(200), info("Later"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.get_status(&id).unwrap().status, UploadStatus::Pending);
        assert!(transport.session_titles().is_empty());

        queue.set_online(true);
        wait_for(&mut sub, is_completed(&id)).await;
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_returns_in_flight_job_to_pending() {
        let (queue, _, _) = setup(
            fast_config(),
            MockTransport::with_delay(100, Duration::from_millis(200)),
        );
        let mut sub = queue.subscribe(&[EventTopic::Started]);
        let id = queue
            .enqueue(payload(1000), info("Interrupted"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();
        wait_for(&mut sub, |e| e.topic() == EventTopic::Started).await;

        queue.shutdown().await;
        let job = queue.get_status(&id).unwrap();
        assert_eq!(job.status, UploadStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(matches!(queue.init(), Err(QueueError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn retention_sweep_deletes_old_completed_jobs() {
        let (queue, store, _) = setup(fast_config(), MockTransport::new(100));
        let old = queue
            .enqueue(payload(100), info("Old"), EnqueueOptions::default())
            .unwrap();
        let recent = queue
            .enqueue(payload(100), info("Recent"), EnqueueOptions::default())
            .unwrap();
        for (id, age_days) in [(&old, 8), (&recent, 1)] {
            let mut job = store.get(id).unwrap().unwrap();
            job.status = UploadStatus::Completed;
            job.completed_at = Some(Utc::now() - chrono::Duration::days(age_days));
            store.put(&job).unwrap();
        }

        assert_eq!(queue.sweep_retention().unwrap(), 1);
        assert!(matches!(queue.get_status(&old), Err(QueueError::NotFound(_))));
        assert!(queue.get_status(&recent).is_ok());
    }

    #[tokio::test]
    async fn retention_sweep_runs_while_uploads_are_in_flight() {
        let mut config = fast_config();
        config.max_concurrent = 1;
        config.sweep_interval_secs = 1;
        let (queue, store, _) = setup(
            config,
            MockTransport::with_delay(100, Duration::from_millis(50)),
        );
        let mut sub = queue.subscribe(&[EventTopic::Progress]);
        let busy = queue
            .enqueue(payload(10_000), info("Busy"), EnqueueOptions::default())
            .unwrap();
        queue.init().unwrap();
        wait_for(&mut sub, |e| e.topic() == EventTopic::Progress).await;

        let old = queue
            .enqueue(payload(100), info("Old"), EnqueueOptions::default())
            .unwrap();
        let mut job = store.get(&old).unwrap().unwrap();
        job.status = UploadStatus::Completed;
        job.completed_at = Some(Utc::now() - chrono::Duration::days(8));
        store.put(&job).unwrap();

        tokio::time::timeout(Duration::from_secs(3), async {
            while queue.get_status(&old).is_ok() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("old job was not swept");
        assert_eq!(
            queue.get_status(&busy).unwrap().status,
            UploadStatus::Uploading
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn failed_init_can_be_retried() {
        let store = Arc::new(FlakyStore::default());
        let queue = UploadQueue::new(
            fast_config(),
            store.clone(),
            Arc::new(MockTransport::new(100)),
        );
        store.broken.store(true, Ordering::SeqCst);
        assert!(matches!(queue.init(), Err(QueueError::Store(_))));

        store.broken.store(false, Ordering::SeqCst);
        queue.init().unwrap();
        assert!(matches!(queue.init(), Err(QueueError::AlreadyRunning)));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn list_filters_and_limits() {
        let (queue, _, _) = setup(fast_config(), MockTransport::new(100));
        let low = queue
            .enqueue(payload(100), info("Low"), priority(Priority::Low))
            .unwrap();
        let urgent = queue
            .enqueue(payload(100), info("Urgent"), priority(Priority::Urgent))
            .unwrap();
        queue.pause(&low).unwrap();

        let all = queue.list(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, urgent);

        let paused = queue.list(Some(UploadStatus::Paused), None).unwrap();
        assert_eq!(paused.len(), 1);
        assert_eq!(paused[0].id, low);

        assert_eq!(queue.list(None, Some(1)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");

        let id = {
            let store = Arc::new(FileJobStore::open(&root).unwrap());
            let queue = UploadQueue::new(fast_config(), store, Arc::new(MockTransport::new(100)));
            queue
                .enqueue(payload(500), info("Persisted"), EnqueueOptions::default())
                .unwrap()
        };

        let store = Arc::new(FileJobStore::open(&root).unwrap());
        let transport = Arc::new(MockTransport::new(100));
        let queue = UploadQueue::new(fast_config(), store, transport.clone());
        let mut sub = queue.subscribe(&[EventTopic::Completed]);
        queue.init().unwrap();

        wait_for(&mut sub, is_completed(&id)).await;
        assert_eq!(transport.chunk_numbers(), vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.get_status(&id).unwrap().status, UploadStatus::Completed);
        queue.shutdown().await;
    }
}
