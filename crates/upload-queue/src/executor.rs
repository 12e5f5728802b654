//! One upload attempt for one job: session, chunk loop, complete.
//!
//! The executor never changes a job's status. It reports an
//! [`AttemptOutcome`] and the scheduler settles it. Chunk acknowledgments
//! and progress are committed through [`Inner`] only while the job is still
//! `uploading`, so results of abandoned calls are dropped.

use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxlift_job_store::{ChunkRecord, PauseReason, UploadJob};
use voxlift_protocol::{
    ChunkAck, CompleteRequest, CreateSessionRequest, TransferSession, UploadStatus,
};
use voxlift_transfer::{Chunk, ChunkPlan, SpeedCalculator, effective_chunk_size};

use crate::error::UploadError;
use crate::events::QueueEvent;
use crate::manager::{Inner, JobControl};
use crate::transport::TransportFuture;

/// How an attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Completed { artifact_ref: String },
    Paused(PauseReason),
    /// Cancelled externally, or the job left `uploading` under us.
    Cancelled,
    /// The queue is shutting down.
    Interrupted,
    Failed(UploadError),
}

/// Result of a network call raced against cancellation and shutdown.
enum Guarded<T> {
    Done(Result<T, UploadError>),
    Stopped(AttemptOutcome),
}

/// Runs one attempt of `job_id`. Never panics on transport or store errors.
pub(crate) async fn run_attempt(
    inner: &Inner,
    job_id: &str,
    control: &JobControl,
) -> AttemptOutcome {
    match attempt(inner, job_id, control).await {
        Ok(outcome) => outcome,
        Err(e) => AttemptOutcome::Failed(e),
    }
}

async fn attempt(
    inner: &Inner,
    job_id: &str,
    control: &JobControl,
) -> Result<AttemptOutcome, UploadError> {
    let Some(job) = inner.store.get(job_id)? else {
        return Ok(AttemptOutcome::Cancelled);
    };
    if job.status != UploadStatus::Uploading {
        return Ok(AttemptOutcome::Cancelled);
    }
    if let Some(stop) = checkpoint(inner, control) {
        return Ok(stop);
    }

    // 1. Session: reuse the stored one until it expires.
    let (session, plan) = match job.session.clone() {
        Some(session) if !session.is_expired_at(Utc::now()) => {
            let plan = plan_for(inner, &job, &session)?;
            (session, plan)
        }
        stale => {
            if stale.is_some() {
                info!(job = %job_id, "transfer session expired, creating a new one");
            }
            let request = CreateSessionRequest {
                metadata: job.metadata.clone(),
                total_bytes: job.metadata.size_bytes,
                checksum: job.checksum.clone(),
            };
            let call = inner.transport.create_session(&request);
            let session = match guarded(inner, &control.cancel, call).await {
                Guarded::Done(result) => result?,
                Guarded::Stopped(outcome) => return Ok(outcome),
            };
            let plan = plan_for(inner, &job, &session)?;
            let installed =
                inner.install_session(job_id, &session, plan.total_chunks(), plan.chunk_size())?;
            if !installed {
                return Ok(AttemptOutcome::Cancelled);
            }
            debug!(
                job = %job_id,
                session = %session.session_id,
                chunks = plan.total_chunks(),
                chunk_size = plan.chunk_size(),
                "transfer session created"
            );
            (session, plan)
        }
    };

    // 2. Resume point.
    let mut acked = inner.store.acknowledged_chunks(job_id)?;
    acked.retain(|&n| n >= 1 && n <= plan.total_chunks());
    let mut chunks_done = acked.len() as u32;
    let mut bytes_done = plan.acknowledged_bytes(&acked);
    if !inner.sync_progress(job_id, plan.total_chunks(), chunks_done, bytes_done)? {
        return Ok(AttemptOutcome::Cancelled);
    }
    let remaining: Vec<u32> = plan.remaining(&acked).collect();
    if !acked.is_empty() {
        info!(
            job = %job_id,
            acknowledged = chunks_done,
            remaining = remaining.len(),
            "resuming from checkpoint"
        );
    }

    // 3. Chunk loop, strictly ascending.
    let mut speed = SpeedCalculator::default();
    speed.start();
    for number in remaining {
        if let Some(stop) = checkpoint(inner, control) {
            return Ok(stop);
        }

        let range = plan.range(number)?;
        let data = inner.store.read_payload(job_id, range.clone())?;
        let chunk = Chunk::new(number, range.start, data);

        let total = plan.total_chunks();
        if let Err(stop) = send_chunk(inner, control, &job, &session, &chunk, total).await? {
            return Ok(stop);
        }

        chunks_done += 1;
        bytes_done += chunk.len();
        let record = ChunkRecord::acknowledged(chunk.checksum.clone());
        let committed = inner.commit_chunk(job_id, number, &record, chunks_done, bytes_done)?;
        let Some(progress) = committed else {
            return Ok(AttemptOutcome::Cancelled);
        };

        speed.record(chunk.len());
        let remaining_bytes = progress.total_bytes.saturating_sub(progress.bytes_uploaded);
        debug!(
            job = %job_id,
            chunk = number,
            total = plan.total_chunks(),
            percentage = progress.percentage,
            "chunk acknowledged"
        );
        inner.events.publish(QueueEvent::Progress {
            job_id: job_id.to_string(),
            progress,
            bytes_per_second: speed.bytes_per_second(),
            eta_secs: speed.eta(remaining_bytes).map(|eta| eta.as_secs_f64()),
        });
    }

    // 4. Assemble.
    if let Some(stop) = checkpoint(inner, control) {
        return Ok(stop);
    }
    let request = CompleteRequest {
        session_id: session.session_id.clone(),
        validate_checksum: job.config.validation_enabled,
    };
    let call = inner.transport.complete(&session, &request);
    let response = match guarded(inner, &control.cancel, call).await {
        Guarded::Done(result) => result?,
        Guarded::Stopped(outcome) => return Ok(outcome),
    };
    Ok(AttemptOutcome::Completed {
        artifact_ref: response.final_artifact_ref,
    })
}

/// Sends one chunk, re-sending up to `chunkRetries` times on retryable errors.
///
/// The outer `Result` fails the attempt; the inner `Err` stops it.
async fn send_chunk(
    inner: &Inner,
    control: &JobControl,
    job: &UploadJob,
    session: &TransferSession,
    chunk: &Chunk,
    total_chunks: u32,
) -> Result<Result<ChunkAck, AttemptOutcome>, UploadError> {
    let mut resends = 0;
    loop {
        let result = match guarded(
            inner,
            &control.cancel,
            inner.transport.upload_chunk(session, chunk, total_chunks),
        )
        .await
        {
            Guarded::Done(result) => result,
            Guarded::Stopped(outcome) => return Ok(Err(outcome)),
        };
        let validate = job.config.validation_enabled;
        let error = match result.and_then(|ack| verify_ack(chunk, ack, validate)) {
            Ok(ack) => return Ok(Ok(ack)),
            Err(e) => e,
        };
        let resendable = error.is_retryable()
            && !matches!(error, UploadError::SessionExpired)
            && inner.network.is_online();
        if !resendable || resends >= inner.config.retry.chunk_retries {
            return Err(error);
        }
        resends += 1;
        warn!(
            job = %job.id,
            chunk = chunk.number,
            resend = resends,
            error = %error,
            "re-sending chunk"
        );
    }
}

/// Accepts only a positive acknowledgment of this chunk. With validation on,
/// an echoed checksum must match what was sent.
fn verify_ack(chunk: &Chunk, ack: ChunkAck, validate: bool) -> Result<ChunkAck, UploadError> {
    if !ack.received || ack.chunk_number != chunk.number {
        return Err(UploadError::ChunkRejected {
            chunk: chunk.number,
            reason: "not acknowledged".into(),
        });
    }
    if validate
        && let Some(reported) = ack.checksum.as_deref()
        && chunk.verify(reported).is_err()
    {
        return Err(UploadError::ChunkRejected {
            chunk: chunk.number,
            reason: format!("server checksum {reported} differs from {}", chunk.checksum),
        });
    }
    Ok(ack)
}

fn plan_for(
    inner: &Inner,
    job: &UploadJob,
    session: &TransferSession,
) -> Result<ChunkPlan, UploadError> {
    let fallback = if job.config.chunk_size_bytes > 0 {
        job.config.chunk_size_bytes
    } else {
        inner.config.default_chunk_size_bytes
    };
    let chunk_size = effective_chunk_size(
        session.recommended_chunk_size_bytes,
        session.max_chunk_size_bytes,
        fallback,
    )?;
    Ok(ChunkPlan::new(job.metadata.size_bytes, chunk_size)?)
}

/// Chunk-boundary check for cancel, shutdown, pause and connectivity.
fn checkpoint(inner: &Inner, control: &JobControl) -> Option<AttemptOutcome> {
    if control.cancel.is_cancelled() {
        Some(AttemptOutcome::Cancelled)
    } else if inner.shutdown.is_cancelled() {
        Some(AttemptOutcome::Interrupted)
    } else if control.pause.load(Ordering::SeqCst) {
        Some(AttemptOutcome::Paused(PauseReason::User))
    } else if !inner.network.is_online() {
        Some(AttemptOutcome::Paused(PauseReason::Offline))
    } else {
        None
    }
}

/// Runs a transport call under the per-call timeout. Cancellation and
/// shutdown abandon the call without waiting for it.
async fn guarded<T>(
    inner: &Inner,
    cancel: &CancellationToken,
    call: TransportFuture<'_, T>,
) -> Guarded<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Stopped(AttemptOutcome::Cancelled),
        _ = inner.shutdown.cancelled() => Guarded::Stopped(AttemptOutcome::Interrupted),
        result = tokio::time::timeout(inner.config.chunk_timeout(), call) => {
            Guarded::Done(result.unwrap_or_else(|_| Err(UploadError::Timeout)))
        }
    }
}
