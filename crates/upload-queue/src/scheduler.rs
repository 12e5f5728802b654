//! The scheduler loop, the network watcher and the retention sweeper.
//!
//! The scheduler is the only task that claims jobs (`pending → uploading`)
//! and the only writer of the active-slot counter. It starts a batch of up
//! to `maxConcurrent` attempts, drives them together, and settles every
//! outcome before looking at the queue again.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use voxlift_job_store::{PauseReason, StoreError};
use voxlift_protocol::UploadStatus;

use crate::error::UploadError;
use crate::events::QueueEvent;
use crate::executor::{AttemptOutcome, run_attempt};
use crate::manager::{Inner, JobControl};
use crate::retry::RetryDecision;

/// Runs until the queue shuts down.
pub(crate) async fn run(inner: Arc<Inner>) {
    let mut announced_empty = false;

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        let pending = match inner.store.list_by_status(UploadStatus::Pending) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to read pending jobs");
                if !pause_after_error(&inner).await {
                    break;
                }
                continue;
            }
        };
        let pending_count = pending.len();
        let (eligible, next_deadline) = inner.eligible(pending, Instant::now());

        if eligible.is_empty() {
            if pending_count == 0 && !announced_empty {
                debug!("no pending uploads");
                inner.events.publish(QueueEvent::QueueEmpty);
                announced_empty = true;
            }
            let backoff_elapsed = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = inner.wake.notified() => {}
                _ = backoff_elapsed => {}
            }
            continue;
        }
        announced_empty = false;

        if !inner.network.is_online() {
            debug!(pending = pending_count, "offline, waiting for connectivity");
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = inner.network.wait_online() => {}
            }
            continue;
        }

        let slots = inner
            .config
            .max_concurrent
            .saturating_sub(inner.active.load(Ordering::SeqCst));
        let batch = match claim(&inner, eligible, slots) {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "failed to claim pending jobs");
                if !pause_after_error(&inner).await {
                    break;
                }
                continue;
            }
        };
        if batch.is_empty() {
            // Every candidate changed state under us; re-read.
            tokio::task::yield_now().await;
            continue;
        }

        inner.active.fetch_add(batch.len(), Ordering::SeqCst);
        let attempts = batch
            .iter()
            .map(|(id, control)| run_attempt(&inner, id, control));
        let outcomes = join_all(attempts).await;
        for ((id, control), outcome) in batch.iter().zip(outcomes) {
            if let Err(e) = settle(&inner, id, control, outcome) {
                error!(job = %id, error = %e, "failed to record attempt outcome");
            }
            inner.remove_control(id);
        }
        inner.active.fetch_sub(batch.len(), Ordering::SeqCst);
    }
    debug!("scheduler stopped");
}

/// Backs off after a store failure. Returns `false` on shutdown.
async fn pause_after_error(inner: &Inner) -> bool {
    tokio::select! {
        _ = inner.shutdown.cancelled() => false,
        _ = tokio::time::sleep(inner.retry.base_delay) => true,
    }
}

/// Moves up to `slots` jobs from the head of `eligible` to `uploading`.
fn claim(
    inner: &Inner,
    eligible: Vec<voxlift_job_store::UploadJob>,
    slots: usize,
) -> Result<Vec<(String, JobControl)>, StoreError> {
    let mut batch = Vec::with_capacity(slots);
    for candidate in eligible.into_iter().take(slots) {
        let now = Utc::now();
        let claimed = inner.update_job(&candidate.id, |job| {
            job.transition(UploadStatus::Uploading, now).ok()?;
            // Registered under the write lock so a concurrent pause or
            // cancel always finds it.
            Some(inner.register_control(&job.id))
        })?;
        let Some((job, control)) = claimed else {
            continue;
        };
        info!(
            job = %job.id,
            title = %job.metadata.title,
            priority = ?job.priority,
            retry_count = job.retry_count,
            "upload started"
        );
        inner.events.publish(QueueEvent::Started {
            job_id: job.id.clone(),
            retry_count: job.retry_count,
        });
        batch.push((job.id, control));
    }
    Ok(batch)
}

/// What a failed attempt turned into.
#[derive(Clone, Copy)]
enum FailureAction {
    Pause(PauseReason),
    Requeue { attempt: u32, delay: std::time::Duration },
    Fail,
}

/// Applies an attempt outcome to the job record and publishes it.
///
/// Outcomes for jobs that already left `uploading` (cancelled mid-call) are
/// dropped.
fn settle(
    inner: &Inner,
    id: &str,
    control: &JobControl,
    outcome: AttemptOutcome,
) -> Result<(), StoreError> {
    let now = Utc::now();
    match outcome {
        AttemptOutcome::Completed { artifact_ref } => {
            let done = inner.update_job(id, |job| {
                if job.status != UploadStatus::Uploading {
                    return None;
                }
                job.artifact_ref = Some(artifact_ref.clone());
                job.transition(UploadStatus::Completed, now).ok()
            })?;
            if let Some((job, ())) = done {
                if let Err(e) = inner.store.delete_payload(id) {
                    warn!(job = %id, error = %e, "failed to release payload");
                }
                info!(job = %id, artifact = %artifact_ref, "upload completed");
                inner.events.publish(QueueEvent::Completed {
                    job_id: job.id,
                    artifact_ref,
                });
            }
        }
        AttemptOutcome::Paused(reason) => {
            let paused = inner.update_job(id, |job| {
                if job.status != UploadStatus::Uploading {
                    return None;
                }
                job.transition(UploadStatus::Paused, now).ok()?;
                job.pause_reason = Some(reason);
                Some(())
            })?;
            if paused.is_some() {
                info!(job = %id, ?reason, "upload paused at chunk boundary");
                inner.events.publish(QueueEvent::Paused {
                    job_id: id.to_string(),
                    reason,
                });
            }
        }
        AttemptOutcome::Interrupted => {
            let demoted = inner.update_job(id, |job| {
                if job.status != UploadStatus::Uploading {
                    return None;
                }
                job.transition(UploadStatus::Pending, now).ok()
            })?;
            if demoted.is_some() {
                debug!(job = %id, "attempt interrupted by shutdown");
            }
        }
        AttemptOutcome::Cancelled => {
            debug!(job = %id, "attempt abandoned");
        }
        AttemptOutcome::Failed(err) => settle_failure(inner, id, control, err)?,
    }
    Ok(())
}

fn settle_failure(
    inner: &Inner,
    id: &str,
    control: &JobControl,
    err: UploadError,
) -> Result<(), StoreError> {
    let now = Utc::now();
    let offline = !inner.network.is_online();
    let pause_requested = control.pause.load(Ordering::SeqCst);
    let message = err.to_string();

    let settled = inner.update_job(id, |job| {
        if job.status != UploadStatus::Uploading {
            return None;
        }
        job.last_error = Some(message.clone());
        match err {
            UploadError::SessionExpired => job.discard_session(),
            UploadError::ChecksumMismatch(_) => {
                job.discard_session();
                job.reset_progress();
            }
            _ => {}
        }

        let action = if err.is_retryable() && offline {
            FailureAction::Pause(PauseReason::Offline)
        } else {
            match inner.retry.decide(&err, job) {
                RetryDecision::Retry { attempt, delay } => {
                    job.retry_count = attempt;
                    if pause_requested {
                        FailureAction::Pause(PauseReason::User)
                    } else {
                        FailureAction::Requeue { attempt, delay }
                    }
                }
                RetryDecision::Fail => FailureAction::Fail,
            }
        };
        let to = match action {
            FailureAction::Pause(reason) => {
                job.pause_reason = Some(reason);
                UploadStatus::Paused
            }
            FailureAction::Requeue { .. } => UploadStatus::Pending,
            FailureAction::Fail => UploadStatus::Failed,
        };
        job.transition(to, now).ok()?;
        Some(action)
    })?;
    let Some((job, action)) = settled else {
        return Ok(());
    };

    match action {
        FailureAction::Pause(reason) => {
            warn!(
                job = %id,
                error = %message,
                kind = ?err.kind(),
                ?reason,
                "upload paused after failure"
            );
            inner.events.publish(QueueEvent::Paused {
                job_id: job.id,
                reason,
            });
        }
        FailureAction::Requeue { attempt, delay } => {
            inner.set_backoff(id, Instant::now() + delay);
            warn!(
                job = %id,
                attempt,
                max_retries = job.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                kind = ?err.kind(),
                "upload failed, retrying"
            );
            inner.events.publish(QueueEvent::Requeued {
                job_id: job.id,
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: message,
            });
        }
        FailureAction::Fail => {
            if matches!(err, UploadError::ChecksumMismatch(_)) {
                inner.store.clear_chunk_records(id)?;
            }
            error!(
                job = %id,
                retry_count = job.retry_count,
                error = %message,
                kind = ?err.kind(),
                "upload failed"
            );
            inner.events.publish(QueueEvent::Failed {
                job_id: job.id,
                error: message,
                retry_count: job.retry_count,
            });
        }
    }
    Ok(())
}

/// Deletes expired terminal jobs every sweep interval, independent of how
/// busy the scheduler is.
pub(crate) async fn sweep_periodically(inner: Arc<Inner>) {
    let period = inner.config.sweep_interval();
    let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = sweep.tick() => {
                if let Err(e) = inner.sweep_retention() {
                    warn!(error = %e, "retention sweep failed");
                }
            }
        }
    }
}

/// Resumes connectivity-paused jobs and wakes the scheduler whenever the
/// network comes back.
pub(crate) async fn watch_network(inner: Arc<Inner>) {
    let mut rx = inner.network.watch();
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                match inner.resume_offline_paused() {
                    Ok(resumed) if resumed > 0 => info!(resumed, "network online, uploads resumed"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "failed to resume paused uploads"),
                }
                inner.wake.notify_one();
            }
        }
    }
}
