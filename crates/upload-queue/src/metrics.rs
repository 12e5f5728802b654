//! Queue-wide counters derived from job records.

use serde::Serialize;

use voxlift_job_store::UploadJob;
use voxlift_protocol::UploadStatus;

/// Point-in-time aggregate over every stored job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    /// Jobs currently `uploading`.
    pub active_jobs: usize,
    pub paused_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    /// `completed / total`, 0 when there are no jobs.
    pub success_rate: f64,
    pub average_retries: f64,
    /// Payload bytes of completed jobs.
    pub bytes_transferred: u64,
    /// Completed bytes per second of summed upload wall time.
    pub throughput_bytes_per_sec: f64,
}

impl MetricsSnapshot {
    /// Computes the snapshot from a full job listing.
    pub fn from_jobs(jobs: &[UploadJob]) -> Self {
        let mut snap = MetricsSnapshot {
            total_jobs: jobs.len(),
            ..Self::default()
        };
        let mut retries: u64 = 0;
        let mut upload_secs = 0.0_f64;

        for job in jobs {
            retries += u64::from(job.retry_count);
            match job.status {
                UploadStatus::Pending => snap.pending_jobs += 1,
                UploadStatus::Uploading => snap.active_jobs += 1,
                UploadStatus::Paused => snap.paused_jobs += 1,
                UploadStatus::Failed => snap.failed_jobs += 1,
                UploadStatus::Cancelled => snap.cancelled_jobs += 1,
                UploadStatus::Completed => {
                    snap.completed_jobs += 1;
                    snap.bytes_transferred += job.metadata.size_bytes;
                    if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                        let elapsed = (completed - started).num_milliseconds();
                        if elapsed > 0 {
                            upload_secs += elapsed as f64 / 1000.0;
                        }
                    }
                }
            }
        }

        if snap.total_jobs > 0 {
            snap.success_rate = snap.completed_jobs as f64 / snap.total_jobs as f64;
            snap.average_retries = retries as f64 / snap.total_jobs as f64;
        }
        if upload_secs > 0.0 {
            snap.throughput_bytes_per_sec = snap.bytes_transferred as f64 / upload_secs;
        }
        snap
    }
}
