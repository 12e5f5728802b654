//! Durable, resumable chunked-upload queue.
//!
//! [`UploadQueue`] owns a [`JobStore`](voxlift_job_store::JobStore) and a
//! [`ChunkTransport`]. After [`UploadQueue::init`] a single scheduler task
//! picks pending jobs by priority, runs at most `maxConcurrent` of them at a
//! time, persists every acknowledged chunk, and re-queues retryable failures
//! with exponential backoff. Jobs interrupted by a crash resume from their
//! last acknowledged chunk on the next start.

pub mod compress;
pub mod config;
pub mod error;
pub mod events;
mod executor;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod network;
pub mod retry;
mod scheduler;
pub mod transport;

#[cfg(test)]
mod mock;

pub use compress::{Compressor, GzipCompressor};
pub use config::{ConfigError, EndpointConfig, QueueConfig, RetryConfig};
pub use error::{ErrorKind, QueueError, UploadError};
pub use events::{EventBus, EventTopic, QueueEvent, Subscription};
pub use http::HttpTransport;
pub use manager::{EnqueueOptions, RecordingInfo, UploadQueue};
pub use metrics::MetricsSnapshot;
pub use network::NetworkMonitor;
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{ChunkTransport, TransportFuture};
