//! Typed publish/subscribe for queue lifecycle events.
//!
//! Delivery is at-most-once: each subscriber owns a bounded channel and a
//! full channel drops the event for that subscriber only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use voxlift_job_store::PauseReason;
use voxlift_protocol::{Priority, UploadProgress};

/// Topic a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTopic {
    Queued,
    Started,
    Progress,
    Paused,
    Resumed,
    Completed,
    Failed,
    Cancelled,
    QueueEmpty,
}

/// A lifecycle event published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    #[serde(rename_all = "camelCase")]
    Queued { job_id: String, priority: Priority },

    /// Re-queued after a retryable failure.
    #[serde(rename_all = "camelCase")]
    Requeued {
        job_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    Started { job_id: String, retry_count: u32 },

    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: String,
        progress: UploadProgress,
        bytes_per_second: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_secs: Option<f64>,
    },

    #[serde(rename_all = "camelCase")]
    Paused { job_id: String, reason: PauseReason },

    #[serde(rename_all = "camelCase")]
    Resumed { job_id: String },

    #[serde(rename_all = "camelCase")]
    Completed { job_id: String, artifact_ref: String },

    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: String,
        error: String,
        retry_count: u32,
    },

    #[serde(rename_all = "camelCase")]
    Cancelled { job_id: String },

    QueueEmpty,
}

impl QueueEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            QueueEvent::Queued { .. } | QueueEvent::Requeued { .. } => EventTopic::Queued,
            QueueEvent::Started { .. } => EventTopic::Started,
            QueueEvent::Progress { .. } => EventTopic::Progress,
            QueueEvent::Paused { .. } => EventTopic::Paused,
            QueueEvent::Resumed { .. } => EventTopic::Resumed,
            QueueEvent::Completed { .. } => EventTopic::Completed,
            QueueEvent::Failed { .. } => EventTopic::Failed,
            QueueEvent::Cancelled { .. } => EventTopic::Cancelled,
            QueueEvent::QueueEmpty => EventTopic::QueueEmpty,
        }
    }

    /// Job the event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::Queued { job_id, .. }
            | QueueEvent::Requeued { job_id, .. }
            | QueueEvent::Started { job_id, .. }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::Paused { job_id, .. }
            | QueueEvent::Resumed { job_id }
            | QueueEvent::Completed { job_id, .. }
            | QueueEvent::Failed { job_id, .. }
            | QueueEvent::Cancelled { job_id } => Some(job_id),
            QueueEvent::QueueEmpty => None,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<QueueEvent>,
}

struct Subscriber {
    id: u64,
    /// Empty means every topic.
    topics: Vec<EventTopic>,
    tx: mpsc::Sender<QueueEvent>,
}

impl Subscriber {
    fn wants(&self, topic: EventTopic) -> bool {
        self.topics.is_empty() || self.topics.contains(&topic)
    }
}

/// Fan-out of [`QueueEvent`]s to topic-filtered subscribers.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBus {
    /// Creates a bus whose subscriber channels hold `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Subscribes to `topics`; an empty slice subscribes to all of them.
    pub fn subscribe(&self, topics: &[EventTopic]) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                topics: topics.to_vec(),
                tx,
            });
        Subscription { id, receiver }
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every interested subscriber without waiting.
    pub fn publish(&self, event: QueueEvent) {
        let topic = event.topic();
        trace!(?topic, job = ?event.job_id(), "publishing queue event");
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.retain(|sub| {
            if !sub.wants(topic) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = sub.id, ?topic, "subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}
