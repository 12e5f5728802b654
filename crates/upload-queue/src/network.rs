//! Connectivity state shared by the scheduler and executors.
//!
//! The platform connectivity signal is fed in through
//! [`NetworkMonitor::set_online`]; everything else observes it.

use tokio::sync::watch;
use tracing::info;

/// Tracks whether transfers are currently permitted.
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Records a connectivity change. Returns `true` if the state flipped.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "network state changed");
        }
        changed
    }

    /// Resolves once the monitor reports online (immediately if it already does).
    pub async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|online| *online).await;
    }

    /// Receiver notified on every state flip.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
