//! Broadcast-based status notifier
//!
//! Relays every transfer transition to any number of subscribers over a
//! `tokio::sync::broadcast` channel. Subscribers that fall behind lose the
//! oldest events and should resynchronize through
//! `UploadCoordinator::get_transfer_list`.

use bucketsync_core::domain::TransferTemplate;
use bucketsync_core::ports::IStatusNotifier;
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered transitions per subscriber
pub const DEFAULT_CAPACITY: usize = 256;

/// Push-style notifier backed by a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<TransferTemplate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns a receiver for transitions published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransferTemplate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IStatusNotifier for BroadcastNotifier {
    fn notify(&self, transfer: &TransferTemplate) {
        // An error only means nobody is listening.
        if self.tx.send(transfer.clone()).is_err() {
            trace!(path = %transfer.path.display(), "No status subscribers");
        }
    }
}
