//! Single-slot snapshot channel
//!
//! Stages hand full snapshots to each other through a mailbox that holds
//! only the latest value. Publishing overwrites whatever the consumer has
//! not read yet; a slow consumer sees the most recent snapshot at the time
//! it next checks and never a backlog.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected publisher/subscriber pair with an empty slot
pub fn snapshot_channel<T>() -> (SnapshotPublisher<T>, SnapshotSubscriber<T>) {
    let (tx, rx) = watch::channel(None);
    (SnapshotPublisher { tx }, SnapshotSubscriber { rx })
}

/// Writing half of a snapshot channel
#[derive(Debug)]
pub struct SnapshotPublisher<T> {
    tx: watch::Sender<Option<Arc<T>>>,
}

impl<T> SnapshotPublisher<T> {
    /// Replace the slot with a new snapshot and wake the subscriber
    ///
    /// Succeeds even when nobody is subscribed.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Some(Arc::new(value)));
    }
}

/// Reading half of a snapshot channel
#[derive(Debug)]
pub struct SnapshotSubscriber<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
}

impl<T> SnapshotSubscriber<T> {
    /// Wait for a snapshot newer than the last one returned
    ///
    /// Intermediate values published while the caller was busy are skipped.
    /// Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    /// The latest snapshot, if any was ever published
    #[cfg(test)]
    fn latest(&self) -> Option<Arc<T>> {
        self.rx.borrow().clone()
    }
}
