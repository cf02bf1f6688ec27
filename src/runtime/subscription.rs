//! Live per-query result sets pushed by the store task.

use std::marker::PhantomData;

use tokio::sync::{mpsc, watch};

use crate::{
    record::{CollectionRecord, Query, Snapshot},
    types::SubscriptionId,
};

use super::handle::Command;

/// Store-side end of a subscription.
pub(crate) struct Subscriber {
    pub(crate) query: Query,
    pub(crate) tx: watch::Sender<Snapshot>,
}

impl Subscriber {
    /// Pushes `next` unless subscribers already hold an equal snapshot.
    pub(crate) fn publish(&self, next: Snapshot) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        })
    }
}

/// Live view of one query's full result set.
///
/// The first [`Subscription::next`] yields the result set at subscribe time;
/// later calls wait for a change. Dropping or [`Subscription::cancel`]ing the
/// subscription unregisters it from the store.
pub struct Subscription<T: CollectionRecord> {
    id: SubscriptionId,
    query: Query,
    rx: watch::Receiver<Snapshot>,
    cmd_tx: mpsc::Sender<Command>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CollectionRecord> Subscription<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        query: Query,
        mut rx: watch::Receiver<Snapshot>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        rx.mark_changed();
        Self {
            id,
            query,
            rx,
            cmd_tx,
            _marker: PhantomData,
        }
    }

    /// Store-assigned id, unique per store task.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The query this subscription follows.
    pub fn query(&self) -> Query {
        self.query
    }

    /// Waits for the next result set. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        self.rx.changed().await.ok()?;
        Some(T::from_snapshot(&self.rx.borrow_and_update()))
    }

    /// Latest result set without waiting.
    pub fn current(&self) -> Vec<T> {
        T::from_snapshot(&self.rx.borrow())
    }

    /// Stops delivery and releases the store-side slot.
    pub fn cancel(self) {}
}

impl<T: CollectionRecord> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Full queue: the store prunes closed subscribers on its next publish.
        let _ = self.cmd_tx.try_send(Command::Unsubscribe { id: self.id });
    }
}
