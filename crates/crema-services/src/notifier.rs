//! Notifier: fans events out to any number of subscribers.
//!
//! Every subscriber gets its own bounded buffer. `notify` never waits: a
//! subscriber whose buffer is full is dropped on the spot and its channel
//! closes, so one slow consumer can neither stall the publisher nor the
//! other subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Pending events buffered per subscriber before it is dropped.
pub const NOTIFIER_BUF_SIZE: usize = 10;

struct Subscribers<T> {
    next_id: u64,
    senders: Vec<(u64, mpsc::Sender<T>)>,
}

type Shared<T> = Arc<Mutex<Subscribers<T>>>;

fn lock<T>(shared: &Mutex<Subscribers<T>>) -> MutexGuard<'_, Subscribers<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe broadcaster. Cheap to clone; clones share subscribers.
pub struct Notifier<T> {
    subscribers: Shared<T>,
    capacity: usize,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Notifier<T> {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFIER_BUF_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: Vec::new(),
            })),
            capacity,
        }
    }

    /// Add a subscriber. It sees every event notified from now on.
    pub fn register(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = lock(&self.subscribers);
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.push((id, tx));
        Subscription {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Remove a subscriber. No-op if it is already gone.
    pub fn unregister(&self, subscription: &Subscription<T>) {
        lock(&self.subscribers)
            .senders
            .retain(|(id, _)| *id != subscription.id);
    }

    /// Deliver `event` to every subscriber without blocking.
    pub fn notify(&self, event: T) {
        lock(&self.subscribers)
            .senders
            .retain(|(id, tx)| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = id, "subscriber buffer full, dropping it");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).senders.len()
    }
}

/// The receiving end of a registration.
///
/// Yields `None` once the notifier dropped this subscriber (or itself went
/// away) and the buffered events are drained. Dropping it unregisters.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    subscribers: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.subscribers.upgrade() {
            lock(&shared).senders.retain(|(id, _)| *id != self.id);
        }
    }
}
