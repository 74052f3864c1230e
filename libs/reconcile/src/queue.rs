//! Deduplicating work queue.
//!
//! Items are handed out in FIFO order. An item already waiting is not queued
//! again, so a burst of events for one VM collapses into a single pass. Once
//! an item has been dequeued it may be enqueued again, even while it is
//! still being processed.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    pending: HashSet<T>,
    shutting_down: bool,
}

/// FIFO queue with set semantics over the waiting items.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> Default for WorkQueue<T>
where
    T: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                pending: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `item` unless it is already waiting or the queue is shut down.
    ///
    /// Returns `true` if the item was added.
    pub fn enqueue(&self, item: T) -> bool {
        {
            let mut inner = self.lock();
            if inner.shutting_down || inner.pending.contains(&item) {
                return false;
            }
            inner.pending.insert(item.clone());
            inner.items.push_back(item);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue has been shut down; items still
    /// waiting at that point are dropped.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent notify_waiters is not missed.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.shutting_down {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    inner.pending.remove(&item);
                    let more = !inner.items.is_empty();
                    drop(inner);
                    if more {
                        // Pass the permit on so another worker picks up the rest.
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Stops the queue and wakes every waiting consumer.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
