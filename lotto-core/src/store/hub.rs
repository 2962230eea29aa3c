use super::{tree, Notification, Subscription};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Subscriber {
    path: String,
    sender: mpsc::UnboundedSender<Notification>,
}

/// Fans committed changes out to path subscribers.
///
/// Stores call `publish_changes` while still holding their write lock, which
/// keeps deliveries for any one subscriber in commit order.
#[derive(Default)]
pub(crate) struct SubscriptionHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl SubscriptionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber and queues `initial` as its first snapshot.
    pub fn register(self: &Arc<Self>, path: &str, initial: Option<Value>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        // receiver is alive, cannot fail
        let _ = sender.send(Notification::Snapshot(initial));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(
            id,
            Subscriber {
                path: path.to_string(),
                sender,
            },
        );

        tracing::debug!("Registered subscriber {} on {}", id, path);
        Subscription::new(id, path.to_string(), receiver, Arc::downgrade(self))
    }

    pub fn remove(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            tracing::debug!("Removed subscriber {}", id);
        }
    }

    /// Sends a fresh snapshot to every subscriber whose subtree differs between the two roots.
    pub fn publish_changes(&self, before: &Value, after: &Value) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, subscriber| {
            let previous = tree::read(before, &subscriber.path);
            let next = tree::read(after, &subscriber.path);
            if previous == next {
                return true;
            }
            subscriber.sender.send(Notification::Snapshot(next)).is_ok()
        });
    }

    /// Delivers a transport failure to subscribers overlapping `path`. They stay registered.
    pub fn broadcast_error(&self, path: &str, message: &str) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, subscriber| {
            if !tree::overlaps(&subscriber.path, path) {
                return true;
            }
            subscriber
                .sender
                .send(Notification::Error(message.to_string()))
                .is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}
