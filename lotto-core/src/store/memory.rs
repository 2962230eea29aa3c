use super::hub::SubscriptionHub;
use super::{
    apply_transaction, new_push_key, tree, DocumentStore, Subscription, TransactionFn,
    TransactionOutcome,
};
use crate::error::{LotteryError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Default)]
struct MemoryInner {
    root: Value,
    pending_failures: VecDeque<String>,
}

/// In-process document store.
///
/// Every write, including transaction functions, runs under one lock against
/// the committed tree, so transactions are linearizable.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    hub: Arc<SubscriptionHub>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            hub: SubscriptionHub::new(),
        }
    }

    pub fn with_root(root: Value) -> Self {
        let store = Self::new();
        store.inner.lock().root = root;
        store
    }

    /// Makes the next write fail with a transport error.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.inner.lock().pending_failures.push_back(message.into());
    }

    /// Delivers a transport error to subscribers overlapping `path`.
    pub fn broadcast_error(&self, path: &str, message: &str) {
        let _inner = self.inner.lock();
        self.hub.broadcast_error(path, message);
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    pub fn root(&self) -> Value {
        self.inner.lock().root.clone()
    }

    fn commit<R>(&self, mutate: impl FnOnce(&mut Value) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.pending_failures.pop_front() {
            return Err(LotteryError::transport(message));
        }

        let before = inner.root.clone();
        let result = mutate(&mut inner.root);
        if inner.root != before {
            self.hub.publish_changes(&before, &inner.root);
        }

        Ok(result)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(tree::read(&self.inner.lock().root, path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.commit(|root| tree::write(root, path, value))
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = new_push_key();
        let child = tree::join(path, &key);
        self.commit(|root| tree::write(root, &child, value))?;
        Ok(key)
    }

    async fn update(&self, base: &str, updates: BTreeMap<String, Value>) -> Result<()> {
        self.commit(|root| tree::write_many(root, base, updates))
    }

    async fn transact(&self, path: &str, apply: TransactionFn<'_>) -> Result<TransactionOutcome> {
        self.commit(|root| apply_transaction(root, path, apply))
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let inner = self.inner.lock();
        Ok(self.hub.register(path, tree::read(&inner.root, path)))
    }
}
