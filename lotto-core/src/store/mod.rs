//! Document store collaborator.
//!
//! Sessions live in a shared tree of JSON documents:
//!
//! ```text
//! /sessions/{sessionKey}/draw     -> DrawState
//! /sessions/{sessionKey}/tickets  -> { [ticketId]: TicketRecord }
//! ```
//!
//! Contested writes go through [`DocumentStore::transact`]; everything else is
//! a plain `set`, `push` or batched `update`.

mod hub;
pub mod memory;
pub mod sqlite;
pub mod tree;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use hub::SubscriptionHub;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Weak;
use tokio::sync::mpsc;

pub fn session_path(session_key: &str) -> String {
    format!("/sessions/{}", session_key)
}

pub fn draw_path(session_key: &str) -> String {
    format!("{}/draw", session_path(session_key))
}

pub fn tickets_path(session_key: &str) -> String {
    format!("{}/tickets", session_path(session_key))
}

/// Result of a transaction function, evaluated against the committed value.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    Commit(Value),
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub committed: bool,
    /// Value at the path after the transaction (or as seen when it aborted).
    pub snapshot: Option<Value>,
}

pub type TransactionFn<'a> = &'a mut (dyn FnMut(Option<Value>) -> TxDecision + Send);

/// What a subscriber receives: a full snapshot of its subtree, or a transport failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Snapshot(Option<Value>),
    Error(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Overwrites the subtree at `path`. Writing `null` deletes it.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Appends `value` under a fresh, time-ordered child key and returns that key.
    async fn push(&self, path: &str, value: Value) -> Result<String>;

    /// Applies every `relative path -> value` pair under `base` atomically.
    async fn update(&self, base: &str, updates: BTreeMap<String, Value>) -> Result<()>;

    /// Compare-and-swap: `apply` sees the value committed at apply time.
    async fn transact(&self, path: &str, apply: TransactionFn<'_>) -> Result<TransactionOutcome>;

    /// The first notification is the current snapshot; later ones follow commits in order.
    async fn subscribe(&self, path: &str) -> Result<Subscription>;
}

/// Push-update handle. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    path: String,
    receiver: mpsc::UnboundedReceiver<Notification>,
    hub: Weak<SubscriptionHub>,
}

impl Subscription {
    fn new(
        id: u64,
        path: String,
        receiver: mpsc::UnboundedReceiver<Notification>,
        hub: Weak<SubscriptionHub>,
    ) -> Self {
        Self {
            id,
            path,
            receiver,
            hub,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next notification. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

fn new_push_key() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

/// Runs a transaction function against `root` in place.
fn apply_transaction(root: &mut Value, path: &str, apply: TransactionFn<'_>) -> TransactionOutcome {
    let current = tree::read(root, path);
    match apply(current.clone()) {
        TxDecision::Commit(next) => {
            tree::write(root, path, next);
            TransactionOutcome {
                committed: true,
                snapshot: tree::read(root, path),
            }
        }
        TxDecision::Abort => TransactionOutcome {
            committed: false,
            snapshot: current,
        },
    }
}
