use super::hub::SubscriptionHub;
use super::{
    apply_transaction, new_push_key, tree, DocumentStore, Subscription, TransactionFn,
    TransactionOutcome,
};
use crate::error::{LotteryError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Published {
    version: i64,
    root: Value,
}

/// File-backed document store.
///
/// The whole tree is one versioned row. Every write opens an IMMEDIATE
/// transaction and re-reads the committed tree, so compare-and-swap holds even
/// when several processes share the database file. Subscribers only hear about
/// other processes' commits after [`SqliteStore::refresh`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    published: parking_lot::Mutex<Published>,
    hub: Arc<SubscriptionHub>,
}

impl SqliteStore {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LotteryError::internal(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS document_tree (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                tree TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO document_tree (id, version, tree) VALUES (1, 0, 'null')",
            [],
        )?;

        let (version, root) = load_tree(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            published: parking_lot::Mutex::new(Published { version, root }),
            hub: SubscriptionHub::new(),
        })
    }

    /// Picks up commits made through other connections and notifies subscribers.
    pub async fn refresh(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let (version, root) = load_tree(&conn)?;
        Ok(self.publish(version, root))
    }

    pub async fn version(&self) -> i64 {
        self.published.lock().version
    }

    fn publish(&self, version: i64, root: Value) -> bool {
        let mut published = self.published.lock();
        if version <= published.version {
            return false;
        }

        self.hub.publish_changes(&published.root, &root);
        *published = Published { version, root };
        true
    }

    async fn commit<R>(&self, mutate: impl FnOnce(&mut Value) -> R) -> Result<R> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (version, before) = load_tree(&tx)?;
        let mut after = before.clone();
        let result = mutate(&mut after);

        let committed_version = if after != before {
            tx.execute(
                "UPDATE document_tree SET version = ?1, tree = ?2 WHERE id = 1",
                params![version + 1, serde_json::to_string(&after)?],
            )?;
            version + 1
        } else {
            version
        };
        tx.commit()?;

        self.publish(committed_version, after);
        Ok(result)
    }
}

fn load_tree(conn: &Connection) -> Result<(i64, Value)> {
    let (version, raw): (i64, String) = conn.query_row(
        "SELECT version, tree FROM document_tree WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((version, serde_json::from_str(&raw)?))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().await;
        let (_, root) = load_tree(&conn)?;
        Ok(tree::read(&root, path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.commit(|root| tree::write(root, path, value)).await
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = new_push_key();
        let child = tree::join(path, &key);
        self.commit(|root| tree::write(root, &child, value)).await?;
        Ok(key)
    }

    async fn update(&self, base: &str, updates: BTreeMap<String, Value>) -> Result<()> {
        self.commit(|root| tree::write_many(root, base, updates)).await
    }

    async fn transact(&self, path: &str, apply: TransactionFn<'_>) -> Result<TransactionOutcome> {
        self.commit(|root| apply_transaction(root, path, apply)).await
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let conn = self.conn.lock().await;
        let (version, root) = load_tree(&conn)?;
        self.publish(version, root);

        let published = self.published.lock();
        Ok(self.hub.register(path, tree::read(&published.root, path)))
    }
}
