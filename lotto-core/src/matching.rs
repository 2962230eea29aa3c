use crate::error::Result;
use crate::store::{tickets_path, DocumentStore, TxDecision};
use crate::types::{tickets_from_value, TicketsMap};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// `numbers ∩ drawn`, ascending.
pub fn matches_for(numbers: &[u8], drawn: &[u8]) -> Vec<u8> {
    let drawn: BTreeSet<u8> = drawn.iter().copied().collect();
    let matched: BTreeSet<u8> = numbers.iter().copied().filter(|n| drawn.contains(n)).collect();
    matched.into_iter().collect()
}

/// Tickets whose stored `matchedNumbers` disagree with `drawn`, with their
/// corrected match lists. Comparison ignores order.
pub fn compute_match_updates(tickets: &TicketsMap, drawn: &[u8]) -> BTreeMap<String, Vec<u8>> {
    tickets
        .iter()
        .filter_map(|(id, ticket)| {
            let computed = matches_for(&ticket.numbers, drawn);
            let stored: BTreeSet<u8> = ticket.matched_numbers.iter().copied().collect();
            let fresh: BTreeSet<u8> = computed.iter().copied().collect();
            (stored != fresh).then(|| (id.clone(), computed))
        })
        .collect()
}

/// Writes corrected match lists into a raw tickets document. Only ids already
/// present are touched, and every other field is left as stored.
fn apply_match_updates(current: &Value, changes: &BTreeMap<String, Vec<u8>>) -> Value {
    let mut next = current.clone();
    if let Value::Object(entries) = &mut next {
        for (id, matched) in changes {
            if let Some(Value::Object(ticket)) = entries.get_mut(id) {
                ticket.insert("matchedNumbers".to_string(), Value::from(matched.clone()));
            }
        }
    }
    next
}

/// Rewrites the denormalized `matchedNumbers` cache of a session's tickets.
///
/// Derives everything from `(numbers, drawn)`, so repeated or concurrent passes
/// converge on the same tree. The write is a transaction over the committed
/// tickets, so a ticket deleted by a reset is never recreated.
pub struct MatchReconciler {
    store: Arc<dyn DocumentStore>,
    session_key: String,
}

impl MatchReconciler {
    pub fn new(store: Arc<dyn DocumentStore>, session_key: impl Into<String>) -> Self {
        Self {
            store,
            session_key: session_key.into(),
        }
    }

    /// Returns how many tickets were rewritten. `tickets` only decides whether a
    /// pass is needed; the values written come from the committed tickets.
    pub async fn reconcile(&self, tickets: &TicketsMap, drawn: &[u8]) -> Result<usize> {
        if compute_match_updates(tickets, drawn).is_empty() {
            return Ok(0);
        }

        let mut updated = 0;
        let result = self
            .store
            .transact(&tickets_path(&self.session_key), &mut |current| {
                updated = 0;
                let Some(current) = current else {
                    return TxDecision::Abort;
                };

                let changes = compute_match_updates(&tickets_from_value(Some(&current)), drawn);
                if changes.is_empty() {
                    return TxDecision::Abort;
                }

                updated = changes.len();
                TxDecision::Commit(apply_match_updates(&current, &changes))
            })
            .await;

        match result {
            Ok(outcome) => {
                if !outcome.committed {
                    return Ok(0);
                }

                tracing::info!(
                    event = "draw:highlight",
                    session = %self.session_key,
                    tickets_updated = updated,
                    drawn = ?drawn,
                    "Refreshed matched numbers on {} tickets",
                    updated
                );
                Ok(updated)
            }
            Err(e) => {
                tracing::error!(
                    event = "draw:error",
                    session = %self.session_key,
                    stage = "highlight",
                    error = %e,
                    "Failed to refresh matched numbers"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::TicketRecord;
    use serde_json::json;

    fn ticket(numbers: &[u8], matched: &[u8]) -> TicketRecord {
        TicketRecord {
            name: "player".to_string(),
            numbers: numbers.to_vec(),
            matched_numbers: matched.to_vec(),
            created_at: None,
            source: None,
            metadata: None,
        }
    }

    #[test]
    fn test_matches_for_example_draw() {
        assert_eq!(matches_for(&[1, 2, 3, 4, 5, 6], &[3, 9, 12, 27, 40, 44]), vec![3]);
        assert_eq!(matches_for(&[44, 3, 12], &[3, 9, 12, 27, 40, 44]), vec![3, 12, 44]);
        assert!(matches_for(&[1, 2], &[]).is_empty());
    }

    #[test]
    fn test_only_changed_tickets_are_collected() {
        let mut tickets = TicketsMap::new();
        tickets.insert("same".into(), ticket(&[3, 9, 20, 21, 22, 23], &[9, 3]));
        tickets.insert("stale".into(), ticket(&[1, 2, 3, 4, 5, 6], &[]));
        tickets.insert("cleared".into(), ticket(&[7, 8, 10, 11, 13, 14], &[8]));

        let updates = compute_match_updates(&tickets, &[3, 9]);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates["stale"], vec![3]);
        assert!(updates["cleared"].is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_writes_single_batch() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "/sessions/s/tickets",
                json!({
                    "a": { "name": "A", "numbers": [1, 2, 3, 4, 5, 6] },
                    "b": { "name": "B", "numbers": [9, 10, 11, 12, 13, 14] }
                }),
            )
            .await
            .unwrap();

        let reconciler = MatchReconciler::new(store.clone(), "s");
        let drawn = [3, 9, 12, 27, 40, 44];
        let tickets = tickets_from_value(store.get("/sessions/s/tickets").await.unwrap().as_ref());

        let mut sub = store.subscribe("/sessions/s/tickets").await.unwrap();
        sub.next().await;

        assert_eq!(reconciler.reconcile(&tickets, &drawn).await.unwrap(), 2);
        assert!(sub.next().await.is_some());
        assert!(sub.try_next().is_none());

        let tickets = tickets_from_value(store.get("/sessions/s/tickets").await.unwrap().as_ref());
        assert_eq!(tickets["a"].matched_numbers, vec![3]);
        assert_eq!(tickets["b"].matched_numbers, vec![9, 12]);

        // converged: a second pass writes nothing
        assert_eq!(reconciler.reconcile(&tickets, &drawn).await.unwrap(), 0);
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_failure_is_returned() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/sessions/s/tickets/a", json!({ "name": "A", "numbers": [1, 2, 3, 4, 5, 6] }))
            .await
            .unwrap();
        let tickets = tickets_from_value(store.get("/sessions/s/tickets").await.unwrap().as_ref());

        store.fail_next_write("offline");
        let reconciler = MatchReconciler::new(store.clone(), "s");
        assert!(reconciler.reconcile(&tickets, &[1]).await.is_err());

        // next pass heals
        assert_eq!(reconciler.reconcile(&tickets, &[1]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_never_recreates_deleted_tickets() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/sessions/s/tickets/a", json!({ "name": "A", "numbers": [1, 2, 3, 4, 5, 6] }))
            .await
            .unwrap();
        let stale = tickets_from_value(store.get("/sessions/s/tickets").await.unwrap().as_ref());

        store.set("/sessions/s", json!({ "draw": { "status": "idle" } })).await.unwrap();

        let reconciler = MatchReconciler::new(store.clone(), "s");
        assert_eq!(reconciler.reconcile(&stale, &[3]).await.unwrap(), 0);
        assert_eq!(store.get("/sessions/s/tickets").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_snapshot_only_touches_surviving_tickets() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "/sessions/s/tickets",
                json!({
                    "a": { "name": "A", "numbers": [1, 2, 3, 4, 5, 6] },
                    "b": { "name": "B", "numbers": [3, 10, 11, 12, 13, 14], "createdAt": "2024-01-01T00:00:00Z" }
                }),
            )
            .await
            .unwrap();
        let stale = tickets_from_value(store.get("/sessions/s/tickets").await.unwrap().as_ref());

        store.set("/sessions/s/tickets/a", Value::Null).await.unwrap();

        let reconciler = MatchReconciler::new(store.clone(), "s");
        assert_eq!(reconciler.reconcile(&stale, &[3]).await.unwrap(), 1);

        let raw = store.get("/sessions/s/tickets").await.unwrap().unwrap();
        assert!(raw.get("a").is_none());
        assert_eq!(
            raw["b"],
            json!({
                "name": "B",
                "numbers": [3, 10, 11, 12, 13, 14],
                "createdAt": "2024-01-01T00:00:00Z",
                "matchedNumbers": [3]
            })
        );
    }
}
