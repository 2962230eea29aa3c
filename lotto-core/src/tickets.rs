use crate::error::{LotteryError, Result};
use crate::rng::RandomSource;
use crate::store::{tickets_path, DocumentStore};
use crate::types::{
    timestamp_now, TicketRecord, TicketSource, LOTTO_MAX_NUMBER, LOTTO_MIN_NUMBER,
    LOTTO_SELECTION_SIZE, MAX_NAME_LENGTH,
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Input for [`TicketRegistry::issue`]. Numbers are raw user input and may be
/// out of range or repeated; they are normalized before anything is written.
#[derive(Debug, Clone)]
pub struct IssueTicketRequest {
    pub name: String,
    pub numbers: Vec<i64>,
    pub source: TicketSource,
    pub client_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl IssueTicketRequest {
    pub fn new(name: impl Into<String>, numbers: impl IntoIterator<Item = i64>) -> Self {
        Self {
            name: name.into(),
            numbers: numbers.into_iter().collect(),
            source: TicketSource::Manual,
            client_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_source(mut self, source: TicketSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

pub fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LotteryError::invalid_name("Player name is required"));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(LotteryError::invalid_name(format!(
            "Player name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }

    Ok(trimmed.to_string())
}

/// Dedupes, drops out-of-range values and sorts. Exactly six must remain.
pub fn normalize_numbers(numbers: &[i64]) -> Result<Vec<u8>> {
    let unique: BTreeSet<u8> = numbers
        .iter()
        .filter_map(|&n| u8::try_from(n).ok())
        .filter(|n| (LOTTO_MIN_NUMBER..=LOTTO_MAX_NUMBER).contains(n))
        .collect();

    if unique.len() != LOTTO_SELECTION_SIZE {
        return Err(LotteryError::InvalidSelection {
            expected: LOTTO_SELECTION_SIZE,
            actual: unique.len(),
        });
    }

    Ok(unique.into_iter().collect())
}

/// Validates and appends tickets. Never overwrites an existing ticket.
pub struct TicketRegistry {
    store: Arc<dyn DocumentStore>,
    session_key: String,
    rng: RandomSource,
}

impl TicketRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, session_key: impl Into<String>, rng: RandomSource) -> Self {
        Self {
            store,
            session_key: session_key.into(),
            rng,
        }
    }

    /// Writes a new ticket and returns its store-generated id.
    pub async fn issue(&self, request: IssueTicketRequest) -> Result<String> {
        let (name, numbers) = match sanitize_name(&request.name)
            .and_then(|name| normalize_numbers(&request.numbers).map(|numbers| (name, numbers)))
        {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(
                    event = "issue:error",
                    session = %self.session_key,
                    stage = "validate",
                    error = %e,
                    "Ticket rejected"
                );
                return Err(e);
            }
        };

        let mut metadata = request.metadata;
        if let Some(client_id) = request.client_id {
            metadata.insert("clientId".to_string(), Value::String(client_id));
        }

        let record = TicketRecord {
            name,
            numbers,
            matched_numbers: Vec::new(),
            created_at: Some(timestamp_now()),
            source: Some(request.source),
            metadata: (!metadata.is_empty()).then_some(metadata),
        };

        tracing::info!(
            event = "issue:start",
            session = %self.session_key,
            name = %record.name,
            source = record.source.map_or("manual", |s| s.as_str()),
            "Issuing ticket"
        );

        match self
            .store
            .push(&tickets_path(&self.session_key), record.to_value())
            .await
        {
            Ok(ticket_id) => {
                tracing::info!(
                    event = "issue:success",
                    session = %self.session_key,
                    ticket_id = %ticket_id,
                    "Ticket issued"
                );
                Ok(ticket_id)
            }
            Err(e) => {
                tracing::error!(
                    event = "issue:error",
                    session = %self.session_key,
                    stage = "write",
                    error = %e,
                    "Ticket write failed"
                );
                Err(e)
            }
        }
    }

    /// Completes `partial` with random numbers and issues it as an auto ticket.
    pub async fn issue_auto(&self, name: &str, partial: &[u8], client_id: Option<&str>) -> Result<String> {
        let numbers = self.rng.complete_selection(partial, LOTTO_SELECTION_SIZE)?;

        let mut request = IssueTicketRequest::new(name, numbers.into_iter().map(i64::from))
            .with_source(TicketSource::Auto);
        if let Some(client_id) = client_id {
            request = request.with_client_id(client_id);
        }

        self.issue(request).await
    }
}

/// A number pick in progress, capped at six distinct in-range values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketSelection {
    numbers: BTreeSet<u8>,
}

impl TicketSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first six distinct in-range values, in input order.
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Self {
        let mut selection = Self::new();
        selection.set(values);
        selection
    }

    pub fn set(&mut self, values: impl IntoIterator<Item = i64>) {
        self.numbers.clear();
        for value in values {
            if self.is_complete() {
                break;
            }
            if let Some(number) = in_range(value) {
                self.numbers.insert(number);
            }
        }
    }

    /// Adds or removes `value`. Returns false when nothing changed.
    pub fn toggle(&mut self, value: i64) -> bool {
        let Some(number) = in_range(value) else {
            return false;
        };

        if self.numbers.remove(&number) {
            return true;
        }

        if self.is_complete() {
            return false;
        }

        self.numbers.insert(number)
    }

    pub fn clear(&mut self) {
        self.numbers.clear();
    }

    pub fn is_selected(&self, value: u8) -> bool {
        self.numbers.contains(&value)
    }

    pub fn selected(&self) -> Vec<u8> {
        self.numbers.iter().copied().collect()
    }

    pub fn remaining_slots(&self) -> usize {
        LOTTO_SELECTION_SIZE - self.numbers.len()
    }

    pub fn is_complete(&self) -> bool {
        self.numbers.len() >= LOTTO_SELECTION_SIZE
    }

    /// Fills the remaining slots at random.
    pub fn auto_complete(&mut self, rng: &RandomSource) -> Result<()> {
        let completed = rng.complete_selection(&self.selected(), LOTTO_SELECTION_SIZE)?;
        self.numbers = completed.into_iter().collect();
        Ok(())
    }
}

fn in_range(value: i64) -> Option<u8> {
    u8::try_from(value)
        .ok()
        .filter(|n| (LOTTO_MIN_NUMBER..=LOTTO_MAX_NUMBER).contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededEntropy;
    use crate::store::MemoryStore;
    use crate::types::tickets_from_value;

    fn registry(store: Arc<MemoryStore>) -> TicketRegistry {
        TicketRegistry::new(store, "test", RandomSource::new(Arc::new(SeededEntropy::new(3))))
    }

    #[test]
    fn test_normalize_rejects_short_selection() {
        let err = normalize_numbers(&[45, 3, 3, 77, -10, 6, 12]).unwrap_err();
        assert!(matches!(
            err,
            LotteryError::InvalidSelection {
                expected: 6,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let numbers = normalize_numbers(&[40, 2, 2, 17, 9, 33, 1]).unwrap();
        assert_eq!(numbers, vec![1, 2, 9, 17, 33, 40]);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Ada  ").unwrap(), "Ada");
        assert!(sanitize_name("   ").is_err());
        assert!(sanitize_name(&"x".repeat(41)).is_err());
        assert!(sanitize_name(&"가".repeat(40)).is_ok());
    }

    #[tokio::test]
    async fn test_issue_writes_record() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());

        let id = registry
            .issue(
                IssueTicketRequest::new(" Ada ", [30, 4, 22, 8, 15, 42])
                    .with_client_id("client-1")
                    .with_metadata("table", Value::from(3)),
            )
            .await
            .unwrap();

        let tickets = tickets_from_value(store.get("/sessions/test/tickets").await.unwrap().as_ref());
        let ticket = &tickets[&id];
        assert_eq!(ticket.name, "Ada");
        assert_eq!(ticket.numbers, vec![4, 8, 15, 22, 30, 42]);
        assert!(ticket.matched_numbers.is_empty());
        assert_eq!(ticket.source, Some(TicketSource::Manual));
        assert!(ticket.created_at.is_some());

        let metadata = ticket.metadata.as_ref().unwrap();
        assert_eq!(metadata["clientId"], Value::from("client-1"));
        assert_eq!(metadata["table"], Value::from(3));
    }

    #[tokio::test]
    async fn test_invalid_ticket_never_reaches_store() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        store.fail_next_write("should not be consumed");

        let err = registry
            .issue(IssueTicketRequest::new("Ada", [45, 3, 3, 77, -10, 6, 12]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = registry
            .issue(IssueTicketRequest::new("", [1, 2, 3, 4, 5, 6]))
            .await
            .unwrap_err();
        assert!(matches!(err, LotteryError::InvalidName(_)));

        // the injected failure is still pending, so no write was attempted
        assert!(store.set("/probe", Value::from(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_issue_appends() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());

        let first = registry
            .issue(IssueTicketRequest::new("A", [1, 2, 3, 4, 5, 6]))
            .await
            .unwrap();
        let second = registry
            .issue(IssueTicketRequest::new("A", [1, 2, 3, 4, 5, 6]))
            .await
            .unwrap();

        assert_ne!(first, second);
        let tickets = tickets_from_value(store.get("/sessions/test/tickets").await.unwrap().as_ref());
        assert_eq!(tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_issue_auto_keeps_partial() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());

        let id = registry.issue_auto("Bot", &[7, 11], Some("c")).await.unwrap();
        let tickets = tickets_from_value(store.get("/sessions/test/tickets").await.unwrap().as_ref());
        let ticket = &tickets[&id];

        assert_eq!(ticket.source, Some(TicketSource::Auto));
        assert_eq!(ticket.numbers.len(), 6);
        assert!(ticket.numbers.contains(&7) && ticket.numbers.contains(&11));
    }

    #[test]
    fn test_selection_toggle_caps_at_six() {
        let mut selection = TicketSelection::new();
        for n in 1..=6 {
            assert!(selection.toggle(n));
        }
        assert!(selection.is_complete());
        assert!(!selection.toggle(7));
        assert!(!selection.toggle(99));

        assert!(selection.toggle(3));
        assert_eq!(selection.remaining_slots(), 1);
        assert!(!selection.is_selected(3));
    }

    #[test]
    fn test_selection_from_values_clamps() {
        let selection = TicketSelection::from_values([0, 5, 5, 46, 1, 2, 3, 4, 6, 7]);
        assert_eq!(selection.selected(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_selection_auto_complete() {
        let rng = RandomSource::new(Arc::new(SeededEntropy::new(11)));
        let mut selection = TicketSelection::from_values([10, 20]);
        selection.auto_complete(&rng).unwrap();

        assert!(selection.is_complete());
        assert!(selection.is_selected(10) && selection.is_selected(20));
    }
}
