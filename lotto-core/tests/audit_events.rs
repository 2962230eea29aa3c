use lotto_core::{LottoSession, MemoryStore, SessionConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

type Fields = BTreeMap<String, String>;

#[derive(Clone, Default)]
struct Captured {
    events: Arc<Mutex<Vec<Fields>>>,
}

impl Captured {
    fn named(&self, name: &str) -> Vec<Fields> {
        self.events
            .lock()
            .iter()
            .filter(|fields| fields.get("event").map(String::as_str) == Some(name))
            .cloned()
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|fields| fields.get("event").cloned())
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor(Fields);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for Captured {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(visitor.0);
    }
}

fn capture() -> (Captured, tracing::subscriber::DefaultGuard) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::registry().with(captured.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (captured, guard)
}

#[tokio::test]
async fn test_issue_emits_start_and_success() {
    let (captured, _guard) = capture();
    let session = LottoSession::new(Arc::new(MemoryStore::new()), SessionConfig::new("audit")).unwrap();

    let id = session.issue_ticket("Ada", &[1, 2, 3, 4, 5, 6]).await.unwrap();

    let started = captured.named("issue:start");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["session"], "audit");
    assert_eq!(started[0]["source"], "manual");

    let succeeded = captured.named("issue:success");
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0]["ticket_id"], id);
}

#[tokio::test]
async fn test_rejected_ticket_emits_error_only() {
    let (captured, _guard) = capture();
    let session = LottoSession::new(Arc::new(MemoryStore::new()), SessionConfig::new("audit")).unwrap();

    assert!(session.issue_ticket("Ada", &[1, 2, 3]).await.is_err());

    assert!(captured.named("issue:start").is_empty());
    let errors = captured.named("issue:error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["stage"], "validate");
}

#[tokio::test]
async fn test_draw_lifecycle_events_in_order() {
    let (captured, _guard) = capture();
    let store = Arc::new(MemoryStore::new());
    let session = LottoSession::new(store, SessionConfig::new("audit").with_client_id("host")).unwrap();

    session.issue_ticket("Ada", &[1, 2, 3, 4, 5, 6]).await.unwrap();
    session.start_draw().await.unwrap();
    for _ in 0..6 {
        session.step_draw().await.unwrap();
    }
    assert!(session.step_draw().await.is_err());
    session.reset().await.unwrap();

    let draw_events: Vec<String> = captured
        .names()
        .into_iter()
        .filter(|name| name.starts_with("draw:") || name.starts_with("reset:"))
        .collect();

    let mut expected = vec!["draw:start".to_string()];
    expected.extend(std::iter::repeat("draw:step".to_string()).take(6));
    expected.push("draw:complete".to_string());
    expected.push("draw:error".to_string());
    expected.push("reset:start".to_string());
    expected.push("reset:success".to_string());
    assert_eq!(draw_events, expected);

    let steps = captured.named("draw:step");
    assert_eq!(steps[5]["step_index"], "6");
    assert!(steps.iter().all(|fields| fields["session"] == "audit"));
    assert_eq!(captured.named("draw:start")[0]["client_id"], "host");
}

#[tokio::test]
async fn test_feeds_emit_subscribe_and_update() {
    let (captured, _guard) = capture();
    let store = Arc::new(MemoryStore::new());
    let session = LottoSession::new(store, SessionConfig::new("audit")).unwrap();

    let mut feed = session.ticket_feed().await.unwrap();
    feed.next().await.unwrap().unwrap();
    session.issue_ticket("Ada", &[1, 2, 3, 4, 5, 6]).await.unwrap();
    let update = feed.next().await.unwrap().unwrap();
    assert_eq!(update.diff.added.len(), 1);

    assert_eq!(captured.named("list:subscribe").len(), 1);
    let updates = captured.named("list:update");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1]["total"], "1");
    assert_eq!(updates[1]["added"], "1");
}

#[tokio::test]
async fn test_reconciliation_emits_highlight() {
    let (captured, _guard) = capture();
    let store = Arc::new(MemoryStore::new());
    let session = LottoSession::new(store, SessionConfig::new("audit")).unwrap();

    session.issue_ticket("Ada", &[1, 2, 3, 4, 5, 6]).await.unwrap();
    let tickets = session.tickets_snapshot().await.unwrap();
    session.reconciler().reconcile(&tickets, &[2, 40]).await.unwrap();

    let highlights = captured.named("draw:highlight");
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0]["tickets_updated"], "1");
}
