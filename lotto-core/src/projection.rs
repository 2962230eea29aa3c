//! Read-side views of a session: ordered ticket boards, board diffs and the
//! live feeds that turn store notifications into them.

use crate::error::{LotteryError, Result};
use crate::store::{Notification, Subscription};
use crate::types::{
    tickets_from_value, DrawState, TicketBoardDiff, TicketBoardEntry, TicketBoardUpdate,
    TicketRecord, TicketsMap, FALLBACK_NAME,
};
use serde_json::Value;
use std::cmp::Ordering;

fn display_name(ticket: &TicketRecord) -> &str {
    let trimmed = ticket.name.trim();
    if trimmed.is_empty() {
        FALLBACK_NAME
    } else {
        trimmed
    }
}

/// Case-insensitive, so "alice" sorts before "Bob". Exact bytes only break ties.
fn name_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Newest first; undated tickets last; then name, then id.
fn board_order(a: &TicketBoardEntry, b: &TicketBoardEntry) -> Ordering {
    let by_time = match (&a.ticket.created_at, &b.ticket.created_at) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_time
        .then_with(|| name_order(&a.ticket.name, &b.ticket.name))
        .then_with(|| a.id.cmp(&b.id))
}

fn entry(id: &str, ticket: &TicketRecord) -> TicketBoardEntry {
    let mut ticket = ticket.clone();
    ticket.name = display_name(&ticket).to_string();
    TicketBoardEntry {
        id: id.to_string(),
        ticket,
    }
}

fn sorted(mut entries: Vec<TicketBoardEntry>) -> Vec<TicketBoardEntry> {
    entries.sort_by(board_order);
    entries
}

pub fn project_tickets(tickets: &TicketsMap) -> Vec<TicketBoardEntry> {
    sorted(tickets.iter().map(|(id, ticket)| entry(id, ticket)).collect())
}

/// Key-order independent JSON text.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| format!("{}:{}", Value::String(key.clone()), canonical_json(&map[key])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

fn same_ticket(a: &TicketRecord, b: &TicketRecord) -> bool {
    let metadata = |ticket: &TicketRecord| {
        ticket
            .metadata
            .as_ref()
            .map(|m| canonical_json(&Value::Object(m.clone())))
    };

    a.name == b.name
        && a.created_at == b.created_at
        && a.source == b.source
        && a.numbers == b.numbers
        && a.matched_numbers == b.matched_numbers
        && metadata(a) == metadata(b)
}

pub fn diff_ticket_maps(previous: &TicketsMap, next: &TicketsMap) -> TicketBoardDiff {
    let mut added = Vec::new();
    let mut updated = Vec::new();

    for (id, ticket) in next {
        match previous.get(id) {
            None => added.push(entry(id, ticket)),
            Some(before) if !same_ticket(before, ticket) => updated.push(entry(id, ticket)),
            Some(_) => {}
        }
    }

    let removed = previous
        .keys()
        .filter(|id| !next.contains_key(*id))
        .cloned()
        .collect();

    TicketBoardDiff {
        added: sorted(added),
        updated: sorted(updated),
        removed,
    }
}

/// Remembers the last ticket map so each snapshot can be reported as a diff.
#[derive(Debug, Default)]
pub struct TicketBoard {
    previous: TicketsMap,
}

impl TicketBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, next: TicketsMap) -> TicketBoardUpdate {
        let diff = diff_ticket_maps(&self.previous, &next);
        let tickets = project_tickets(&next);
        self.previous = next;

        TicketBoardUpdate {
            total: tickets.len(),
            tickets,
            diff,
        }
    }

    pub fn latest(&self) -> &TicketsMap {
        &self.previous
    }
}

/// Live ticket board of one session.
///
/// A transport error is handed to the caller as `Err`, but the subscription
/// stays registered and the next snapshot recovers the feed.
#[derive(Debug)]
pub struct TicketFeed {
    session_key: String,
    subscription: Subscription,
    board: TicketBoard,
}

impl TicketFeed {
    pub fn new(session_key: impl Into<String>, subscription: Subscription) -> Self {
        let session_key = session_key.into();
        tracing::info!(
            event = "list:subscribe",
            session = %session_key,
            path = subscription.path(),
            "Subscribed to tickets"
        );

        Self {
            session_key,
            subscription,
            board: TicketBoard::new(),
        }
    }

    /// `None` once the store has gone away.
    pub async fn next(&mut self) -> Option<Result<TicketBoardUpdate>> {
        let notification = self.subscription.next().await?;
        Some(self.handle(notification))
    }

    pub fn latest(&self) -> &TicketsMap {
        self.board.latest()
    }

    fn handle(&mut self, notification: Notification) -> Result<TicketBoardUpdate> {
        match notification {
            Notification::Snapshot(raw) => {
                let update = self.board.apply(tickets_from_value(raw.as_ref()));
                tracing::info!(
                    event = "list:update",
                    session = %self.session_key,
                    total = update.total,
                    added = update.diff.added.len(),
                    updated = update.diff.updated.len(),
                    removed = update.diff.removed.len(),
                    "Ticket board updated"
                );
                Ok(update)
            }
            Notification::Error(message) => {
                tracing::error!(
                    event = "list:error",
                    session = %self.session_key,
                    error = %message,
                    "Ticket subscription failed"
                );
                Err(LotteryError::transport(message))
            }
        }
    }
}

/// Live draw document of one session. Errors behave as in [`TicketFeed`].
#[derive(Debug)]
pub struct DrawFeed {
    session_key: String,
    subscription: Subscription,
}

impl DrawFeed {
    pub fn new(session_key: impl Into<String>, subscription: Subscription) -> Self {
        let session_key = session_key.into();
        tracing::info!(
            event = "draw:subscribe",
            session = %session_key,
            path = subscription.path(),
            "Subscribed to draw"
        );

        Self {
            session_key,
            subscription,
        }
    }

    pub async fn next(&mut self) -> Option<Result<DrawState>> {
        match self.subscription.next().await? {
            Notification::Snapshot(raw) => {
                let state = DrawState::from_value(raw.as_ref());
                tracing::debug!(
                    event = "draw:update",
                    session = %self.session_key,
                    status = %state.status,
                    numbers = ?state.numbers,
                    "Draw state updated"
                );
                Some(Ok(state))
            }
            Notification::Error(message) => {
                tracing::error!(
                    event = "draw:error",
                    session = %self.session_key,
                    stage = "subscribe",
                    error = %message,
                    "Draw subscription failed"
                );
                Some(Err(LotteryError::transport(message)))
            }
        }
    }
}

/// What a client screen shows: latest snapshots, loading flags and banners.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub tickets: TicketsMap,
    pub board: Vec<TicketBoardEntry>,
    pub draw: DrawState,
    pub tickets_loading: bool,
    pub draw_loading: bool,
    pub tickets_error: Option<String>,
    pub draw_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tickets: TicketsMap::new(),
            board: Vec::new(),
            draw: DrawState::default(),
            tickets_loading: true,
            draw_loading: true,
            tickets_error: None,
            draw_error: None,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a ticket feed item in. `latest` is the feed's current map.
    pub fn apply_tickets(&mut self, update: Result<TicketBoardUpdate>, latest: &TicketsMap) {
        self.tickets_loading = false;
        match update {
            Ok(update) => {
                self.tickets = latest.clone();
                self.board = update.tickets;
                self.tickets_error = None;
            }
            Err(e) => self.tickets_error = Some(e.to_string()),
        }
    }

    pub fn apply_draw(&mut self, update: Result<DrawState>) {
        self.draw_loading = false;
        match update {
            Ok(state) => {
                self.draw = state;
                self.draw_error = None;
            }
            Err(e) => self.draw_error = Some(e.to_string()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.tickets_loading || self.draw_loading
    }
}
