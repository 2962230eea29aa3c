use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const LOTTO_MIN_NUMBER: u8 = 1;
pub const LOTTO_MAX_NUMBER: u8 = 45;
pub const LOTTO_SELECTION_SIZE: usize = 6;
pub const MAX_NAME_LENGTH: usize = 40;

/// Display name used when a stored ticket has a blank name.
pub const FALLBACK_NAME: &str = "Unknown player";

/// ISO-8601 UTC with millisecond precision; sorts lexicographically.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Error,
}

impl DrawStatus {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("in_progress") => DrawStatus::InProgress,
            Some("completed") => DrawStatus::Completed,
            Some("error") => DrawStatus::Error,
            _ => DrawStatus::Idle,
        }
    }
}

impl std::fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DrawStatus::Idle => "idle",
            DrawStatus::InProgress => "in_progress",
            DrawStatus::Completed => "completed",
            DrawStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrawError {
    pub code: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
}

/// Singleton draw document of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawState {
    /// Draw order, not sorted.
    pub numbers: Vec<u8>,
    pub seed: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub status: DrawStatus,
    pub controller_id: Option<String>,
    pub error: Option<DrawError>,
}

impl DrawState {
    /// Normalizes a raw draw document. Missing or malformed documents read as idle.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(record)) = value else {
            return Self::default();
        };

        let error = match record.get("error") {
            Some(Value::Object(raw)) => Some(DrawError {
                code: string_field(raw, "code"),
                message: string_field(raw, "message"),
                timestamp: string_field(raw, "timestamp"),
            }),
            _ => None,
        };

        Self {
            numbers: number_array(record.get("numbers")),
            seed: string_field(record, "seed"),
            started_at: string_field(record, "startedAt"),
            completed_at: string_field(record, "completedAt"),
            status: DrawStatus::parse(record.get("status").and_then(Value::as_str)),
            controller_id: string_field(record, "controllerId"),
            error,
        }
    }

    pub fn to_value(&self) -> Value {
        // Plain structs with string/integer fields always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_full(&self) -> bool {
        self.numbers.len() >= LOTTO_SELECTION_SIZE
    }

    /// True when `client_id` may drive steps: no controller yet, or it is us.
    pub fn is_controlled_by(&self, client_id: &str) -> bool {
        self.controller_id
            .as_deref()
            .map_or(true, |controller| controller == client_id)
    }

    pub fn latest_number(&self) -> Option<u8> {
        self.numbers.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Manual,
    Auto,
}

impl TicketSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketSource::Manual => "manual",
            TicketSource::Auto => "auto",
        }
    }
}

/// A persisted ticket. `matched_numbers` is a denormalized cache of
/// `numbers ∩ drawn`, rewritten only by the match reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    pub name: String,
    pub numbers: Vec<u8>,
    #[serde(default)]
    pub matched_numbers: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<TicketSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TicketRecord {
    /// Lenient read of a stored ticket; non-object payloads are skipped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Object(record) = value else {
            return None;
        };

        let mut numbers = number_array(record.get("numbers"));
        numbers.sort_unstable();
        let mut matched_numbers = number_array(record.get("matchedNumbers"));
        matched_numbers.sort_unstable();

        let source = match record.get("source").and_then(Value::as_str) {
            Some("manual") => Some(TicketSource::Manual),
            Some("auto") => Some(TicketSource::Auto),
            _ => None,
        };

        Some(Self {
            name: string_field(record, "name").unwrap_or_default(),
            numbers,
            matched_numbers,
            created_at: string_field(record, "createdAt"),
            source,
            metadata: match record.get("metadata") {
                Some(Value::Object(metadata)) => Some(metadata.clone()),
                _ => None,
            },
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Keyed ticket collection as delivered by the store. Iteration order carries no meaning.
pub type TicketsMap = BTreeMap<String, TicketRecord>;

pub fn tickets_from_value(value: Option<&Value>) -> TicketsMap {
    let Some(Value::Object(entries)) = value else {
        return TicketsMap::new();
    };

    entries
        .iter()
        .filter_map(|(id, raw)| TicketRecord::from_value(raw).map(|ticket| (id.clone(), ticket)))
        .collect()
}

/// A ticket plus its store id, for display only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketBoardEntry {
    pub id: String,
    pub ticket: TicketRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketBoardDiff {
    pub added: Vec<TicketBoardEntry>,
    pub updated: Vec<TicketBoardEntry>,
    pub removed: Vec<String>,
}

impl TicketBoardDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketBoardUpdate {
    pub tickets: Vec<TicketBoardEntry>,
    pub total: usize,
    pub diff: TicketBoardDiff,
}

fn string_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number_array(value: Option<&Value>) -> Vec<u8> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .filter_map(|n| u8::try_from(n).ok())
        .collect()
}
