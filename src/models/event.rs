use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of row change carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Event selector used when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventKind {
    #[default]
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl EventKind {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::All, _)
                | (Self::Insert, ChangeKind::Insert)
                | (Self::Update, ChangeKind::Update)
                | (Self::Delete, ChangeKind::Delete)
        )
    }
}

/// Which change events a listener wants from a feed.
///
/// `None` for schema or table matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl EventFilter {
    /// Every change event the feed delivers
    pub fn all() -> Self {
        Self::default()
    }

    /// Every change event for one table
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.event.matches(event.kind)
            && self.schema.as_deref().map_or(true, |s| s == event.schema)
            && self.table.as_deref().map_or(true, |t| t == event.table)
    }
}

/// A single row change delivered by a change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Logical feed name the event arrived on
    pub channel: String,
    /// Insert, update or delete
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// Commit time reported by the backend, if any
    pub commit_timestamp: Option<DateTime<Utc>>,
    /// New row image (null for deletes)
    #[serde(default)]
    pub record: Value,
    /// Previous row image (null for inserts, primary key only unless replica identity is full)
    #[serde(default)]
    pub old_record: Value,
}

impl ChangeEvent {
    pub fn new(channel: impl Into<String>, kind: ChangeKind, table: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            kind,
            schema: "public".to_string(),
            table: table.into(),
            commit_timestamp: None,
            record: Value::Null,
            old_record: Value::Null,
        }
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = record;
        self
    }

    pub fn with_old_record(mut self, old_record: Value) -> Self {
        self.old_record = old_record;
        self
    }
}
