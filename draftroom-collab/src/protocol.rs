//! Records exchanged with the realtime service.
//!
//! The realtime service defines the wire format; to this crate every
//! payload is a JSON-like record. Two record families flow on a document
//! channel:
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────────────┐
//! │ presence       │ {user_id, user_name, cursor_position}        │
//! │                │ tracked per connection, delivered as a full  │
//! │                │ key → [payload, …] snapshot on every sync    │
//! ├────────────────┼──────────────────────────────────────────────┤
//! │ row change     │ {event, table, record} for the documents row │
//! │                │ the channel is filtered on                   │
//! └────────────────┴──────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use draftroom_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CollabError;

/// Table name of document rows.
pub const DOCUMENTS_TABLE: &str = "documents";

/// Full presence snapshot: connection key → payloads tracked under it.
pub type PresenceState = BTreeMap<String, Vec<Value>>;

/// What the local client publishes with `track`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: Uuid,
    pub user_name: String,
    pub cursor_position: usize,
}

impl PresencePayload {
    pub fn new(user_id: Uuid, user_name: impl Into<String>, cursor_position: usize) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            cursor_position,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "user_id": self.user_id,
            "user_name": self.user_name,
            "cursor_position": self.cursor_position,
        })
    }

    /// Parse one tracked record. Extra keys added by the service are ignored.
    pub fn from_value(value: &Value) -> Result<Self, CollabError> {
        Self::deserialize(value)
            .map_err(|e| CollabError::desync(format!("presence payload: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowEvent {
    Insert,
    Update,
    Delete,
}

/// A row-change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub event: RowEvent,
    pub table: String,
    /// New row for inserts/updates, old key columns for deletes.
    pub record: Value,
}

impl RowChange {
    pub fn upsert(event: RowEvent, doc: &Document) -> Self {
        Self {
            event,
            table: DOCUMENTS_TABLE.to_string(),
            record: serde_json::to_value(doc).unwrap_or(Value::Null),
        }
    }

    pub fn deleted(id: Uuid) -> Self {
        Self {
            event: RowEvent::Delete,
            table: DOCUMENTS_TABLE.to_string(),
            record: serde_json::json!({ "id": id }),
        }
    }

    /// Primary key of the affected row, if the record carries one.
    pub fn record_id(&self) -> Option<Uuid> {
        self.record
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn document(&self) -> Result<Document, CollabError> {
        Document::deserialize(&self.record)
            .map_err(|e| CollabError::desync(format!("document record: {e}")))
    }
}

/// Subscription lifecycle as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    TimedOut,
    ChannelError(String),
}

/// Everything a subscribed channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    RowChange(RowChange),
    PresenceSync(PresenceState),
    Status(ChannelStatus),
}
