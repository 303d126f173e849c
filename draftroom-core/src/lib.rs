//! # draftroom-core - data model for collaborative email drafts
//!
//! A [`Document`] is one email draft: addressing, subject, body and the
//! structured body delta a rich editor works against. Rows are owned by
//! the external row store; this crate only describes their shape and the
//! partial updates ([`DocumentPatch`]) the session layer sends back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod history;
pub mod patch;

pub use history::{ChangeKind, DocumentChange};
pub use patch::DocumentPatch;

/// Title given to drafts created without one.
pub const UNTITLED: &str = "Untitled Email";

/// A row of the `documents` table.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub to_email: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub subject: String,
    /// Plain body text.
    #[serde(default)]
    pub content: String,
    /// Editor delta for the body (opaque to this crate).
    #[serde(default)]
    pub content_delta: Option<Value>,
    pub created_by: Uuid,
    /// Users the owner shared the draft with.
    #[serde(default)]
    pub collaborators: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Materialize an insert payload into a full row.
    pub fn from_new(new: NewDocument, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: new.title,
            to_email: new.to_email,
            from_email: new.from_email,
            subject: new.subject,
            content: new.content,
            content_delta: None,
            created_by: new.created_by,
            collaborators: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `user` may read and edit this draft.
    pub fn is_accessible_by(&self, user: Uuid) -> bool {
        self.created_by == user || self.collaborators.contains(&user)
    }
}

/// Insert payload for a new draft.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NewDocument {
    pub title: String,
    pub to_email: String,
    pub from_email: String,
    pub subject: String,
    pub content: String,
    pub created_by: Uuid,
}

impl NewDocument {
    /// A blank draft sent from `email`, owned by `owner`.
    pub fn untitled(owner: Uuid, email: impl Into<String>) -> Self {
        Self {
            title: UNTITLED.to_string(),
            to_email: String::new(),
            from_email: email.into(),
            subject: String::new(),
            content: String::new(),
            created_by: owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untitled_defaults() {
        let owner = Uuid::new_v4();
        let new = NewDocument::untitled(owner, "alice@example.com");
        assert_eq!(new.title, UNTITLED);
        assert_eq!(new.from_email, "alice@example.com");
        assert!(new.to_email.is_empty());
        assert!(new.subject.is_empty());
    }

    #[test]
    fn test_from_new_stamps_timestamps() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let doc = Document::from_new(NewDocument::untitled(owner, "a@b.c"), now);
        assert_eq!(doc.created_by, owner);
        assert_eq!(doc.created_at, now);
        assert_eq!(doc.updated_at, now);
        assert!(doc.collaborators.is_empty());
        assert!(doc.content_delta.is_none());
    }

    #[test]
    fn test_access_owner_and_collaborator() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut doc = Document::from_new(NewDocument::untitled(owner, "a@b.c"), Utc::now());
        doc.collaborators.push(friend);

        assert!(doc.is_accessible_by(owner));
        assert!(doc.is_accessible_by(friend));
        assert!(!doc.is_accessible_by(stranger));
    }

    #[test]
    fn test_row_json_missing_optional_columns() {
        // Rows written before the delta/collaborator columns existed.
        let id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let row = serde_json::json!({
            "id": id,
            "title": "Quarterly update",
            "created_by": owner,
            "created_at": "2026-01-02T03:04:05Z",
            "updated_at": "2026-01-02T03:04:05Z",
        });
        let doc: Document = serde_json::from_value(row).unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.title, "Quarterly update");
        assert!(doc.content.is_empty());
        assert!(doc.collaborators.is_empty());
    }
}
