//! Audit rows from the `document_changes` table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Edited { fields: Vec<String> },
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Edited { fields } if fields.is_empty() => write!(f, "edited"),
            Self::Edited { fields } => write!(f, "edited {}", fields.join(", ")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DocumentChange {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub kind: ChangeKind,
    pub created_at: DateTime<Utc>,
}

impl DocumentChange {
    pub fn new(document_id: Uuid, user_id: Uuid, kind: ChangeKind, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            kind,
            created_at: at,
        }
    }
}
