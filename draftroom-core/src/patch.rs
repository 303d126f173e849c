//! Partial document updates.
//!
//! A patch names only the fields an edit touched. Patches coalesce
//! field-wise (newer value wins), which is what lets a debounced writer
//! flush a single accumulated patch instead of every keystroke.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Document;

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DocumentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_delta: Option<Value>,
}

impl DocumentPatch {
    pub fn title(value: impl Into<String>) -> Self {
        Self {
            title: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn to_email(value: impl Into<String>) -> Self {
        Self {
            to_email: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn subject(value: impl Into<String>) -> Self {
        Self {
            subject: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn content(value: impl Into<String>) -> Self {
        Self {
            content: Some(value.into()),
            ..Self::default()
        }
    }

    /// Body text together with the editor delta that produced it.
    pub fn body(text: impl Into<String>, delta: Value) -> Self {
        Self {
            content: Some(text.into()),
            content_delta: Some(delta),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Fold a newer patch into this one. Fields set in `newer` win.
    pub fn merge(&mut self, newer: DocumentPatch) {
        if newer.title.is_some() {
            self.title = newer.title;
        }
        if newer.to_email.is_some() {
            self.to_email = newer.to_email;
        }
        if newer.from_email.is_some() {
            self.from_email = newer.from_email;
        }
        if newer.subject.is_some() {
            self.subject = newer.subject;
        }
        if newer.content.is_some() {
            self.content = newer.content;
        }
        if newer.content_delta.is_some() {
            self.content_delta = newer.content_delta;
        }
    }

    /// Overwrite the fields this patch carries on `doc`.
    pub fn apply_to(&self, doc: &mut Document) {
        if let Some(v) = &self.title {
            doc.title = v.clone();
        }
        if let Some(v) = &self.to_email {
            doc.to_email = v.clone();
        }
        if let Some(v) = &self.from_email {
            doc.from_email = v.clone();
        }
        if let Some(v) = &self.subject {
            doc.subject = v.clone();
        }
        if let Some(v) = &self.content {
            doc.content = v.clone();
        }
        if let Some(v) = &self.content_delta {
            doc.content_delta = Some(v.clone());
        }
    }

    /// Column names set by this patch, in table order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.to_email.is_some() {
            names.push("to_email");
        }
        if self.from_email.is_some() {
            names.push("from_email");
        }
        if self.subject.is_some() {
            names.push("subject");
        }
        if self.content.is_some() {
            names.push("content");
        }
        if self.content_delta.is_some() {
            names.push("content_delta");
        }
        names
    }
}
