//! Session-level error taxonomy.
//!
//! Every operation that crosses the session boundary returns one of these.
//! None of them is fatal: the worst case is a stale view that reopening
//! the document repairs.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollabError {
    /// Unknown document, or one the caller may not access.
    #[error("document not found or not accessible: {0}")]
    NotFound(Uuid),
    /// No local identity is available (signed out or auth still loading).
    #[error("no authenticated user")]
    Unauthenticated,
    /// Fetch, subscribe, track or write failed; a later attempt may succeed.
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    /// A realtime payload did not have the expected shape.
    #[error("channel desync: {0}")]
    ChannelDesync(String),
    /// A document operation was attempted with no document open.
    #[error("no document is open")]
    NoActiveDocument,
}

impl CollabError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientNetwork(reason.into())
    }

    pub fn desync(reason: impl Into<String>) -> Self {
        Self::ChannelDesync(reason.into())
    }

    /// Whether retrying the same call could succeed. Nothing is retried
    /// automatically; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }
}
