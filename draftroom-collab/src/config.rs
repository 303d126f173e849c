//! Session configuration.
//!
//! Loaded from TOML; every key is optional and falls back to the
//! defaults below.
//!
//! ```toml
//! debounce_ms = 400
//! subscribe_timeout_ms = 5000
//! topic_prefix = "document"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Content flush debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Upper bound on waiting for a subscription acknowledgment.
    pub subscribe_timeout_ms: u64,
    /// Broadcast buffer per room (in-process hub).
    pub channel_capacity: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
    /// Number of audit rows returned by `recent_changes`.
    pub history_limit: usize,
    /// Channel topics are `"{topic_prefix}:{document_id}"`.
    pub topic_prefix: String,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            subscribe_timeout_ms: 10_000,
            channel_capacity: 256,
            event_capacity: 256,
            history_limit: 10,
            topic_prefix: "document".to_string(),
        }
    }
}

impl CollabConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Realtime topic for a document.
    pub fn topic_for(&self, document_id: Uuid) -> String {
        format!("{}:{}", self.topic_prefix, document_id)
    }
}
