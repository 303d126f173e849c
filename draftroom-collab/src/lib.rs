//! # draftroom-collab - Collaboration sessions for shared email drafts
//!
//! Keeps one client connected to one draft's realtime channel: who else is
//! looking at it, what they changed, and a debounced write path for local
//! edits.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!   UI edits ───► │  SessionManager  │ ───► SessionEvent (mpsc)
//!                 │  (per client)    │
//!                 └──┬─────────┬─────┘
//!        Debouncer   │         │  RealtimeChannel
//!      (single slot) │         │  subscribe / track
//!                    ▼         ▼
//!          ┌──────────────┐  ┌──────────────────┐
//!          │ DocumentStore│  │ RealtimeService  │
//!          │ (rows)       │──► (topic fan-out)  │
//!          └──────────────┘  └──────────────────┘
//!           MemoryStore        LocalHub
//! ```
//!
//! Storage and realtime delivery are external services reached through the
//! [`store::DocumentStore`] and [`channel::RealtimeService`] traits.
//! [`memory::MemoryStore`] and [`hub::LocalHub`] implement them in-process.
//!
//! ## Modules
//!
//! - [`session`] - session lifecycle, optimistic edits, remote input
//! - [`presence`] - presence snapshot reduction and collaborator colors
//! - [`debounce`] - single-slot delayed task
//! - [`protocol`] - records carried on a document channel
//! - [`channel`] / [`store`] - external service seams
//! - [`hub`] / [`memory`] - in-process implementations of those seams
//! - [`auth`], [`config`], [`error`]

pub mod auth;
pub mod channel;
pub mod config;
pub mod debounce;
pub mod error;
pub mod hub;
pub mod memory;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use auth::{AuthState, CurrentUser};
pub use channel::{RealtimeChannel, RealtimeService};
pub use config::{CollabConfig, ConfigError};
pub use debounce::{CancelToken, Debouncer};
pub use error::CollabError;
pub use hub::{HubStats, LocalChannel, LocalHub};
pub use memory::MemoryStore;
pub use presence::{reduce_sync, PresenceColor, PresenceEntry, PresenceRoster, PALETTE};
pub use protocol::{
    ChannelEvent, ChannelStatus, PresencePayload, PresenceState, RowChange, RowEvent,
};
pub use session::{SessionEvent, SessionManager};
pub use store::DocumentStore;
