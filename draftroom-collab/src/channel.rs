//! Realtime service seam.
//!
//! The hosted realtime service is consumed through these traits. A channel
//! handle is cheap to create; nothing happens on the network until
//! [`RealtimeChannel::subscribe`].

use std::future::Future;

use tokio::sync::broadcast;

use crate::error::CollabError;
use crate::protocol::{ChannelEvent, PresencePayload, PresenceState};

/// Creates per-topic channel handles.
pub trait RealtimeService: Send + Sync + 'static {
    type Channel: RealtimeChannel;

    fn channel(&self, topic: &str) -> Self::Channel;
}

/// One client's connection to one topic.
pub trait RealtimeChannel: Send + Sync + 'static {
    fn topic(&self) -> &str;

    /// Join the topic. Resolves once the service acknowledged the
    /// subscription; the receiver then delivers row changes, presence
    /// syncs and status updates for this topic.
    fn subscribe(
        &self,
    ) -> impl Future<Output = Result<broadcast::Receiver<ChannelEvent>, CollabError>> + Send;

    /// Publish (or replace) this connection's presence payload.
    fn track(
        &self,
        payload: &PresencePayload,
    ) -> impl Future<Output = Result<(), CollabError>> + Send;

    /// Current full presence snapshot for the topic.
    fn presence_state(&self) -> impl Future<Output = PresenceState> + Send;

    /// Leave the topic and drop this connection's presence.
    fn unsubscribe(&self) -> impl Future<Output = Result<(), CollabError>> + Send;
}
