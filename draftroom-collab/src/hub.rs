//! In-process realtime service.
//!
//! Each topic gets a room with one tokio broadcast channel and a presence
//! map keyed by connection. Every presence mutation fans the full snapshot
//! out to all subscribers, mirroring the hosted service's "sync" event.
//!
//! ```text
//! LocalChannel (conn A) ──┐
//!                         ├── Room "document:<id>" ── broadcast::Sender
//! LocalChannel (conn B) ──┘         │
//!                                   ├── presence: conn → payload
//!        MemoryStore ── publish_row_change() ──┘
//! ```
//!
//! Used by tests, benches and the demo binary in place of the hosted
//! service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::channel::{RealtimeChannel, RealtimeService};
use crate::config::CollabConfig;
use crate::error::CollabError;
use crate::protocol::{ChannelEvent, PresencePayload, PresenceState, RowChange};

/// Counters for monitoring fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub messages_sent: u64,
    pub active_rooms: usize,
    pub active_subscribers: usize,
}

struct Room {
    sender: broadcast::Sender<ChannelEvent>,
    subscribers: HashSet<String>,
    presence: HashMap<String, Value>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribers: HashSet::new(),
            presence: HashMap::new(),
        }
    }

    fn presence_state(&self) -> PresenceState {
        self.presence
            .iter()
            .map(|(key, payload)| (key.clone(), vec![payload.clone()]))
            .collect()
    }
}

struct HubInner {
    rooms: RwLock<HashMap<String, Room>>,
    capacity: usize,
    topic_prefix: String,
    offline: AtomicBool,
    messages_sent: AtomicU64,
}

impl HubInner {
    fn send(&self, room: &Room, event: ChannelEvent) -> usize {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        room.sender.send(event).unwrap_or(0)
    }

    fn broadcast_sync(&self, room: &Room) -> usize {
        self.send(room, ChannelEvent::PresenceSync(room.presence_state()))
    }

    fn check_online(&self) -> Result<(), CollabError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollabError::transient("realtime service unreachable"));
        }
        Ok(())
    }
}

/// Shared handle to the in-process hub. Clones share rooms.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new(config: &CollabConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: RwLock::new(HashMap::new()),
                capacity: config.channel_capacity.max(1),
                topic_prefix: config.topic_prefix.clone(),
                offline: AtomicBool::new(false),
                messages_sent: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the service being unreachable: subscribe and track fail.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Deliver a row change to the channel filtered on `document_id`.
    /// Returns the number of receivers reached.
    pub async fn publish_row_change(&self, document_id: Uuid, change: RowChange) -> usize {
        let topic = format!("{}:{}", self.inner.topic_prefix, document_id);
        let rooms = self.inner.rooms.read().await;
        match rooms.get(&topic) {
            Some(room) => self.inner.send(room, ChannelEvent::RowChange(change)),
            None => 0,
        }
    }

    /// Send a raw presence snapshot to a topic, bypassing `track`.
    pub async fn inject_presence_sync(&self, topic: &str, state: PresenceState) -> usize {
        let rooms = self.inner.rooms.read().await;
        match rooms.get(topic) {
            Some(room) => self.inner.send(room, ChannelEvent::PresenceSync(state)),
            None => 0,
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(topic)
            .map_or(0, |room| room.subscribers.len())
    }

    pub async fn room_count(&self) -> usize {
        self.inner.rooms.read().await.len()
    }

    pub async fn active_topics(&self) -> Vec<String> {
        self.inner.rooms.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> HubStats {
        let rooms = self.inner.rooms.read().await;
        HubStats {
            messages_sent: self.inner.messages_sent.load(Ordering::Relaxed),
            active_rooms: rooms.len(),
            active_subscribers: rooms.values().map(|r| r.subscribers.len()).sum(),
        }
    }
}

impl RealtimeService for LocalHub {
    type Channel = LocalChannel;

    fn channel(&self, topic: &str) -> LocalChannel {
        LocalChannel {
            topic: topic.to_string(),
            key: Uuid::new_v4().to_string(),
            inner: self.inner.clone(),
        }
    }
}

/// One connection to a hub topic.
pub struct LocalChannel {
    topic: String,
    /// Presence key of this connection.
    key: String,
    inner: Arc<HubInner>,
}

impl LocalChannel {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl RealtimeChannel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<ChannelEvent>, CollabError> {
        self.inner.check_online()?;

        let mut rooms = self.inner.rooms.write().await;
        let room = rooms
            .entry(self.topic.clone())
            .or_insert_with(|| Room::new(self.inner.capacity));
        room.subscribers.insert(self.key.clone());
        let rx = room.sender.subscribe();
        self.inner.broadcast_sync(room);

        log::debug!("{} joined {} ({} subscribers)", self.key, self.topic, room.subscribers.len());
        Ok(rx)
    }

    async fn track(&self, payload: &PresencePayload) -> Result<(), CollabError> {
        self.inner.check_online()?;

        let mut rooms = self.inner.rooms.write().await;
        let room = rooms
            .get_mut(&self.topic)
            .filter(|room| room.subscribers.contains(&self.key))
            .ok_or_else(|| CollabError::transient(format!("not subscribed to {}", self.topic)))?;
        room.presence.insert(self.key.clone(), payload.to_value());
        self.inner.broadcast_sync(room);
        Ok(())
    }

    async fn presence_state(&self) -> PresenceState {
        self.inner
            .rooms
            .read()
            .await
            .get(&self.topic)
            .map(Room::presence_state)
            .unwrap_or_default()
    }

    async fn unsubscribe(&self) -> Result<(), CollabError> {
        let mut rooms = self.inner.rooms.write().await;
        let Some(room) = rooms.get_mut(&self.topic) else {
            return Ok(());
        };

        let was_member = room.subscribers.remove(&self.key);
        let had_presence = room.presence.remove(&self.key).is_some();
        if room.subscribers.is_empty() {
            rooms.remove(&self.topic);
        } else if had_presence {
            self.inner.broadcast_sync(room);
        }

        if was_member {
            log::debug!("{} left {}", self.key, self.topic);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn hub() -> LocalHub {
        LocalHub::new(&CollabConfig::default())
    }

    fn last_sync(rx: &mut broadcast::Receiver<ChannelEvent>) -> Option<PresenceState> {
        let mut last = None;
        loop {
            match rx.try_recv() {
                Ok(ChannelEvent::PresenceSync(state)) => last = Some(state),
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return last,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    #[tokio::test]
    async fn test_subscribe_creates_room() {
        let hub = hub();
        let channel = hub.channel("document:1");
        let _rx = channel.subscribe().await.unwrap();

        assert_eq!(hub.room_count().await, 1);
        assert_eq!(hub.subscriber_count("document:1").await, 1);
        assert_eq!(channel.topic(), "document:1");
    }

    #[tokio::test]
    async fn test_track_fans_out_full_state() {
        let hub = hub();
        let a = hub.channel("t");
        let b = hub.channel("t");
        let mut rx_a = a.subscribe().await.unwrap();
        let _rx_b = b.subscribe().await.unwrap();

        let alice = PresencePayload::new(Uuid::new_v4(), "Alice", 0);
        let bob = PresencePayload::new(Uuid::new_v4(), "Bob", 0);
        a.track(&alice).await.unwrap();
        b.track(&bob).await.unwrap();

        let state = last_sync(&mut rx_a).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state[b.key()], vec![bob.to_value()]);
    }

    #[tokio::test]
    async fn test_track_replaces_own_payload() {
        let hub = hub();
        let a = hub.channel("t");
        let _rx = a.subscribe().await.unwrap();
        let id = Uuid::new_v4();

        a.track(&PresencePayload::new(id, "Alice", 0)).await.unwrap();
        a.track(&PresencePayload::new(id, "Alice", 42)).await.unwrap();

        let state = a.presence_state().await;
        assert_eq!(state.len(), 1);
        assert_eq!(state[a.key()][0]["cursor_position"], 42);
    }

    #[tokio::test]
    async fn test_track_requires_subscription() {
        let hub = hub();
        let a = hub.channel("t");
        let err = a
            .track(&PresencePayload::new(Uuid::new_v4(), "A", 0))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_presence_and_room() {
        let hub = hub();
        let a = hub.channel("t");
        let b = hub.channel("t");
        let _rx_a = a.subscribe().await.unwrap();
        let mut rx_b = b.subscribe().await.unwrap();
        a.track(&PresencePayload::new(Uuid::new_v4(), "A", 0)).await.unwrap();

        a.unsubscribe().await.unwrap();
        assert_eq!(hub.subscriber_count("t").await, 1);
        assert!(last_sync(&mut rx_b).unwrap().is_empty());

        b.unsubscribe().await.unwrap();
        assert_eq!(hub.room_count().await, 0);

        // Idempotent.
        b.unsubscribe().await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_rejects_subscribe() {
        let hub = hub();
        hub.set_offline(true);
        let err = hub.channel("t").subscribe().await.unwrap_err();
        assert!(matches!(err, CollabError::TransientNetwork(_)));

        hub.set_offline(false);
        assert!(hub.channel("t").subscribe().await.is_ok());
    }

    #[tokio::test]
    async fn test_row_change_routed_by_document() {
        let hub = hub();
        let doc = Uuid::new_v4();
        let other = Uuid::new_v4();
        let channel = hub.channel(&format!("document:{doc}"));
        let mut rx = channel.subscribe().await.unwrap();
        let _ = last_sync(&mut rx);

        assert_eq!(hub.publish_row_change(other, RowChange::deleted(other)).await, 0);
        assert_eq!(hub.publish_row_change(doc, RowChange::deleted(doc)).await, 1);

        match rx.try_recv().unwrap() {
            ChannelEvent::RowChange(change) => assert_eq!(change.record_id(), Some(doc)),
            other => panic!("Expected RowChange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = hub();
        let a = hub.channel("t");
        let _rx = a.subscribe().await.unwrap();
        a.track(&PresencePayload::new(Uuid::new_v4(), "A", 0)).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.active_rooms, 1);
        assert_eq!(stats.active_subscribers, 1);
        assert_eq!(stats.messages_sent, 2);
    }
}
