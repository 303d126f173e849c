//! In-process row store.
//!
//! Holds `documents` and `document_changes` in memory, enforces
//! owner/collaborator access, and forwards every write to an attached
//! [`LocalHub`] as a row-change notification, the way the hosted database
//! feeds its realtime service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use draftroom_core::{ChangeKind, Document, DocumentChange, DocumentPatch, NewDocument};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CollabError;
use crate::hub::LocalHub;
use crate::protocol::{RowChange, RowEvent};
use crate::store::DocumentStore;

#[derive(Default)]
struct Tables {
    documents: HashMap<Uuid, Document>,
    changes: Vec<DocumentChange>,
    /// Every applied update, in order.
    writes: Vec<(Uuid, DocumentPatch)>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    feed: Option<LocalHub>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes are announced on `hub`.
    pub fn with_feed(hub: LocalHub) -> Self {
        Self {
            feed: Some(hub),
            ..Self::default()
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Simulate the database being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Grant `user` access to a draft owned by `owner`.
    pub async fn share(&self, id: Uuid, owner: Uuid, user: Uuid) -> Result<(), CollabError> {
        self.check_online()?;
        let mut tables = self.tables.write().await;
        let doc = tables
            .documents
            .get_mut(&id)
            .filter(|d| d.created_by == owner)
            .ok_or(CollabError::NotFound(id))?;
        if !doc.collaborators.contains(&user) {
            doc.collaborators.push(user);
        }
        Ok(())
    }

    /// Updates applied so far, oldest first.
    pub async fn writes(&self) -> Vec<(Uuid, DocumentPatch)> {
        self.tables.read().await.writes.clone()
    }

    pub async fn write_count(&self) -> usize {
        self.tables.read().await.writes.len()
    }

    fn check_online(&self) -> Result<(), CollabError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollabError::transient("database unreachable"));
        }
        Ok(())
    }

    async fn announce(&self, id: Uuid, change: RowChange) {
        if let Some(hub) = &self.feed {
            hub.publish_row_change(id, change).await;
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn list(&self, user: Uuid) -> Result<Vec<Document>, CollabError> {
        self.check_online()?;
        let tables = self.tables.read().await;
        let mut docs: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| d.is_accessible_by(user))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    async fn select(&self, id: Uuid, user: Uuid) -> Result<Document, CollabError> {
        self.check_online()?;
        self.tables
            .read()
            .await
            .documents
            .get(&id)
            .filter(|d| d.is_accessible_by(user))
            .cloned()
            .ok_or(CollabError::NotFound(id))
    }

    async fn insert(&self, new: NewDocument) -> Result<Document, CollabError> {
        self.check_online()?;
        let now = Utc::now();
        let doc = Document::from_new(new, now);
        {
            let mut tables = self.tables.write().await;
            tables
                .changes
                .push(DocumentChange::new(doc.id, doc.created_by, ChangeKind::Created, now));
            tables.documents.insert(doc.id, doc.clone());
        }
        self.announce(doc.id, RowChange::upsert(RowEvent::Insert, &doc)).await;
        Ok(doc)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: &DocumentPatch,
        user: Uuid,
    ) -> Result<Document, CollabError> {
        self.check_online()?;
        let now = Utc::now();
        let doc = {
            let mut tables = self.tables.write().await;
            let doc = tables
                .documents
                .get_mut(&id)
                .filter(|d| d.is_accessible_by(user))
                .ok_or(CollabError::NotFound(id))?;
            patch.apply_to(doc);
            doc.updated_at = now;
            let doc = doc.clone();

            let fields = patch.field_names().into_iter().map(String::from).collect();
            tables
                .changes
                .push(DocumentChange::new(id, user, ChangeKind::Edited { fields }, now));
            tables.writes.push((id, patch.clone()));
            doc
        };
        self.announce(id, RowChange::upsert(RowEvent::Update, &doc)).await;
        Ok(doc)
    }

    async fn delete(&self, id: Uuid, user: Uuid) -> Result<(), CollabError> {
        self.check_online()?;
        {
            let mut tables = self.tables.write().await;
            // Only the owner deletes; collaborators see NotFound.
            match tables.documents.get(&id) {
                Some(doc) if doc.created_by == user => {}
                _ => return Err(CollabError::NotFound(id)),
            }
            tables.documents.remove(&id);
            tables.changes.retain(|c| c.document_id != id);
        }
        self.announce(id, RowChange::deleted(id)).await;
        Ok(())
    }

    async fn changes(
        &self,
        id: Uuid,
        user: Uuid,
        limit: usize,
    ) -> Result<Vec<DocumentChange>, CollabError> {
        self.check_online()?;
        let tables = self.tables.read().await;
        if !tables.documents.get(&id).is_some_and(|d| d.is_accessible_by(user)) {
            return Err(CollabError::NotFound(id));
        }
        Ok(tables
            .changes
            .iter()
            .rev()
            .filter(|c| c.document_id == id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RealtimeChannel, RealtimeService};
    use crate::config::CollabConfig;
    use crate::protocol::ChannelEvent;

    async fn seeded() -> (MemoryStore, Uuid, Document) {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let doc = store
            .insert(NewDocument::untitled(owner, "owner@example.com"))
            .await
            .unwrap();
        (store, owner, doc)
    }

    #[tokio::test]
    async fn test_select_owner_and_stranger() {
        let (store, owner, doc) = seeded().await;
        assert_eq!(store.select(doc.id, owner).await.unwrap(), doc);

        let err = store.select(doc.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err, CollabError::NotFound(doc.id));

        let missing = Uuid::new_v4();
        assert_eq!(
            store.select(missing, owner).await.unwrap_err(),
            CollabError::NotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_share_grants_access() {
        let (store, owner, doc) = seeded().await;
        let friend = Uuid::new_v4();
        store.share(doc.id, owner, friend).await.unwrap();
        store.share(doc.id, owner, friend).await.unwrap();

        let seen = store.select(doc.id, friend).await.unwrap();
        assert_eq!(seen.collaborators, vec![friend]);

        // Only the owner can share.
        assert!(store.share(doc.id, friend, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_update_records_write_and_history() {
        let (store, owner, doc) = seeded().await;
        let updated = store
            .update(doc.id, &DocumentPatch::subject("Offsite"), owner)
            .await
            .unwrap();
        assert_eq!(updated.subject, "Offsite");
        assert!(updated.updated_at >= doc.updated_at);

        assert_eq!(store.write_count().await, 1);
        let history = store.changes(doc.id, owner, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[0].kind,
            ChangeKind::Edited { fields: vec!["subject".into()] }
        );
        assert_eq!(history[1].kind, ChangeKind::Created);
    }

    #[tokio::test]
    async fn test_changes_limit() {
        let (store, owner, doc) = seeded().await;
        for i in 0..5 {
            store
                .update(doc.id, &DocumentPatch::content(format!("v{i}")), owner)
                .await
                .unwrap();
        }
        assert_eq!(store.changes(doc.id, owner, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_filtered() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let first = store.insert(NewDocument::untitled(me, "me@x.io")).await.unwrap();
        let second = store.insert(NewDocument::untitled(me, "me@x.io")).await.unwrap();
        store.insert(NewDocument::untitled(Uuid::new_v4(), "else@x.io")).await.unwrap();

        store.update(first.id, &DocumentPatch::title("Bumped"), me).await.unwrap();

        let ids: Vec<Uuid> = store.list(me).await.unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_delete_owner_only() {
        let (store, owner, doc) = seeded().await;
        let friend = Uuid::new_v4();
        store.share(doc.id, owner, friend).await.unwrap();

        assert!(store.delete(doc.id, friend).await.is_err());
        store.delete(doc.id, owner).await.unwrap();
        assert!(store.select(doc.id, owner).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_is_transient() {
        let (store, owner, doc) = seeded().await;
        store.set_offline(true);
        let err = store
            .update(doc.id, &DocumentPatch::subject("x"), owner)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_announced_on_feed() {
        let config = CollabConfig::default();
        let hub = LocalHub::new(&config);
        let store = MemoryStore::with_feed(hub.clone());
        let owner = Uuid::new_v4();
        let doc = store.insert(NewDocument::untitled(owner, "o@x.io")).await.unwrap();

        let channel = hub.channel(&config.topic_for(doc.id));
        let mut rx = channel.subscribe().await.unwrap();
        store.update(doc.id, &DocumentPatch::subject("Ping"), owner).await.unwrap();

        loop {
            match rx.recv().await.unwrap() {
                ChannelEvent::RowChange(change) => {
                    assert_eq!(change.event, RowEvent::Update);
                    assert_eq!(change.document().unwrap().subject, "Ping");
                    break;
                }
                _ => continue,
            }
        }
    }
}
