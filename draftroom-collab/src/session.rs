//! Collaboration session manager.
//!
//! Owns the lifecycle of being connected to one draft:
//!
//! ```text
//!  open(id) ──► store.select ──► teardown previous ──► subscribe ──► track
//!                                                          │
//!  pump() ◄── broadcast::Receiver<ChannelEvent> ◄──────────┘
//!    ├── RowChange  ─► on_remote_content_change / close on delete
//!    ├── PresenceSync ─► on_presence_sync
//!    └── Status ─► SessionEvent::ChannelStatus
//!
//!  update_content(patch) ─► apply locally ─► merge into pending ─► Debouncer
//!                                                       (delay) │
//!                                       spawn ─► store.update ◄─┘
//! ```
//!
//! All session state changes through `&mut self`. The one exception is the
//! detached flush task, which shares the pending write through a mutex and
//! reports back on the event channel (see [`SessionManager::take_event_rx`]).
//!
//! Methods that schedule work (`update_content`) spawn on the ambient Tokio
//! runtime and must be called from inside one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use draftroom_core::{Document, DocumentChange, DocumentPatch, NewDocument};
use log::{debug, info, warn};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::auth::{AuthState, CurrentUser};
use crate::channel::{RealtimeChannel, RealtimeService};
use crate::config::CollabConfig;
use crate::debounce::Debouncer;
use crate::error::CollabError;
use crate::presence::{PresenceEntry, PresenceRoster};
use crate::protocol::{
    ChannelEvent, ChannelStatus, PresencePayload, PresenceState, RowChange, RowEvent,
    DOCUMENTS_TABLE,
};
use crate::store::DocumentStore;

/// Events emitted by the session manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A document became current
    Opened { document_id: Uuid },
    /// The session was torn down
    Closed { document_id: Uuid },
    /// A debounced or explicit write reached the store
    Flushed {
        document_id: Uuid,
        updated_at: DateTime<Utc>,
    },
    /// A write failed; the fields stay pending for the next flush
    FlushFailed {
        document_id: Uuid,
        error: CollabError,
    },
    /// The server-confirmed snapshot changed
    DocumentChanged { document_id: Uuid },
    /// The current document was deleted
    DocumentDeleted { document_id: Uuid },
    /// The presence list was recomputed
    PresenceChanged { peers: usize },
    /// Subscription status reported by the realtime service
    ChannelStatus {
        document_id: Uuid,
        status: ChannelStatus,
    },
}

/// Accumulated, not yet flushed edits of one session.
#[derive(Debug, Default)]
struct PendingWrite {
    patch: DocumentPatch,
    /// Bumped on every merge so a finishing flush can tell whether newer
    /// edits arrived while it was on the wire.
    generation: u64,
}

type SharedPending = Arc<Mutex<PendingWrite>>;

fn lock(pending: &Mutex<PendingWrite>) -> MutexGuard<'_, PendingWrite> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.try_send(event) {
        debug!("session event dropped: {e}");
    }
}

/// Write the pending patch of `document_id`. Clears it on success unless
/// newer edits were merged in the meantime.
async fn write_pending<S: DocumentStore>(
    store: Arc<S>,
    pending: SharedPending,
    document_id: Uuid,
    user_id: Uuid,
    events: mpsc::Sender<SessionEvent>,
) -> Result<Option<Document>, CollabError> {
    let (patch, generation) = {
        let guard = lock(&pending);
        if guard.patch.is_empty() {
            return Ok(None);
        }
        (guard.patch.clone(), guard.generation)
    };

    match store.update(document_id, &patch, user_id).await {
        Ok(stored) => {
            {
                let mut guard = lock(&pending);
                if guard.generation == generation {
                    guard.patch = DocumentPatch::default();
                }
            }
            debug!("flushed {:?} to {document_id}", patch.field_names());
            emit(
                &events,
                SessionEvent::Flushed {
                    document_id,
                    updated_at: stored.updated_at,
                },
            );
            Ok(Some(stored))
        }
        Err(e) => {
            warn!("flush of {document_id} failed: {e}");
            emit(
                &events,
                SessionEvent::FlushFailed {
                    document_id,
                    error: e.clone(),
                },
            );
            Err(e)
        }
    }
}

struct Subscription<C> {
    channel: C,
    rx: broadcast::Receiver<ChannelEvent>,
}

/// State bound to the current document.
struct Session<C> {
    /// Last server-confirmed snapshot.
    confirmed: Document,
    /// `confirmed` with the pending patch laid on top.
    current: Document,
    subscription: Option<Subscription<C>>,
    roster: PresenceRoster,
    pending: SharedPending,
    debouncer: Debouncer,
    cursor: usize,
}

impl<C: RealtimeChannel> Session<C> {
    fn new(snapshot: Document) -> Self {
        Self {
            current: snapshot.clone(),
            confirmed: snapshot,
            subscription: None,
            roster: PresenceRoster::new(),
            pending: SharedPending::default(),
            debouncer: Debouncer::new(),
            cursor: 0,
        }
    }

    fn document_id(&self) -> Uuid {
        self.confirmed.id
    }

    fn rebase(&mut self, snapshot: Document) {
        self.confirmed = snapshot;
        let mut current = self.confirmed.clone();
        lock(&self.pending).patch.apply_to(&mut current);
        self.current = current;
    }
}

/// Inbound message as seen by the dispatcher.
enum Inbound {
    Event(ChannelEvent),
    Lagged(u64),
}

impl From<RecvError> for Inbound {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Lagged(n) => Inbound::Lagged(n),
            RecvError::Closed => Inbound::Event(ChannelEvent::Status(ChannelStatus::Closed)),
        }
    }
}

/// The collaboration session manager.
///
/// One instance per client. At most one document is open at a time, and at
/// most one realtime subscription exists.
pub struct SessionManager<S: DocumentStore, R: RealtimeService> {
    config: CollabConfig,
    auth: AuthState,
    store: Arc<S>,
    realtime: Arc<R>,

    /// Drafts visible to the user, newest first.
    documents: Vec<Document>,
    session: Option<Session<R::Channel>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<S: DocumentStore, R: RealtimeService> SessionManager<S, R> {
    pub fn new(config: CollabConfig, auth: AuthState, store: Arc<S>, realtime: Arc<R>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            config,
            auth,
            store,
            realtime,
            documents: Vec::new(),
            session: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Replace the auth snapshot after a sign-in or sign-out. An open
    /// session is left as is; close it first when the identity goes away.
    pub fn set_auth(&mut self, auth: AuthState) {
        self.auth = auth;
    }

    pub fn current_document(&self) -> Option<&Document> {
        self.session.as_ref().map(|s| &s.current)
    }

    pub fn document_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(Session::document_id)
    }

    /// Remote collaborators on the current document.
    pub fn presence(&self) -> &[PresenceEntry] {
        self.session
            .as_ref()
            .map(|s| s.roster.entries())
            .unwrap_or(&[])
    }

    pub fn is_subscribed(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.subscription.is_some())
    }

    /// A flush is scheduled or edits are waiting for one.
    pub fn has_pending_write(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.debouncer.is_pending() || !lock(&s.pending).patch.is_empty())
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    fn identity(&self) -> Result<&CurrentUser, CollabError> {
        self.auth.identity().ok_or(CollabError::Unauthenticated)
    }

    // --- Lifecycle ---------------------------------------------------------

    /// Make `document_id` the current document and join its channel.
    ///
    /// A failed fetch leaves the previous session untouched. Re-opening the
    /// current document refreshes its snapshot and keeps the channel. If
    /// subscribing or tracking fails, the document is still current and
    /// usable without realtime; the error is returned. A failed unsubscribe
    /// from the previous document is returned the same way.
    pub async fn open(&mut self, document_id: Uuid) -> Result<(), CollabError> {
        let user = self.identity()?.clone();
        let snapshot = self.store.select(document_id, user.id).await?;

        let mut left = Ok(());
        if self.document_id() == Some(document_id) {
            if let Some(session) = self.session.as_mut() {
                debug!("refreshing {document_id}");
                session.rebase(snapshot);
            }
            emit(&self.event_tx, SessionEvent::DocumentChanged { document_id });
        } else {
            left = self.teardown().await;
            self.session = Some(Session::new(snapshot));
            info!("opened document {document_id}");
            emit(&self.event_tx, SessionEvent::Opened { document_id });
        }

        let attached = if self.is_subscribed() {
            Ok(())
        } else {
            self.attach(&user).await
        };
        left.and(attached)
    }

    async fn attach(&mut self, user: &CurrentUser) -> Result<(), CollabError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CollabError::NoActiveDocument);
        };
        let document_id = session.document_id();
        let topic = self.config.topic_for(document_id);
        let channel = self.realtime.channel(&topic);

        let acked =
            tokio::time::timeout(self.config.subscribe_timeout(), channel.subscribe()).await;
        let rx = match acked {
            Ok(result) => result.inspect_err(|e| warn!("subscribe to {topic} failed: {e}"))?,
            Err(_) => {
                warn!("subscribe to {topic} timed out");
                return Err(CollabError::transient(format!(
                    "subscribe to {topic} timed out after {:?}",
                    self.config.subscribe_timeout()
                )));
            }
        };

        let payload = PresencePayload::new(user.id, user.presence_name(), session.cursor);
        if let Err(e) = channel.track(&payload).await {
            warn!("initial presence on {topic} failed: {e}");
            if let Err(e) = channel.unsubscribe().await {
                debug!("unsubscribe after failed track: {e}");
            }
            return Err(e);
        }

        info!("subscribed to {topic}");
        session.subscription = Some(Subscription { channel, rx });
        emit(
            &self.event_tx,
            SessionEvent::ChannelStatus {
                document_id,
                status: ChannelStatus::Subscribed,
            },
        );
        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), CollabError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let document_id = session.document_id();
        if session.debouncer.cancel() {
            debug!("discarded pending flush of {document_id}");
        }

        let result = match session.subscription.take() {
            Some(sub) => sub.channel.unsubscribe().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            warn!("unsubscribe from {document_id} failed: {e}");
        }

        info!("closed document {document_id}");
        emit(&self.event_tx, SessionEvent::Closed { document_id });
        result
    }

    /// Leave the current document: drop the pending timer, unsubscribe,
    /// clear presence. Closing with nothing open is a no-op.
    pub async fn close(&mut self) -> Result<(), CollabError> {
        self.teardown().await
    }

    // --- Local edits -------------------------------------------------------

    /// Apply an edit optimistically and (re)schedule the debounced write.
    pub fn update_content(&mut self, patch: DocumentPatch) -> Result<(), CollabError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CollabError::NoActiveDocument);
        };
        let user_id = self
            .auth
            .identity()
            .map(|u| u.id)
            .ok_or(CollabError::Unauthenticated)?;
        if patch.is_empty() {
            return Ok(());
        }

        patch.apply_to(&mut session.current);
        {
            let mut pending = lock(&session.pending);
            pending.patch.merge(patch);
            pending.generation += 1;
        }

        let document_id = session.document_id();
        let task = write_pending(
            self.store.clone(),
            session.pending.clone(),
            document_id,
            user_id,
            self.event_tx.clone(),
        );
        session.debouncer.schedule(self.config.debounce(), async move {
            // Failures are reported on the event channel.
            let _ = task.await;
        });
        debug!("flush of {document_id} scheduled in {:?}", self.config.debounce());
        Ok(())
    }

    /// Write pending edits now instead of waiting for the debounce window.
    pub async fn flush(&mut self) -> Result<(), CollabError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let user_id = self
            .auth
            .identity()
            .map(|u| u.id)
            .ok_or(CollabError::Unauthenticated)?;
        session.debouncer.cancel();

        let stored = write_pending(
            self.store.clone(),
            session.pending.clone(),
            session.document_id(),
            user_id,
            self.event_tx.clone(),
        )
        .await?;
        if let Some(doc) = stored {
            session.rebase(doc);
        }
        Ok(())
    }

    /// Re-track the local presence with a new cursor. Without a channel or
    /// without an identity this does nothing.
    pub async fn update_presence(&mut self, cursor_position: usize) -> Result<(), CollabError> {
        let Some(user) = self.auth.identity() else {
            return Ok(());
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.cursor = cursor_position;
        let Some(sub) = session.subscription.as_ref() else {
            return Ok(());
        };

        let payload = PresencePayload::new(user.id, user.presence_name(), cursor_position);
        sub.channel.track(&payload).await
    }

    // --- Remote input ------------------------------------------------------

    /// Take a new server snapshot of the current document. Pending local
    /// fields stay on top. Returns `false` for other documents.
    pub fn on_remote_content_change(&mut self, snapshot: Document) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let document_id = snapshot.id;
        if session.document_id() != document_id {
            debug!("ignoring snapshot of {document_id}");
            return false;
        }

        if let Some(cached) = self.documents.iter_mut().find(|d| d.id == document_id) {
            *cached = snapshot.clone();
        }
        session.rebase(snapshot);
        emit(&self.event_tx, SessionEvent::DocumentChanged { document_id });
        true
    }

    /// Recompute the presence list from a full snapshot. On error the
    /// previous list stays.
    pub fn on_presence_sync(
        &mut self,
        raw: &PresenceState,
    ) -> Result<&[PresenceEntry], CollabError> {
        let local = self.auth.identity().map(|u| u.id);
        let Some(session) = self.session.as_mut() else {
            return Ok(&[]);
        };

        let peers = session
            .roster
            .apply_sync(raw, local)
            .inspect_err(|e| warn!("presence sync rejected: {e}"))?;
        debug!("presence: {} peer(s)", peers.len());
        emit(
            &self.event_tx,
            SessionEvent::PresenceChanged { peers: peers.len() },
        );
        Ok(peers)
    }

    /// Wait for the next channel message and route it. Returns `false` when
    /// there is no active subscription.
    pub async fn pump(&mut self) -> Result<bool, CollabError> {
        let inbound = match self.session.as_mut().and_then(|s| s.subscription.as_mut()) {
            Some(sub) => match sub.rx.recv().await {
                Ok(event) => Inbound::Event(event),
                Err(e) => Inbound::from(e),
            },
            None => return Ok(false),
        };
        self.dispatch(inbound).await?;
        Ok(true)
    }

    /// Route every message already buffered on the channel without waiting.
    /// All messages are processed; the first error is returned.
    pub async fn pump_pending(&mut self) -> Result<usize, CollabError> {
        let mut handled = 0;
        let mut first_error = None;
        loop {
            let inbound = match self.session.as_mut().and_then(|s| s.subscription.as_mut()) {
                Some(sub) => match sub.rx.try_recv() {
                    Ok(event) => Inbound::Event(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(n)) => Inbound::Lagged(n),
                    Err(TryRecvError::Closed) => {
                        Inbound::Event(ChannelEvent::Status(ChannelStatus::Closed))
                    }
                },
                None => break,
            };
            handled += 1;
            if let Err(e) = self.dispatch(inbound).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    async fn dispatch(&mut self, inbound: Inbound) -> Result<(), CollabError> {
        match inbound {
            Inbound::Event(ChannelEvent::RowChange(change)) => self.on_row_change(change).await,
            Inbound::Event(ChannelEvent::PresenceSync(state)) => {
                self.on_presence_sync(&state).map(|_| ())
            }
            Inbound::Event(ChannelEvent::Status(status)) => {
                self.on_status(status).await;
                Ok(())
            }
            Inbound::Lagged(missed) => {
                warn!("channel lagged by {missed} message(s), re-reading presence");
                let state = match self.session.as_ref().and_then(|s| s.subscription.as_ref()) {
                    Some(sub) => sub.channel.presence_state().await,
                    None => return Ok(()),
                };
                self.on_presence_sync(&state).map(|_| ())
            }
        }
    }

    async fn on_row_change(&mut self, change: RowChange) -> Result<(), CollabError> {
        if change.table != DOCUMENTS_TABLE {
            return Ok(());
        }
        match change.event {
            RowEvent::Insert | RowEvent::Update => {
                self.on_remote_content_change(change.document()?);
                Ok(())
            }
            RowEvent::Delete => {
                let Some(id) = change.record_id() else {
                    return Err(CollabError::desync("delete without record id"));
                };
                if self.document_id() != Some(id) {
                    return Ok(());
                }
                info!("document {id} was deleted remotely");
                self.documents.retain(|d| d.id != id);
                let result = self.teardown().await;
                emit(&self.event_tx, SessionEvent::DocumentDeleted { document_id: id });
                result
            }
        }
    }

    async fn on_status(&mut self, status: ChannelStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let document_id = session.document_id();
        if status != ChannelStatus::Subscribed {
            warn!("channel for {document_id} reported {status:?}");
            session.roster.clear();
            // Leave explicitly so our presence does not linger; reopening
            // subscribes again.
            if let Some(sub) = session.subscription.take() {
                if let Err(e) = sub.channel.unsubscribe().await {
                    warn!("unsubscribe from {document_id} failed: {e}");
                }
            }
        }
        emit(
            &self.event_tx,
            SessionEvent::ChannelStatus {
                document_id,
                status,
            },
        );
    }

    // --- Document list -----------------------------------------------------

    /// Reload the drafts visible to the user.
    pub async fn refresh_documents(&mut self) -> Result<&[Document], CollabError> {
        let user_id = self.identity()?.id;
        self.documents = self.store.list(user_id).await?;
        Ok(&self.documents)
    }

    /// Create an untitled draft owned by the user. It is not opened.
    pub async fn create_document(&mut self) -> Result<Uuid, CollabError> {
        let user = self.identity()?;
        let new = NewDocument::untitled(user.id, user.email.clone());
        let doc = self.store.insert(new).await?;
        let id = doc.id;
        info!("created document {id}");
        self.documents.insert(0, doc);
        Ok(id)
    }

    pub async fn delete_document(&mut self, id: Uuid) -> Result<(), CollabError> {
        let user_id = self.identity()?.id;
        self.store.delete(id, user_id).await?;
        self.documents.retain(|d| d.id != id);

        if self.document_id() != Some(id) {
            return Ok(());
        }
        let left = self.teardown().await;
        emit(&self.event_tx, SessionEvent::DocumentDeleted { document_id: id });
        left
    }

    /// Audit trail of the current document, newest first.
    pub async fn recent_changes(&self) -> Result<Vec<DocumentChange>, CollabError> {
        let user_id = self.identity()?.id;
        let id = self.document_id().ok_or(CollabError::NoActiveDocument)?;
        self.store
            .changes(id, user_id, self.config.history_limit)
            .await
    }
}

impl<S: DocumentStore, R: RealtimeService> Drop for SessionManager<S, R> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.debouncer.cancel();
        let Some(sub) = session.subscription.take() else {
            return;
        };
        // Leave the channel in the background if a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = sub.channel.unsubscribe().await;
            });
        }
    }
}
