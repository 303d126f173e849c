//! Row-store seam for the `documents` and `document_changes` tables.
//!
//! Access control is the store's job: a row the caller may not see is
//! indistinguishable from a missing one and reported as `NotFound`.

use std::future::Future;

use draftroom_core::{Document, DocumentChange, DocumentPatch, NewDocument};
use uuid::Uuid;

use crate::error::CollabError;

pub trait DocumentStore: Send + Sync + 'static {
    /// Drafts visible to `user`, most recently updated first.
    fn list(&self, user: Uuid) -> impl Future<Output = Result<Vec<Document>, CollabError>> + Send;

    fn select(
        &self,
        id: Uuid,
        user: Uuid,
    ) -> impl Future<Output = Result<Document, CollabError>> + Send;

    fn insert(
        &self,
        new: NewDocument,
    ) -> impl Future<Output = Result<Document, CollabError>> + Send;

    /// Apply `patch` and bump `updated_at`. Returns the stored row.
    fn update(
        &self,
        id: Uuid,
        patch: &DocumentPatch,
        user: Uuid,
    ) -> impl Future<Output = Result<Document, CollabError>> + Send;

    fn delete(&self, id: Uuid, user: Uuid) -> impl Future<Output = Result<(), CollabError>> + Send;

    /// Audit rows for `id`, newest first, at most `limit`.
    fn changes(
        &self,
        id: Uuid,
        user: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DocumentChange>, CollabError>> + Send;
}
