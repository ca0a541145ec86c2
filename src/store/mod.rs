//! Persistence layer: the Operation Log Store and the Element Store.
//!
//! Both are defined as traits so the engine can run against either the
//! `sqlx`-backed Postgres implementation or the in-memory one used by
//! tests and single-process deployments without a live database.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::model::{Element, ElementId, Operation, StateVector, WorkspaceId};
use async_trait::async_trait;

/// Append-only persistence for `Operation`s.
#[async_trait]
pub trait OperationLogStore: Send + Sync {
    /// Atomically insert `op`. Duplicate inserts of an identical
    /// operation (same `(workspace_id, timestamp, user_id)`) are
    /// idempotent successes, not errors.
    async fn append(&self, op: &Operation) -> AppResult<()>;

    /// Operations in `workspace_id` whose `timestamp` exceeds the
    /// author's entry in `state_vector` (or who the vector has never
    /// seen), ascending by timestamp, capped at `limit`.
    async fn list_since(
        &self,
        workspace_id: WorkspaceId,
        state_vector: &StateVector,
        limit: usize,
    ) -> AppResult<Vec<Operation>>;

    /// Newest-first operations for a workspace, capped at `limit`.
    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> AppResult<Vec<Operation>>;
}

/// Current-state projection for materialised elements.
#[async_trait]
pub trait ElementStore: Send + Sync {
    async fn get(&self, id: ElementId) -> AppResult<Option<Element>>;

    /// Live (non-tombstoned) elements in a workspace.
    async fn list_by_workspace(&self, workspace_id: WorkspaceId) -> AppResult<Vec<Element>>;

    /// Write the full record. The store never writes a version
    /// strictly less than the currently stored version for that id.
    /// Writes at an *equal* version are accepted — that's how the CRDT
    /// engine persists the winner of a Lamport tie-break, which doesn't
    /// advance the element's version but does replace its data — the
    /// caller is expected to have already decided LWW accepts the
    /// change; the store only backstops regressions.
    async fn upsert(&self, element: Element) -> AppResult<()>;

    /// Soft-delete, stamping the tombstone with the operation's Lamport
    /// timestamp.
    async fn tombstone(&self, id: ElementId, at: i64) -> AppResult<()>;

    /// Transactional, all-or-nothing batch upsert.
    async fn upsert_many(&self, elements: Vec<Element>) -> AppResult<()>;

    /// Transactional, all-or-nothing batch tombstone.
    async fn tombstone_many(&self, ids: Vec<(ElementId, i64)>) -> AppResult<()>;
}
