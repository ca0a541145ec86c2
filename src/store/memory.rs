//! In-memory `OperationLogStore`/`ElementStore` implementations.
//!
//! Used by unit tests and by single-node deployments that don't need a
//! live Postgres instance. Internal locking mirrors the
//! `parking_lot::RwLock` idiom the teacher uses throughout its
//! connection-pool bookkeeping.

use super::{ElementStore, OperationLogStore};
use crate::error::{AppError, AppResult};
use crate::model::{Element, ElementId, Operation, StateVector, UserId, WorkspaceId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryOperationLogStore {
    // keyed by (workspace_id, timestamp, user_id) for idempotent append
    seen: RwLock<HashMap<(WorkspaceId, i64, UserId), Operation>>,
}

impl MemoryOperationLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationLogStore for MemoryOperationLogStore {
    async fn append(&self, op: &Operation) -> AppResult<()> {
        let key = (op.workspace_id, op.timestamp, op.user_id);
        let mut seen = self.seen.write();
        seen.entry(key).or_insert_with(|| op.clone());
        Ok(())
    }

    async fn list_since(
        &self,
        workspace_id: WorkspaceId,
        state_vector: &StateVector,
        limit: usize,
    ) -> AppResult<Vec<Operation>> {
        let seen = self.seen.read();
        let mut ops: Vec<Operation> = seen
            .values()
            .filter(|op| op.workspace_id == workspace_id)
            .filter(|op| {
                let high_water = state_vector.get(&op.user_id).copied().unwrap_or(i64::MIN);
                op.timestamp > high_water
            })
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.timestamp);
        ops.truncate(limit);
        Ok(ops)
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> AppResult<Vec<Operation>> {
        let seen = self.seen.read();
        let mut ops: Vec<Operation> = seen
            .values()
            .filter(|op| op.workspace_id == workspace_id)
            .cloned()
            .collect();
        ops.sort_by_key(|op| std::cmp::Reverse(op.timestamp));
        ops.truncate(limit);
        Ok(ops)
    }
}

#[derive(Default)]
pub struct MemoryElementStore {
    elements: RwLock<HashMap<ElementId, Element>>,
}

impl MemoryElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_one(elements: &mut HashMap<ElementId, Element>, element: Element) -> AppResult<()> {
        if let Some(existing) = elements.get(&element.id) {
            if element.version < existing.version {
                return Err(AppError::Conflict(format!(
                    "element {} version {} regresses stored version {}",
                    element.id, element.version, existing.version
                )));
            }
        }
        elements.insert(element.id, element);
        Ok(())
    }
}

#[async_trait]
impl ElementStore for MemoryElementStore {
    async fn get(&self, id: ElementId) -> AppResult<Option<Element>> {
        Ok(self.elements.read().get(&id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: WorkspaceId) -> AppResult<Vec<Element>> {
        Ok(self
            .elements
            .read()
            .values()
            .filter(|e| e.workspace_id == workspace_id && !e.is_tombstoned())
            .cloned()
            .collect())
    }

    async fn upsert(&self, element: Element) -> AppResult<()> {
        let mut elements = self.elements.write();
        Self::write_one(&mut elements, element)
    }

    async fn tombstone(&self, id: ElementId, at: i64) -> AppResult<()> {
        let mut elements = self.elements.write();
        if let Some(element) = elements.get_mut(&id) {
            element.deleted_at = Some(at);
            element.version = at;
        }
        Ok(())
    }

    async fn upsert_many(&self, batch: Vec<Element>) -> AppResult<()> {
        let mut elements = self.elements.write();
        let snapshot = elements.clone();
        for element in batch {
            if let Err(e) = Self::write_one(&mut elements, element) {
                *elements = snapshot;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn tombstone_many(&self, batch: Vec<(ElementId, i64)>) -> AppResult<()> {
        let mut elements = self.elements.write();
        let snapshot = elements.clone();
        for (id, at) in batch {
            match elements.get_mut(&id) {
                Some(element) => {
                    element.deleted_at = Some(at);
                    element.version = at;
                }
                None => {
                    *elements = snapshot;
                    return Err(AppError::NotFound(format!("element {id} not found")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementType, OpKind};
    use chrono::Utc;
    use uuid::Uuid;

    fn element(id: ElementId, workspace: WorkspaceId, version: i64) -> Element {
        Element {
            id,
            workspace_id: workspace,
            element_type: ElementType::Rectangle,
            data: serde_json::json!({}),
            z_index: 0,
            parent_id: None,
            version,
            created_by: Uuid::new_v4(),
            updated_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn operation(workspace: WorkspaceId, user: UserId, ts: i64) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            workspace_id: workspace,
            element_id: Uuid::new_v4(),
            user_id: user,
            op_type: OpKind::Update,
            data: serde_json::json!({}),
            timestamp: ts,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_regressing_version() {
        let store = MemoryElementStore::new();
        let id = Uuid::new_v4();
        let ws = Uuid::new_v4();
        store.upsert(element(id, ws, 5)).await.unwrap();
        let err = store.upsert(element(id, ws, 4)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn upsert_allows_equal_version_overwrite() {
        // A Lamport tie-break replaces the winner's data without
        // advancing the element's version.
        let store = MemoryElementStore::new();
        let id = Uuid::new_v4();
        let ws = Uuid::new_v4();
        let mut first = element(id, ws, 5);
        first.data = serde_json::json!({"x": 10});
        store.upsert(first).await.unwrap();

        let mut second = element(id, ws, 5);
        second.data = serde_json::json!({"x": 30});
        store.upsert(second).await.unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.data["x"], 30);
        assert_eq!(stored.version, 5);
    }

    #[tokio::test]
    async fn list_by_workspace_excludes_tombstoned() {
        let store = MemoryElementStore::new();
        let ws = Uuid::new_v4();
        let id = Uuid::new_v4();
        store.upsert(element(id, ws, 1)).await.unwrap();
        store.tombstone(id, 2).await.unwrap();
        let live = store.list_by_workspace(ws).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn append_is_idempotent_on_duplicate() {
        let store = MemoryOperationLogStore::new();
        let ws = Uuid::new_v4();
        let user = Uuid::new_v4();
        let op = operation(ws, user, 10);
        store.append(&op).await.unwrap();
        store.append(&op).await.unwrap();
        let all = store.list_by_workspace(ws, 1000).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn list_since_returns_only_newer_than_state_vector() {
        let store = MemoryOperationLogStore::new();
        let ws = Uuid::new_v4();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        store.append(&operation(ws, u1, 3)).await.unwrap();
        store.append(&operation(ws, u1, 7)).await.unwrap();
        store.append(&operation(ws, u2, 5)).await.unwrap();

        let mut sv = StateVector::new();
        sv.insert(u1, 3);
        sv.insert(u2, 5);

        let result = store.list_since(ws, &sv, 1000).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].timestamp, 7);
        assert_eq!(result[0].user_id, u1);
    }
}
