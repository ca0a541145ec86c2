//! Domain model: elements, operations, and the identifiers that tie them
//! together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type WorkspaceId = Uuid;
pub type ElementId = Uuid;
pub type UserId = Uuid;
pub type OperationId = Uuid;

/// The Lamport logical timestamp used for CRDT ordering. Wall-clock
/// times are carried separately and are advisory only.
pub type LamportTimestamp = i64;

/// Canvas entity type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    Rectangle,
    Ellipse,
    Triangle,
    Line,
    Arrow,
    Freehand,
    Sticky,
    List,
    Image,
    Connector,
    Group,
}

/// A canvas entity: the current materialised view of the last accepted
/// mutation for a given element id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub workspace_id: WorkspaceId,
    pub element_type: ElementType,
    /// Opaque type-specific payload (position, size, style, content,
    /// path data, connector endpoints, etc).
    pub data: serde_json::Value,
    pub z_index: i64,
    pub parent_id: Option<ElementId>,
    /// Lamport timestamp of the last accepted mutation. Monotonically
    /// non-decreasing per element id.
    pub version: LamportTimestamp,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone timestamp (Lamport). `None` while live.
    pub deleted_at: Option<LamportTimestamp>,
}

impl Element {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The kind of mutation an `Operation` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Create,
    Update,
    Delete,
    Move,
}

/// An immutable operation-log record. Operations sharing the same
/// `(workspace_id, timestamp, user_id)` tuple are identical, and the log
/// is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub workspace_id: WorkspaceId,
    pub element_id: ElementId,
    pub user_id: UserId,
    pub op_type: OpKind,
    /// Type-specific fields and new values.
    pub data: serde_json::Value,
    pub timestamp: LamportTimestamp,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    /// The element type for a `create` operation, read out of `data`.
    /// Returns `None` for any other kind, or if the payload is missing
    /// the `element_type` field.
    pub fn element_type(&self) -> Option<ElementType> {
        self.data
            .get("element_type")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Per-user high-water mark of seen Lamport timestamps, used transiently
/// for sync catch-up.
pub type StateVector = HashMap<UserId, LamportTimestamp>;

/// Build a state vector from a slice of operations: the per-user maximum
/// timestamp.
pub fn build_state_vector(ops: &[Operation]) -> StateVector {
    let mut sv = StateVector::new();
    for op in ops {
        let entry = sv.entry(op.user_id).or_insert(op.timestamp);
        if op.timestamp > *entry {
            *entry = op.timestamp;
        }
    }
    sv
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn op(user: UserId, ts: LamportTimestamp) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            element_id: Uuid::new_v4(),
            user_id: user,
            op_type: OpKind::Update,
            data: serde_json::json!({}),
            timestamp: ts,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn state_vector_keeps_max_per_user() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let ops = vec![op(u1, 3), op(u1, 7), op(u2, 5)];
        let sv = build_state_vector(&ops);
        assert_eq!(sv.get(&u1), Some(&7));
        assert_eq!(sv.get(&u2), Some(&5));
    }
}
