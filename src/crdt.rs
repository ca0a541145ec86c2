//! The CRDT Engine: Lamport-timestamped Last-Write-Wins application of
//! operations, with state-vector-based catch-up.
//!
//! Grounded on the teacher's `enterprise/realtime/crdt.rs::LamportTime`
//! (tick/update semantics) and `enterprise/collaboration/crdt.rs`'s
//! apply-by-kind dispatch, rebuilt around the spec's concrete
//! Element/Operation pair rather than a generic CRDT register.

use crate::clock::LamportClock;
use crate::error::{AppError, AppResult};
use crate::model::{
    build_state_vector, Element, ElementId, ElementType, OpKind, Operation, StateVector, UserId,
    WorkspaceId,
};
use crate::store::{ElementStore, OperationLogStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of applying a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Applied,
    IgnoredStale,
    ConflictTiebroken,
}

pub struct CrdtEngine {
    clock: LamportClock,
    log: Arc<dyn OperationLogStore>,
    elements: Arc<dyn ElementStore>,
}

impl CrdtEngine {
    pub fn new(
        clock: LamportClock,
        log: Arc<dyn OperationLogStore>,
        elements: Arc<dyn ElementStore>,
    ) -> Self {
        Self {
            clock,
            log,
            elements,
        }
    }

    /// Apply a single operation per the spec's three-step contract:
    /// append to the log, dispatch by kind, return the effect.
    pub async fn apply(&self, op: Operation) -> AppResult<Effect> {
        self.clock.update(op.timestamp);

        // Step 1: append to the log. Duplicate inserts are idempotent.
        self.log.append(&op).await?;

        // Step 2: dispatch by kind.
        match op.op_type {
            OpKind::Create => self.apply_create(&op).await,
            OpKind::Update | OpKind::Move => self.apply_update(&op).await,
            OpKind::Delete => self.apply_delete(&op).await,
        }
    }

    async fn apply_create(&self, op: &Operation) -> AppResult<Effect> {
        match self.elements.get(op.element_id).await? {
            None => {
                let element_type = op.element_type().ok_or_else(|| {
                    AppError::InvalidInput("create operation missing element_type".to_string())
                })?;
                let element = Element {
                    id: op.element_id,
                    workspace_id: op.workspace_id,
                    element_type,
                    data: op.data.clone(),
                    z_index: op
                        .data
                        .get("z_index")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                    parent_id: op
                        .data
                        .get("parent_id")
                        .and_then(|v| serde_json::from_value(v.clone()).ok()),
                    version: op.timestamp,
                    created_by: op.user_id,
                    updated_by: op.user_id,
                    created_at: op.created_at,
                    updated_at: op.created_at,
                    deleted_at: None,
                };
                self.elements.upsert(element).await?;
                Ok(Effect::Applied)
            }
            Some(existing) if op.timestamp > existing.version => {
                // Treat as an update: same write path, just via create.
                self.overlay_and_write(existing, op).await
            }
            Some(existing) if op.timestamp == existing.version => {
                self.apply_tie(existing, op).await
            }
            Some(_) => Ok(Effect::IgnoredStale),
        }
    }

    async fn apply_update(&self, op: &Operation) -> AppResult<Effect> {
        let existing = match self.elements.get(op.element_id).await? {
            Some(e) => e,
            // Out-of-order delivery where create hasn't landed yet is
            // tolerated, not an error to the client.
            None => return Ok(Effect::IgnoredStale),
        };

        if op.timestamp < existing.version {
            return Ok(Effect::IgnoredStale);
        }
        if op.timestamp == existing.version {
            return self.apply_tie(existing, op).await;
        }
        self.overlay_and_write(existing, op).await
    }

    async fn apply_delete(&self, op: &Operation) -> AppResult<Effect> {
        let existing = match self.elements.get(op.element_id).await? {
            Some(e) => e,
            None => return Ok(Effect::IgnoredStale),
        };

        if op.timestamp <= existing.version {
            return Ok(Effect::IgnoredStale);
        }

        self.elements.tombstone(op.element_id, op.timestamp).await?;
        Ok(Effect::Applied)
    }

    /// Apply the `data` field overlays from `op` onto `existing` and
    /// write the result at `op.timestamp`.
    async fn overlay_and_write(&self, existing: Element, op: &Operation) -> AppResult<Effect> {
        let mut merged = existing.data.clone();
        if let (Value::Object(target), Value::Object(patch)) = (&mut merged, &op.data) {
            for (key, value) in patch {
                if key == "element_type" || key == "parent_id" {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
        }

        let z_index = op
            .data
            .get("z_index")
            .and_then(Value::as_i64)
            .unwrap_or(existing.z_index);
        let parent_id = op
            .data
            .get("parent_id")
            .map(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(existing.parent_id);

        let element = Element {
            id: existing.id,
            workspace_id: existing.workspace_id,
            element_type: existing.element_type,
            data: merged,
            z_index,
            parent_id,
            version: op.timestamp,
            created_by: existing.created_by,
            updated_by: op.user_id,
            created_at: existing.created_at,
            updated_at: op.created_at,
            deleted_at: None,
        };
        self.elements.upsert(element).await?;
        Ok(Effect::Applied)
    }

    /// An incoming operation ties the stored version's timestamp: decide
    /// the winner and, if the incoming side wins, write it.
    ///
    /// `existing.updated_by` is the author of whichever operation holds
    /// the element at this timestamp so far (itself possibly the winner
    /// of an earlier tie at the same timestamp), so comparing against it
    /// directly is correct regardless of arrival order.
    async fn apply_tie(&self, existing: Element, op: &Operation) -> AppResult<Effect> {
        // A tombstoned element is resurrected only by a strictly greater
        // version; a tie never qualifies, no matter which side the
        // tie-break would otherwise favour.
        if existing.is_tombstoned() {
            return Ok(Effect::IgnoredStale);
        }

        match self.resolve_tie(existing.updated_by, op.user_id) {
            Effect::ConflictTiebroken => {
                self.overlay_and_write(existing, op).await?;
                Ok(Effect::ConflictTiebroken)
            }
            other => Ok(other),
        }
    }

    /// Deterministic tie-break: the operation authored by the
    /// unsigned-lexicographically greater user id wins.
    fn resolve_tie(&self, stored_winner: UserId, incoming: UserId) -> Effect {
        if incoming.as_bytes() > stored_winner.as_bytes() {
            Effect::ConflictTiebroken
        } else {
            Effect::IgnoredStale
        }
    }

    /// Operations in `workspace_id` strictly newer than the client's
    /// state vector, capped at `limit`, ascending by timestamp.
    pub async fn operations_since(
        &self,
        workspace_id: WorkspaceId,
        state_vector: &StateVector,
        limit: usize,
    ) -> AppResult<Vec<Operation>> {
        self.log.list_since(workspace_id, state_vector, limit).await
    }

    /// The per-user max timestamp across a slice of operations.
    pub fn build_state_vector(&self, ops: &[Operation]) -> StateVector {
        build_state_vector(ops)
    }

    /// Apply a server-originated bulk z-index rewrite (bring-to-front,
    /// send-to-back, reorder) as a single batch sharing one Lamport
    /// timestamp, per the resolved Open Question in `spec.md` §9: one
    /// `update` operation per element, all stamped with the same
    /// `clock.tick()` value, rather than one timestamp per element.
    pub async fn apply_zindex_batch(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        reorder: Vec<(ElementId, i64)>,
    ) -> AppResult<Vec<(ElementId, Effect)>> {
        let timestamp = self.clock.tick();
        let now = Utc::now();
        let mut results = Vec::with_capacity(reorder.len());

        for (element_id, z_index) in reorder {
            let op = Operation {
                id: Uuid::new_v4(),
                workspace_id,
                element_id,
                user_id,
                op_type: OpKind::Update,
                data: serde_json::json!({ "z_index": z_index }),
                timestamp,
                created_at: now,
            };
            let effect = self.apply(op).await?;
            results.push((element_id, effect));
        }
        Ok(results)
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }
}

/// Build a `create` operation's type tag into its data payload — a small
/// helper for callers constructing operations from Dispatcher-parsed
/// frames, so `element_type` always travels inside `data` uniformly.
pub fn with_element_type(mut data: Value, element_type: ElementType) -> Value {
    if let Value::Object(map) = &mut data {
        map.insert(
            "element_type".to_string(),
            serde_json::to_value(element_type).unwrap(),
        );
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryElementStore, MemoryOperationLogStore};
    use chrono::Utc;

    fn engine() -> CrdtEngine {
        CrdtEngine::new(
            LamportClock::new(),
            Arc::new(MemoryOperationLogStore::new()),
            Arc::new(MemoryElementStore::new()),
        )
    }

    fn make_op(
        element_id: ElementId,
        workspace_id: WorkspaceId,
        user_id: UserId,
        kind: OpKind,
        ts: i64,
        data: Value,
    ) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            workspace_id,
            element_id,
            user_id,
            op_type: kind,
            data,
            timestamp: ts,
            created_at: Utc::now(),
        }
    }

    // Scenario (A): LWW on racing updates.
    #[tokio::test]
    async fn scenario_a_lww_on_racing_updates() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();

        // Sort three fresh ids so u0 < u1 < u2 — the tie-break fold is
        // associative, so the deterministic winner of the u0/u1/u2 race
        // is only guaranteed to be u2 if it's the max of all three, not
        // just the max of the last two.
        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let [u0, u1, u2] = ids;

        engine
            .apply(make_op(
                element_id,
                ws,
                u0,
                OpKind::Create,
                1,
                with_element_type(serde_json::json!({"x": 0}), ElementType::Rectangle),
            ))
            .await
            .unwrap();

        engine
            .apply(make_op(
                element_id,
                ws,
                u0,
                OpKind::Update,
                2,
                serde_json::json!({"x": 10}),
            ))
            .await
            .unwrap();

        // First racer at the same timestamp.
        let effect1 = engine
            .apply(make_op(
                element_id,
                ws,
                u1,
                OpKind::Update,
                2,
                serde_json::json!({"x": 20}),
            ))
            .await
            .unwrap();

        // Second racer, greater user id, should tiebreak-win.
        let effect2 = engine
            .apply(make_op(
                element_id,
                ws,
                u2,
                OpKind::Update,
                2,
                serde_json::json!({"x": 30}),
            ))
            .await
            .unwrap();

        assert_eq!(effect1, Effect::ConflictTiebroken);
        assert_eq!(effect2, Effect::ConflictTiebroken);

        let final_element = engine.elements.get(element_id).await.unwrap().unwrap();
        assert_eq!(final_element.version, 2);
        assert_eq!(final_element.data["x"], 30);
    }

    // Scenario (B): stale delete is ignored.
    #[tokio::test]
    async fn scenario_b_stale_delete_is_ignored() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        engine
            .apply(make_op(
                element_id,
                ws,
                user,
                OpKind::Create,
                5,
                with_element_type(serde_json::json!({}), ElementType::Sticky),
            ))
            .await
            .unwrap();
        engine
            .apply(make_op(
                element_id,
                ws,
                user,
                OpKind::Update,
                7,
                serde_json::json!({"x": 1}),
            ))
            .await
            .unwrap();
        let effect = engine
            .apply(make_op(element_id, ws, user, OpKind::Delete, 6, serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(effect, Effect::IgnoredStale);
        let element = engine.elements.get(element_id).await.unwrap().unwrap();
        assert_eq!(element.version, 7);
        assert!(!element.is_tombstoned());
    }

    // A tie against a tombstoned element must never resurrect it, even
    // when the incoming operation's user id would win the tie-break.
    #[tokio::test]
    async fn tied_update_never_resurrects_a_tombstoned_element() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let mut ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let (u_low, u_high) = (ids[0], ids[1]);

        engine
            .apply(make_op(
                element_id,
                ws,
                u_low,
                OpKind::Create,
                3,
                with_element_type(serde_json::json!({}), ElementType::Sticky),
            ))
            .await
            .unwrap();
        engine
            .apply(make_op(element_id, ws, u_low, OpKind::Delete, 5, serde_json::json!({})))
            .await
            .unwrap();

        let effect = engine
            .apply(make_op(
                element_id,
                ws,
                u_high,
                OpKind::Update,
                5,
                serde_json::json!({"x": 1}),
            ))
            .await
            .unwrap();

        assert_eq!(effect, Effect::IgnoredStale);
        let element = engine.elements.get(element_id).await.unwrap().unwrap();
        assert!(element.is_tombstoned());
    }

    // Scenario (C): out-of-order create repair.
    #[tokio::test]
    async fn scenario_c_out_of_order_create_repair() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        let effect = engine
            .apply(make_op(
                element_id,
                ws,
                user,
                OpKind::Update,
                10,
                serde_json::json!({"x": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(effect, Effect::IgnoredStale);

        engine
            .apply(make_op(
                element_id,
                ws,
                user,
                OpKind::Create,
                5,
                with_element_type(serde_json::json!({}), ElementType::Text),
            ))
            .await
            .unwrap();

        engine
            .apply(make_op(
                element_id,
                ws,
                user,
                OpKind::Update,
                10,
                serde_json::json!({"x": 1}),
            ))
            .await
            .unwrap();

        let element = engine.elements.get(element_id).await.unwrap().unwrap();
        assert_eq!(element.version, 10);
    }

    // Invariant 2: idempotence.
    #[tokio::test]
    async fn invariant_idempotence() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let op = make_op(
            element_id,
            ws,
            user,
            OpKind::Create,
            1,
            with_element_type(serde_json::json!({"x": 0}), ElementType::Rectangle),
        );

        engine.apply(op.clone()).await.unwrap();
        let after_once = engine.elements.get(element_id).await.unwrap().unwrap();
        engine.apply(op).await.unwrap();
        let after_twice = engine.elements.get(element_id).await.unwrap().unwrap();

        assert_eq!(after_once.version, after_twice.version);
        assert_eq!(after_once.data, after_twice.data);
    }

    // Invariant 3: commutativity under LWW for distinct timestamps.
    #[tokio::test]
    async fn invariant_commutativity_distinct_timestamps() {
        let ws = Uuid::new_v4();
        let element_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        let create = make_op(
            element_id,
            ws,
            user,
            OpKind::Create,
            1,
            with_element_type(serde_json::json!({"x": 0}), ElementType::Rectangle),
        );
        let a = make_op(element_id, ws, user, OpKind::Update, 2, serde_json::json!({"x": 2}));
        let b = make_op(element_id, ws, user, OpKind::Update, 3, serde_json::json!({"x": 3}));

        let engine1 = engine();
        engine1.apply(create.clone()).await.unwrap();
        engine1.apply(a.clone()).await.unwrap();
        engine1.apply(b.clone()).await.unwrap();
        let final1 = engine1.elements.get(element_id).await.unwrap().unwrap();

        let engine2 = engine();
        engine2.apply(create).await.unwrap();
        engine2.apply(b).await.unwrap();
        engine2.apply(a).await.unwrap();
        let final2 = engine2.elements.get(element_id).await.unwrap().unwrap();

        assert_eq!(final1.version, final2.version);
        assert_eq!(final1.data, final2.data);
    }

    // Scenario (G): sync catch-up.
    #[tokio::test]
    async fn scenario_g_sync_catch_up() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();

        engine
            .apply(make_op(
                Uuid::new_v4(),
                ws,
                u1,
                OpKind::Create,
                3,
                with_element_type(serde_json::json!({}), ElementType::Text),
            ))
            .await
            .unwrap();
        engine
            .apply(make_op(
                Uuid::new_v4(),
                ws,
                u1,
                OpKind::Create,
                7,
                with_element_type(serde_json::json!({}), ElementType::Text),
            ))
            .await
            .unwrap();
        engine
            .apply(make_op(
                Uuid::new_v4(),
                ws,
                u2,
                OpKind::Create,
                5,
                with_element_type(serde_json::json!({}), ElementType::Text),
            ))
            .await
            .unwrap();

        let mut sv = StateVector::new();
        sv.insert(u1, 3);
        sv.insert(u2, 5);

        let result = engine.operations_since(ws, &sv, 1000).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].timestamp, 7);
        assert_eq!(result[0].user_id, u1);
    }

    #[tokio::test]
    async fn zindex_batch_shares_one_timestamp() {
        let engine = engine();
        let ws = Uuid::new_v4();
        let user = Uuid::new_v4();
        let e1 = Uuid::new_v4();
        let e2 = Uuid::new_v4();

        engine
            .apply(make_op(
                e1,
                ws,
                user,
                OpKind::Create,
                1,
                with_element_type(serde_json::json!({}), ElementType::Rectangle),
            ))
            .await
            .unwrap();
        engine
            .apply(make_op(
                e2,
                ws,
                user,
                OpKind::Create,
                2,
                with_element_type(serde_json::json!({}), ElementType::Rectangle),
            ))
            .await
            .unwrap();

        let results = engine
            .apply_zindex_batch(ws, user, vec![(e1, 5), (e2, 10)])
            .await
            .unwrap();

        assert!(results.iter().all(|(_, effect)| *effect == Effect::Applied));
        let el1 = engine.elements.get(e1).await.unwrap().unwrap();
        let el2 = engine.elements.get(e2).await.unwrap().unwrap();
        assert_eq!(el1.version, el2.version);
        assert_eq!(el1.z_index, 5);
        assert_eq!(el2.z_index, 10);
    }
}
