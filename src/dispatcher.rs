//! The Dispatcher: pure routing on inbound frame `type`.
//!
//! Grounded on the teacher's `enterprise/collaboration/protocol.rs`
//! dispatch-by-`MessageType` match (there, a flat `match` over a parsed
//! enum; here, over `InboundType::parse`, since an unrecognised `type`
//! must still produce a well-formed `error` frame rather than fail to
//! parse at all) and on `spec.md` §4.8's dispatch table.

use crate::auth::{Authorizer, Role};
use crate::crdt::{CrdtEngine, Effect};
use crate::frame::{
    operation_frame, BatchPayload, CursorMovePayload, Frame, JoinRoomPayload, OperationPayload,
    PongPayload, PresenceUpdatePayload, SelectionChangePayload, SyncRequestPayload,
    SyncResponsePayload,
};
use crate::hub::Hub;
use crate::model::{build_state_vector, Operation, UserId, WorkspaceId};
use crate::presence::Presence;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// The mutable per-connection state the Dispatcher needs between calls:
/// not-yet-joined vs joined workspace, and the session's own presence.
/// Owned by the Session; the Dispatcher only ever borrows it for the
/// duration of one frame.
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub display_name: String,
    pub outbound: mpsc::Sender<Frame>,
    pub workspace_id: Mutex<Option<WorkspaceId>>,
    pub presence: Mutex<Presence>,
}

impl SessionContext {
    pub fn new(session_id: Uuid, user_id: UserId, display_name: String, outbound: mpsc::Sender<Frame>) -> Self {
        let presence = Presence::new(user_id, display_name.clone());
        Self {
            session_id,
            user_id,
            display_name,
            outbound,
            workspace_id: Mutex::new(None),
            presence: Mutex::new(presence),
        }
    }
}

pub struct Dispatcher {
    hub: Arc<Hub>,
    engine: Arc<CrdtEngine>,
    authorizer: Arc<dyn Authorizer>,
    sync_batch_limit: usize,
}

impl Dispatcher {
    pub fn new(
        hub: Arc<Hub>,
        engine: Arc<CrdtEngine>,
        authorizer: Arc<dyn Authorizer>,
        sync_batch_limit: usize,
    ) -> Self {
        Self {
            hub,
            engine,
            authorizer,
            sync_batch_limit,
        }
    }

    /// Route one inbound frame. Errors are the Dispatcher's own return
    /// value; the Session turns them into an `error` frame back to the
    /// sender rather than tearing down the connection (except the
    /// `Fatal`/`Overload` cases the Session itself decides on).
    pub async fn dispatch(&self, ctx: &SessionContext, frame: Frame) -> crate::error::AppResult<()> {
        let Some(inbound) = crate::frame::InboundType::parse(&frame.frame_type) else {
            if crate::frame::InboundType::is_server_only(&frame.frame_type) {
                log::debug!(
                    "session {}: ignoring server-only frame type {:?} from client",
                    ctx.session_id,
                    frame.frame_type
                );
                return Ok(());
            }
            return Err(crate::error::AppError::unknown_message_type());
        };

        use crate::frame::InboundType::*;
        match inbound {
            JoinRoom => self.handle_join_room(ctx, &frame).await,
            LeaveRoom => self.handle_leave_room(ctx).await,
            CursorMove => self.handle_cursor_move(ctx, &frame).await,
            SelectionChange => self.handle_selection_change(ctx, &frame).await,
            Operation => self.handle_operation(ctx, &frame).await,
            Batch => self.handle_batch(ctx, &frame).await,
            SyncRequest => self.handle_sync_request(ctx, &frame).await,
            Heartbeat => self.handle_heartbeat(ctx, &frame).await,
        }
    }

    async fn handle_join_room(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: JoinRoomPayload = frame.payload_as()?;

        if payload.workspace_id.is_nil() {
            return Err(crate::error::AppError::invalid_workspace_id(payload.workspace_id));
        }

        if !self
            .authorizer
            .authorize(ctx.user_id, payload.workspace_id, Role::Viewer)
            .await?
        {
            return Err(crate::error::AppError::Unauthorized);
        }

        *ctx.workspace_id.lock().await = Some(payload.workspace_id);

        let member = crate::room::Member {
            session_id: ctx.session_id,
            user_id: ctx.user_id,
            display_name: ctx.display_name.clone(),
            outbound: ctx.outbound.clone(),
            presence: ctx.presence.lock().await.clone(),
        };
        self.hub.register(payload.workspace_id, member).await
    }

    async fn handle_leave_room(&self, ctx: &SessionContext) -> crate::error::AppResult<()> {
        if let Some(workspace_id) = *ctx.workspace_id.lock().await {
            self.hub.unregister(workspace_id, ctx.session_id);
        }
        *ctx.workspace_id.lock().await = None;
        Ok(())
    }

    async fn handle_cursor_move(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: CursorMovePayload = frame.payload_as()?;
        let Some(workspace_id) = *ctx.workspace_id.lock().await else {
            return Ok(()); // not joined yet: server-only presence is a no-op
        };

        let mut presence = ctx.presence.lock().await;
        presence.update_cursor(payload.cursor.clone());
        let snapshot = presence.clone();
        drop(presence);

        let update = Frame::outbound(
            "presence_update",
            PresenceUpdatePayload {
                user_id: ctx.user_id,
                cursor: Some(payload.cursor),
                selected_element_ids: None,
            },
        )
        .with_workspace_id(workspace_id);

        self.hub
            .broadcast_presence(workspace_id, update, Some(ctx.session_id), ctx.session_id, snapshot);
        Ok(())
    }

    async fn handle_selection_change(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: SelectionChangePayload = frame.payload_as()?;
        let Some(workspace_id) = *ctx.workspace_id.lock().await else {
            return Ok(());
        };

        let mut presence = ctx.presence.lock().await;
        presence.update_selection(payload.selected_element_ids.clone());
        let snapshot = presence.clone();
        drop(presence);

        let update = Frame::outbound(
            "presence_update",
            PresenceUpdatePayload {
                user_id: ctx.user_id,
                cursor: None,
                selected_element_ids: Some(payload.selected_element_ids),
            },
        )
        .with_workspace_id(workspace_id);

        self.hub
            .broadcast_presence(workspace_id, update, Some(ctx.session_id), ctx.session_id, snapshot);
        Ok(())
    }

    async fn handle_operation(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: OperationPayload = frame.payload_as()?;
        let op = self.operation_from_payload(ctx.user_id, payload);
        let workspace_id = op.workspace_id;

        if !self
            .authorizer
            .authorize(ctx.user_id, workspace_id, Role::Editor)
            .await?
        {
            return Err(crate::error::AppError::Unauthorized);
        }

        let effect = self.engine.apply(op.clone()).await?;
        if matches!(effect, Effect::Applied | Effect::ConflictTiebroken) {
            self.hub
                .broadcast_to_room(workspace_id, operation_frame(&op), Some(ctx.session_id))
                .await;
        }
        Ok(())
    }

    async fn handle_batch(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: BatchPayload = frame.payload_as()?;
        if payload.operations.is_empty() {
            return Ok(());
        }

        let workspace_id = payload.operations[0].workspace_id;

        if !self
            .authorizer
            .authorize(ctx.user_id, workspace_id, Role::Editor)
            .await?
        {
            return Err(crate::error::AppError::Unauthorized);
        }

        let mut any_applied = false;
        let mut applied_ops = Vec::with_capacity(payload.operations.len());

        for op_payload in payload.operations {
            let op = self.operation_from_payload(ctx.user_id, op_payload);
            let effect = self.engine.apply(op.clone()).await?;
            if matches!(effect, Effect::Applied | Effect::ConflictTiebroken) {
                any_applied = true;
                applied_ops.push(operation_frame(&op).payload);
            }
        }

        if any_applied {
            let batch_frame =
                Frame::outbound("batch", serde_json::json!({ "operations": applied_ops }))
                    .with_workspace_id(workspace_id);
            self.hub
                .broadcast_to_room(workspace_id, batch_frame, Some(ctx.session_id))
                .await;
        }
        Ok(())
    }

    async fn handle_sync_request(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let payload: SyncRequestPayload = frame.payload_as()?;
        let Some(workspace_id) = *ctx.workspace_id.lock().await else {
            return Err(crate::error::AppError::InvalidInput(
                "sync_request before join_room".to_string(),
            ));
        };

        let ops = self
            .engine
            .operations_since(workspace_id, &payload.state_vector, self.sync_batch_limit)
            .await?;
        let state_vector = build_state_vector(&ops);

        let response = Frame::outbound(
            "sync_response",
            SyncResponsePayload {
                operations: ops,
                state_vector,
            },
        )
        .with_request_id(frame.request_id.clone())
        .with_workspace_id(workspace_id);

        let _ = ctx.outbound.send(response).await;
        Ok(())
    }

    async fn handle_heartbeat(&self, ctx: &SessionContext, frame: &Frame) -> crate::error::AppResult<()> {
        let pong = Frame::outbound("pong", PongPayload { server_time: Utc::now() })
            .with_request_id(frame.request_id.clone());
        let _ = ctx.outbound.send(pong).await;
        Ok(())
    }

    fn operation_from_payload(&self, user_id: UserId, payload: OperationPayload) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            workspace_id: payload.workspace_id,
            element_id: payload.element_id,
            user_id,
            op_type: payload.op_type,
            data: payload.data,
            timestamp: payload.timestamp,
            created_at: Utc::now(),
        }
    }
}
