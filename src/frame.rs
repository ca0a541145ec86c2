//! The wire protocol: a single JSON envelope shape carried over the
//! transport in both directions, with a type tag and an opaque payload.
//!
//! Grounded on the teacher's `enterprise/collaboration/protocol.rs`
//! (`CollaborationMessage`/`MessageType` tag-and-payload split), adapted
//! from its length-prefixed bincode framing to plain JSON over a
//! text/binary WebSocket message, per the spec's transport frame.

use crate::model::{ElementId, LamportTimestamp, OpKind, UserId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The envelope every frame is carried in, inbound or outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Build a server-originated frame with no envelope identity fields
    /// beyond the type and payload — callers fill in `request_id` when
    /// replying to a specific inbound frame.
    pub fn outbound(frame_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            frame_type: frame_type.into(),
            user_id: None,
            workspace_id: None,
            timestamp: Some(Utc::now()),
            request_id: None,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_workspace_id(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    /// Deserialize `payload` into a typed struct, mapping the failure to
    /// the `invalid_payload` wire code via `AppError`'s `serde_json::Error`
    /// conversion.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> crate::error::AppResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(Into::into)
    }
}

/// Recognised inbound frame types. The Dispatcher matches on the raw
/// string rather than deserializing into this enum directly, since an
/// unrecognised `type` must still produce a well-formed `error` frame
/// instead of a deserialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundType {
    JoinRoom,
    LeaveRoom,
    CursorMove,
    SelectionChange,
    Operation,
    Batch,
    SyncRequest,
    Heartbeat,
}

impl InboundType {
    pub fn parse(frame_type: &str) -> Option<Self> {
        match frame_type {
            "join_room" => Some(Self::JoinRoom),
            "leave_room" => Some(Self::LeaveRoom),
            "cursor_move" => Some(Self::CursorMove),
            "selection_change" => Some(Self::SelectionChange),
            "operation" => Some(Self::Operation),
            "batch" => Some(Self::Batch),
            "sync_request" => Some(Self::SyncRequest),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// `true` for a `type` the server only ever sends, never accepts.
    /// A client echoing one back (e.g. a naive relay) is routine, not
    /// an error: the dispatch table calls for logging and ignoring it.
    pub fn is_server_only(frame_type: &str) -> bool {
        matches!(
            frame_type,
            "user_joined" | "presence_update" | "sync_response" | "pong"
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomPayload {
    pub workspace_id: WorkspaceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorMovePayload {
    pub cursor: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionChangePayload {
    pub selected_element_ids: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPayload {
    pub workspace_id: WorkspaceId,
    pub element_id: ElementId,
    pub op_type: OpKind,
    pub timestamp: LamportTimestamp,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchPayload {
    pub operations: Vec<OperationPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequestPayload {
    #[serde(default)]
    pub state_vector: std::collections::HashMap<UserId, LamportTimestamp>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponsePayload {
    pub operations: Vec<crate::model::Operation>,
    pub state_vector: std::collections::HashMap<UserId, LamportTimestamp>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceUpdatePayload {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_element_ids: Option<Vec<ElementId>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserJoinedPayload {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserLeftPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongPayload {
    pub server_time: DateTime<Utc>,
}

/// Build the outbound `operation` frame broadcast after a successful
/// apply — the original client operation id travels along so peers can
/// correlate it, even though it carries no wire meaning of its own.
pub fn operation_frame(op: &crate::model::Operation) -> Frame {
    Frame::outbound(
        "operation",
        OperationPayload {
            workspace_id: op.workspace_id,
            element_id: op.element_id,
            op_type: op.op_type,
            timestamp: op.timestamp,
            data: op.data.clone(),
        },
    )
    .with_workspace_id(op.workspace_id)
}
