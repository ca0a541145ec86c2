//! The Room: one per active workspace, a small state machine driven by
//! three channels (`register`, `unregister`, `broadcast`), run as its own
//! `tokio::spawn`ed loop.
//!
//! Generalizes the teacher's channel-handle idiom — a constructor that
//! spawns a task owning the receiver and hands the caller only the
//! sender(s) (see `enterprise/cluster/replication.rs`'s replication
//! manager and `enterprise/collaboration/transport.rs`'s
//! `WebSocketTransport`) — from a single mailbox to three, and from a
//! plain synchronous `Room` struct (`enterprise/realtime/room.rs`) to an
//! actor loop, since the spec requires non-blocking per-Session
//! broadcast with eviction rather than a directly-mutated members map.

use crate::frame::{Frame, UserJoinedPayload, UserLeftPayload};
use crate::model::{UserId, WorkspaceId};
use crate::presence::Presence;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A connected client as the Room sees it: just enough to route frames
/// and replay a join roster. The Session owns everything else.
pub struct Member {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub display_name: String,
    pub outbound: mpsc::Sender<Frame>,
    pub presence: Presence,
}

struct RegisterMsg {
    member: Member,
    reply: oneshot::Sender<Result<(), crate::error::AppError>>,
}

struct BroadcastMsg {
    frame: Frame,
    exclude_session_id: Option<Uuid>,
    /// When a `cursor_move`/`selection_change` broadcast passes through,
    /// the Dispatcher attaches the updated presence so the Room can keep
    /// its roster-replay state current without a fourth channel.
    presence_update: Option<(Uuid, Presence)>,
}

/// A cloneable reference to a running Room; the loop itself is owned by
/// the spawned task and is never exposed.
#[derive(Clone)]
pub struct RoomHandle {
    pub workspace_id: WorkspaceId,
    register_tx: mpsc::UnboundedSender<RegisterMsg>,
    unregister_tx: mpsc::UnboundedSender<Uuid>,
    broadcast_tx: mpsc::UnboundedSender<BroadcastMsg>,
}

impl RoomHandle {
    /// Attempt to join. Resolves to `Err(room_full)` without adding the
    /// member if the Room is already at `max_clients`.
    pub async fn register(&self, member: Member) -> Result<(), crate::error::AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let session_id = member.session_id;
        if self
            .register_tx
            .send(RegisterMsg {
                member,
                reply: reply_tx,
            })
            .is_err()
        {
            return Err(crate::error::AppError::Backend(format!(
                "room {} loop is gone",
                self.workspace_id
            )));
        }
        reply_rx.await.unwrap_or_else(|_| {
            Err(crate::error::AppError::Backend(format!(
                "room {} dropped the register reply for session {session_id}",
                self.workspace_id
            )))
        })
    }

    pub fn unregister(&self, session_id: Uuid) {
        let _ = self.unregister_tx.send(session_id);
    }

    pub fn broadcast(&self, frame: Frame, exclude_session_id: Option<Uuid>) {
        let _ = self.broadcast_tx.send(BroadcastMsg {
            frame,
            exclude_session_id,
            presence_update: None,
        });
    }

    pub fn broadcast_presence(
        &self,
        frame: Frame,
        exclude_session_id: Option<Uuid>,
        session_id: Uuid,
        presence: Presence,
    ) {
        let _ = self.broadcast_tx.send(BroadcastMsg {
            frame,
            exclude_session_id,
            presence_update: Some((session_id, presence)),
        });
    }
}

/// Spawn a Room loop for `workspace_id` and return a handle to it.
/// `reaped_tx` is signalled once the Room's periodic sweep finds its
/// members map empty and the loop exits, so the Hub can drop its
/// directory entry.
pub fn spawn(
    workspace_id: WorkspaceId,
    max_clients: usize,
    cleanup_interval: std::time::Duration,
    reaped_tx: mpsc::UnboundedSender<WorkspaceId>,
) -> RoomHandle {
    let (register_tx, mut register_rx) = mpsc::unbounded_channel::<RegisterMsg>();
    let (unregister_tx, mut unregister_rx) = mpsc::unbounded_channel::<Uuid>();
    let (broadcast_tx, mut broadcast_rx) = mpsc::unbounded_channel::<BroadcastMsg>();

    tokio::spawn(async move {
        let mut members: HashMap<Uuid, Member> = HashMap::new();
        let mut reap_tick = tokio::time::interval(cleanup_interval);
        reap_tick.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                Some(msg) = register_rx.recv() => {
                    handle_register(&mut members, max_clients, msg).await;
                }
                Some(session_id) = unregister_rx.recv() => {
                    handle_unregister(&mut members, session_id).await;
                }
                Some(msg) = broadcast_rx.recv() => {
                    handle_broadcast(&mut members, msg).await;
                }
                _ = reap_tick.tick() => {
                    if members.is_empty() {
                        let _ = reaped_tx.send(workspace_id);
                        break;
                    }
                }
                else => break,
            }
        }
    });

    RoomHandle {
        workspace_id,
        register_tx,
        unregister_tx,
        broadcast_tx,
    }
}

async fn handle_register(members: &mut HashMap<Uuid, Member>, max_clients: usize, msg: RegisterMsg) {
    let RegisterMsg { member, reply } = msg;

    if members.len() >= max_clients {
        let _ = reply.send(Err(crate::error::AppError::room_full()));
        return;
    }

    // Roster replay: one user_joined (+ presence_update, if any) per
    // existing member, before any subsequent broadcast reaches the
    // joiner.
    for existing in members.values() {
        let joined = Frame::outbound(
            "user_joined",
            UserJoinedPayload {
                user_id: existing.user_id,
                display_name: existing.display_name.clone(),
                color: existing.presence.color.clone(),
            },
        );
        let _ = member.outbound.try_send(joined);

        if let Some(cursor) = existing.presence.cursor.clone() {
            let presence_frame = Frame::outbound(
                "presence_update",
                crate::frame::PresenceUpdatePayload {
                    user_id: existing.user_id,
                    cursor: Some(cursor),
                    selected_element_ids: Some(existing.presence.selected_element_ids.clone()),
                },
            );
            let _ = member.outbound.try_send(presence_frame);
        }
    }

    let session_id = member.session_id;
    let user_id = member.user_id;
    let display_name = member.display_name.clone();
    let color = member.presence.color.clone();
    members.insert(session_id, member);
    let _ = reply.send(Ok(()));

    let joined = Frame::outbound(
        "user_joined",
        UserJoinedPayload {
            user_id,
            display_name,
            color,
        },
    );
    dispatch_broadcast(members, joined, Some(session_id));
}

async fn handle_unregister(members: &mut HashMap<Uuid, Member>, session_id: Uuid) {
    let Some(member) = members.remove(&session_id) else {
        return;
    };
    // Dropping `member.outbound` here closes the Session's writer loop.
    drop(member.outbound);

    let left = Frame::outbound("user_left", UserLeftPayload { user_id: member.user_id });
    dispatch_broadcast(members, left, Some(session_id));
}

async fn handle_broadcast(members: &mut HashMap<Uuid, Member>, msg: BroadcastMsg) {
    if let Some((session_id, presence)) = msg.presence_update {
        if let Some(member) = members.get_mut(&session_id) {
            member.presence = presence;
        }
    }
    dispatch_broadcast(members, msg.frame, msg.exclude_session_id);
}

/// Non-blocking fan-out: a full outbound queue evicts that member rather
/// than stalling the Room loop or the rest of the broadcast.
fn dispatch_broadcast(members: &mut HashMap<Uuid, Member>, frame: Frame, exclude_session_id: Option<Uuid>) {
    let mut overflowed = Vec::new();
    for (session_id, member) in members.iter() {
        if Some(*session_id) == exclude_session_id {
            continue;
        }
        if let Err(mpsc::error::TrySendError::Full(_)) = member.outbound.try_send(frame.clone()) {
            overflowed.push(*session_id);
        }
    }

    for session_id in overflowed {
        if let Some(member) = members.remove(&session_id) {
            drop(member.outbound);
            let left = Frame::outbound("user_left", UserLeftPayload { user_id: member.user_id });
            dispatch_broadcast(members, left, Some(session_id));
        }
    }
}
