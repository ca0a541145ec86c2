//! The Hub: directory of active Rooms plus the cross-replica bridge.
//!
//! The workspace→Room directory uses `dashmap::DashMap` — the teacher's
//! own dependency, used elsewhere (e.g. connection/session registries
//! across `enterprise/`) for exactly this "readers-writer, many
//! concurrent lookups, occasional insert/remove" access pattern — in
//! place of a hand-rolled `RwLock<HashMap<_>>`.

use crate::config::Config;
use crate::frame::Frame;
use crate::replica::{ReplicaBus, ReplicaEnvelope};
use crate::room::{self, Member, RoomHandle};
use crate::model::WorkspaceId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct Hub {
    rooms: DashMap<WorkspaceId, RoomHandle>,
    bus: Arc<dyn ReplicaBus>,
    config: Config,
    reaped_tx: mpsc::UnboundedSender<WorkspaceId>,
}

impl Hub {
    /// Construct a Hub and start its replica-subscriber loop and its
    /// reaped-room sweeper. `config` supplies `max_clients_per_room` and
    /// `room_cleanup_interval` for every Room it spawns.
    pub fn new(bus: Arc<dyn ReplicaBus>, config: Config) -> Arc<Self> {
        let (reaped_tx, mut reaped_rx) = mpsc::unbounded_channel();

        let hub = Arc::new(Self {
            rooms: DashMap::new(),
            bus,
            config,
            reaped_tx,
        });

        let sweeper = hub.clone();
        tokio::spawn(async move {
            while let Some(workspace_id) = reaped_rx.recv().await {
                // Remove only if the entry is still the Room that
                // reaped itself — a fresh join could have raced in and
                // replaced it with a new Room between the reap decision
                // and this removal.
                sweeper.rooms.remove_if(&workspace_id, |_, handle| {
                    handle.workspace_id == workspace_id
                });
            }
        });

        let subscriber = hub.clone();
        tokio::spawn(async move {
            subscriber.run_replica_subscriber().await;
        });

        hub
    }

    async fn run_replica_subscriber(self: Arc<Self>) {
        let mut rx = match self.bus.subscribe().await {
            Ok(rx) => rx,
            Err(err) => {
                log::error!("hub: failed to subscribe to replica bus: {err}");
                return;
            }
        };
        loop {
            match rx.recv().await {
                Ok(envelope) => self.deliver_local_only(envelope),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("hub: replica subscriber lagged by {n} messages");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Apply an envelope that arrived from the replica bus: local-only
    /// broadcast, no re-publish, same exclusion tag as the origin.
    fn deliver_local_only(&self, envelope: ReplicaEnvelope) {
        if let Some(room) = self.rooms.get(&envelope.workspace_id) {
            room.broadcast(envelope.message, envelope.exclude_session_id);
        }
        // Silently dropped if the Room doesn't exist locally — there's
        // no member to notify.
    }

    /// Look up or create the Room for `workspace_id`, then register
    /// `member` into it.
    pub async fn register(&self, workspace_id: WorkspaceId, member: Member) -> Result<(), crate::error::AppError> {
        let room = self.room_or_create(workspace_id);
        room.register(member).await
    }

    pub fn unregister(&self, workspace_id: WorkspaceId, session_id: Uuid) {
        if let Some(room) = self.rooms.get(&workspace_id) {
            room.unregister(session_id);
        }
    }

    /// Broadcast locally and publish to the replica bus in the same
    /// call, so peers on other replicas see it too.
    pub async fn broadcast_to_room(
        &self,
        workspace_id: WorkspaceId,
        frame: Frame,
        exclude_session_id: Option<Uuid>,
    ) {
        if let Some(room) = self.rooms.get(&workspace_id) {
            room.broadcast(frame.clone(), exclude_session_id);
        }

        let envelope = ReplicaEnvelope {
            workspace_id,
            exclude_session_id,
            message: frame,
        };
        if let Err(err) = self.bus.publish(envelope).await {
            log::warn!("hub: failed to publish to replica bus for {workspace_id}: {err}");
        }
    }

    /// Same as `broadcast_to_room`, but also records the session's
    /// updated presence on the Room for future join-roster replay.
    pub fn broadcast_presence(
        &self,
        workspace_id: WorkspaceId,
        frame: Frame,
        exclude_session_id: Option<Uuid>,
        session_id: Uuid,
        presence: crate::presence::Presence,
    ) {
        if let Some(room) = self.rooms.get(&workspace_id) {
            room.broadcast_presence(frame, exclude_session_id, session_id, presence);
        }
    }

    fn room_or_create(&self, workspace_id: WorkspaceId) -> RoomHandle {
        self.rooms
            .entry(workspace_id)
            .or_insert_with(|| {
                room::spawn(
                    workspace_id,
                    self.config.max_clients_per_room,
                    self.config.room_cleanup_interval,
                    self.reaped_tx.clone(),
                )
            })
            .clone()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Presence;
    use crate::replica::InProcessReplicaBus;

    fn member(user_id: Uuid, capacity: usize) -> (Member, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Member {
                session_id: Uuid::new_v4(),
                user_id,
                display_name: "tester".to_string(),
                outbound: tx,
                presence: Presence::new(user_id, "tester".to_string()),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn register_creates_room_lazily() {
        let hub = Hub::new(Arc::new(InProcessReplicaBus::new()), Config::default());
        let ws = Uuid::new_v4();
        let (m, _rx) = member(Uuid::new_v4(), 8);
        hub.register(ws, m).await.unwrap();
        assert_eq!(hub.room_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_silently_drops_for_absent_room() {
        let hub = Hub::new(Arc::new(InProcessReplicaBus::new()), Config::default());
        // No panics, no error: just a no-op local broadcast plus a bus publish.
        hub.broadcast_to_room(Uuid::new_v4(), Frame::outbound("operation", serde_json::json!({})), None)
            .await;
    }

    #[tokio::test]
    async fn cross_replica_envelope_reaches_local_room_once() {
        let bus = Arc::new(InProcessReplicaBus::new());
        let hub = Hub::new(bus.clone(), Config::default());

        let ws = Uuid::new_v4();
        let (m, mut rx) = member(Uuid::new_v4(), 8);
        hub.register(ws, m).await.unwrap();
        let _ = rx.try_recv(); // drain the user_joined frame

        bus.publish(ReplicaEnvelope {
            workspace_id: ws,
            exclude_session_id: None,
            message: Frame::outbound("operation", serde_json::json!({"from": "replica"})),
        })
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let frame = rx.try_recv().expect("local member should receive replica broadcast");
        assert_eq!(frame.frame_type, "operation");
    }
}
