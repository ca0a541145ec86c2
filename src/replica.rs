//! Cross-replica pub/sub bridge.
//!
//! `ReplicaBus` abstracts the one thing the Hub needs from a message
//! bus: publish an envelope on a workspace channel, and a stream of
//! envelopes published by any replica. The Redis-backed implementation
//! is grounded on `scheduling/queue.rs`'s existing
//! `redis::aio::ConnectionManager` usage (there, a job queue; here,
//! pub/sub) — the same connection-manager-over-a-`Client` idiom, reused
//! for a different Redis feature. The in-process implementation lets the
//! whole system run, and its tests pass, without a live Redis instance.

use crate::error::{AppError, AppResult};
use crate::model::{UserId, WorkspaceId};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What travels on `workspace:<uuid>`, per the wire spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaEnvelope {
    pub workspace_id: WorkspaceId,
    pub exclude_session_id: Option<UserId>,
    pub message: crate::frame::Frame,
}

fn channel_name(workspace_id: WorkspaceId) -> String {
    format!("workspace:{workspace_id}")
}

#[async_trait]
pub trait ReplicaBus: Send + Sync {
    async fn publish(&self, envelope: ReplicaEnvelope) -> AppResult<()>;

    /// Subscribe to every workspace channel. Each item is one envelope
    /// published by any replica (including, in principle, this one —
    /// the Hub is responsible for not re-broadcasting what it itself
    /// just published locally before publishing remotely).
    async fn subscribe(&self) -> AppResult<broadcast::Receiver<ReplicaEnvelope>>;
}

/// In-process fan-out used for single-replica deployments and tests.
/// `publish` and `subscribe` both go through the same
/// `tokio::sync::broadcast` channel, so every subscriber sees every
/// publish exactly once, in publish order.
pub struct InProcessReplicaBus {
    tx: broadcast::Sender<ReplicaEnvelope>,
}

impl InProcessReplicaBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self { tx }
    }
}

impl Default for InProcessReplicaBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaBus for InProcessReplicaBus {
    async fn publish(&self, envelope: ReplicaEnvelope) -> AppResult<()> {
        // No active subscribers is not an error — it just means no other
        // local Hub instance is listening yet.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<broadcast::Receiver<ReplicaEnvelope>> {
        Ok(self.tx.subscribe())
    }
}

/// Redis-backed implementation for multi-replica deployments.
pub struct RedisReplicaBus {
    client: redis::Client,
    // Held once and cloned per publish; `ConnectionManager` multiplexes
    // commands over one connection and reconnects it transparently, so
    // `publish` never pays a fresh-connection round trip.
    manager: redis::aio::ConnectionManager,
    // Fan the Redis pub/sub stream into the same broadcast primitive the
    // in-process bus uses, so `Hub` only ever deals with one shape.
    local: broadcast::Sender<ReplicaEnvelope>,
}

impl RedisReplicaBus {
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Backend(format!("invalid redis url: {e}")))?;
        let manager = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| AppError::Backend(format!("redis connection manager: {e}")))?;
        let (local, _rx) = broadcast::channel(1024);
        let bus = Self { client, manager, local };
        bus.spawn_listener()?;
        Ok(bus)
    }

    fn spawn_listener(&self) -> AppResult<()> {
        let client = self.client.clone();
        let local = self.local.clone();
        tokio::spawn(async move {
            loop {
                match client.get_async_connection().await {
                    Ok(conn) => {
                        let mut pubsub = conn.into_pubsub();
                        if pubsub.psubscribe("workspace:*").await.is_err() {
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        while let Some(msg) = stream.next().await {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(_) => continue,
                            };
                            if let Ok(envelope) =
                                serde_json::from_str::<ReplicaEnvelope>(&payload)
                            {
                                let _ = local.send(envelope);
                            }
                        }
                    }
                    Err(_) => {
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl ReplicaBus for RedisReplicaBus {
    async fn publish(&self, envelope: ReplicaEnvelope) -> AppResult<()> {
        let mut manager = self.manager.clone();
        let payload = serde_json::to_string(&envelope)?;
        redis::cmd("PUBLISH")
            .arg(channel_name(envelope.workspace_id))
            .arg(payload)
            .query_async::<_, ()>(&mut manager)
            .await
            .map_err(|e| AppError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<broadcast::Receiver<ReplicaEnvelope>> {
        Ok(self.local.subscribe())
    }
}
