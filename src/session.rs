//! The Session: one connected client's reader/writer task pair.
//!
//! Grounded on the teacher's `enterprise/collaboration/transport.rs`
//! reader/writer split (there, a client-side transport with
//! reconnection; here, the server side of one already-upgraded
//! WebSocket, since reconnection and backoff are the client's job, not
//! this server's) plus `spec.md` §4.7's exact reader/writer contract.

use crate::auth::{Authenticator, ConnectionCredential};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, SessionContext};
use crate::error::AppError;
use crate::frame::Frame;
use crate::hub::Hub;
use axum::extract::ws::{Message, WebSocket};
use futures::{FutureExt, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Drive one WebSocket connection end to end: authenticate, spawn the
/// reader and writer, and guarantee `hub.unregister` runs exactly once
/// after both exit, per the Session's cancellation invariant.
pub async fn run(
    socket: WebSocket,
    credential: ConnectionCredential,
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<Hub>,
    config: Config,
) {
    let (user_id, display_name) = match authenticator.authenticate(&credential).await {
        Ok(identity) => identity,
        Err(err) => {
            log::warn!("session: authentication failed: {err}");
            return;
        }
    };

    let session_id = Uuid::new_v4();
    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(config.session_outbound_queue);
    let ctx = Arc::new(SessionContext::new(session_id, user_id, display_name, outbound_tx));

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_config = config.clone();
    let writer = tokio::spawn(async move {
        run_writer(&mut ws_tx, outbound_rx, writer_config).await;
    });

    let reader_ctx = ctx.clone();
    let reader_config = config.clone();
    let reader_dispatcher = dispatcher.clone();
    let reader = tokio::spawn(async move {
        run_reader(&mut ws_rx, reader_ctx, reader_dispatcher, reader_config).await;
    });

    // Either task exiting is sufficient to tear down the other: dropping
    // the outbound sender (end of reader) closes the writer's channel,
    // and a closed/erroring socket ends the reader's next read.
    let _ = tokio::join!(reader, writer);

    if let Some(workspace_id) = *ctx.workspace_id.lock().await {
        hub.unregister(workspace_id, session_id);
    }
}

async fn run_reader(
    ws_rx: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
    ctx: Arc<SessionContext>,
    dispatcher: Arc<Dispatcher>,
    config: Config,
) {
    loop {
        let next = tokio::time::timeout(config.pong_wait, ws_rx.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                log::debug!("session {}: read error: {err}", ctx.session_id);
                break;
            }
            Ok(None) => break, // client closed
            Err(_) => {
                log::debug!("session {}: read-idle timeout", ctx.session_id);
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        if text.len() > config.max_frame_bytes {
            let err = AppError::InvalidInput("frame exceeds max_frame_bytes".to_string());
            let _ = ctx.outbound.send(err.to_error_frame(None).into()).await;
            continue;
        }

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                let app_err: AppError = err.into();
                let _ = ctx.outbound.send(app_err.to_error_frame(None).into()).await;
                continue;
            }
        };
        let request_id = frame.request_id.clone();

        let dispatch_result = std::panic::AssertUnwindSafe(dispatcher.dispatch(&ctx, frame))
            .catch_unwind()
            .await;

        let outcome = match dispatch_result {
            Ok(result) => result,
            Err(_) => {
                log::error!("session {}: dispatch panicked, recovering", ctx.session_id);
                Err(AppError::Fatal("dispatch panicked".to_string()))
            }
        };

        if let Err(err) = outcome {
            let _ = ctx.outbound.send(err.to_error_frame(request_id).into()).await;
        }
    }
}

async fn run_writer(
    ws_tx: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    mut outbound_rx: mpsc::Receiver<Frame>,
    config: Config,
) {
    let mut keepalive = tokio::time::interval(config.ping_period);
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break }; // queue closed by the Room
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if write_with_deadline(ws_tx, Message::Text(text), config.write_wait).await.is_err() {
                    break;
                }
            }
            _ = keepalive.tick() => {
                if write_with_deadline(ws_tx, Message::Ping(Vec::new()), config.write_wait).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}

async fn write_with_deadline(
    ws_tx: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    message: Message,
    deadline: std::time::Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(deadline, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

impl From<crate::error::ErrorFrame> for Frame {
    fn from(err: crate::error::ErrorFrame) -> Self {
        Frame::outbound(err.frame_type, err.payload).with_request_id(err.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_converts_to_wire_frame() {
        let err = AppError::unknown_message_type();
        let frame: Frame = err.to_error_frame(Some("r1".to_string())).into();
        assert_eq!(frame.frame_type, "error");
        assert_eq!(frame.request_id.as_deref(), Some("r1"));
        assert_eq!(frame.payload["code"], "unknown_message_type");
    }
}
