use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::dispatch::dispatch;
use crate::ws::messages::actions;
use crate::ws::session::ConnSession;

/// WebSocket routes
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/sig/v1/rtc", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection pump: a reader task, a writer task and this dispatcher,
/// joined by bounded queues and one shared cancellation token. The
/// dispatcher processes inbound frames strictly serially, so within one
/// connection messages are handled in arrival order. Backpressure is the
/// bounded outbound queue: a consistently slow reader on the far end stalls
/// only its own connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    tracing::info!(conn_id = %conn_id, "client connected");

    let cancel = CancellationToken::new();
    let queue_size = state.config.outbound_queue_size;
    let (in_tx, in_rx) = mpsc::channel::<String>(queue_size);
    let (out_tx, out_rx) = mpsc::channel::<String>(queue_size);
    let last_pong = Arc::new(AtomicI64::new(Utc::now().timestamp()));

    let (ws_sender, ws_receiver) = socket.split();

    let reader = tokio::spawn(read_loop(
        ws_receiver,
        in_tx,
        cancel.clone(),
        last_pong.clone(),
    ));
    let writer = tokio::spawn(write_loop(
        ws_sender,
        out_rx,
        cancel.clone(),
        last_pong,
        state.config.heartbeat_interval_secs,
        state.config.heartbeat_timeout_secs,
    ));

    let mut session = ConnSession::new(conn_id);
    dispatch_loop(&state, &mut session, &out_tx, &cancel, in_rx).await;

    // Closing: wake every task, wait for them, then detach from the room.
    cancel.cancel();
    let _ = reader.await;
    let _ = writer.await;

    close_session(&state, &mut session).await;
    tracing::info!(conn_id = %conn_id, "client disconnected");
}

/// Blocks on the next inbound frame and forwards text frames to the
/// dispatcher queue. Any read error or close frame cancels the shared token.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    in_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    last_pong: Arc<AtomicI64>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = in_tx.send(text.to_string()) => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Ok(Message::Pong(_))) => {
                last_pong.store(Utc::now().timestamp(), Ordering::Relaxed);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read failed");
                break;
            }
        }
    }

    cancel.cancel();
}

/// Drains the outbound queue into the socket. The heartbeat rides the same
/// select: a periodic ping plus a liveness deadline on the last observed
/// pong; missing the deadline forces the connection closed.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    last_pong: Arc<AtomicI64>,
    interval_secs: u64,
    timeout_secs: u64,
) {
    let mut heartbeat = tokio::time::interval(Duration::from_secs(interval_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = out_rx.recv() => match frame {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                let age = Utc::now().timestamp() - last_pong.load(Ordering::Relaxed);
                if age > timeout_secs as i64 {
                    tracing::warn!(age, "liveness deadline missed");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = sender.close().await;
}

/// Serial dispatcher: one frame at a time, no concurrent handler execution
/// per connection. A fatal protocol error ends the loop.
async fn dispatch_loop(
    state: &AppState,
    session: &mut ConnSession,
    out_tx: &mpsc::Sender<String>,
    cancel: &CancellationToken,
    mut in_rx: mpsc::Receiver<String>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = in_rx.recv() => frame,
        };

        let Some(text) = frame else { break };

        if let Err(e) = dispatch(state, session, out_tx, cancel, &text).await {
            tracing::warn!(
                conn_id = %session.conn_id,
                error = %e,
                "closing connection after protocol error"
            );
            break;
        }
    }
}

/// Runs once after the pump winds down. The leave broadcast uses a fresh
/// token: the connection's own token is already cancelled at this point and
/// the departure must not cancel the notification reporting it. If the
/// detach empties the room, its deletion is signalled to the registry
/// reaper rather than performed here.
pub(crate) async fn close_session(state: &AppState, session: &mut ConnSession) {
    let fresh = CancellationToken::new();

    if let Some(joined) = session.joined.take() {
        let peer = joined
            .room
            .get(joined.participant.user_id)
            .unwrap_or(joined.participant);

        joined.room.remove(session.conn_id);
        joined
            .room
            .notify(&fresh, &peer, actions::LEAVE_EVENT, None, None)
            .await;

        tracing::info!(
            room = %joined.room.name(),
            user_id = peer.user_id,
            "participant left"
        );

        if joined.room.is_empty() {
            state.registry.schedule_delete(joined.room.name());
        }
    }

    if let Some(registered) = session.device.take() {
        registered.room.remove_device(session.conn_id);

        tracing::info!(
            room = %registered.room.name(),
            device_id = %registered.device.id,
            "device detached"
        );

        if registered.room.is_empty() {
            state.registry.schedule_delete(registered.room.name());
        }
    }
}
