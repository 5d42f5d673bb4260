use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::rooms::{Device, Participant, RingStatus, Room};
use crate::state::AppState;
use crate::ws::messages::{
    actions, ChangeStatePayload, ControlPayload, Envelope, InviteUsersPayload, JoinPayload,
    JoinResponse, PreconnectPayload, PreconnectResponse, PublishPayload, RingPayload,
};
use crate::ws::session::{ConnSession, JoinedRoom, RegisteredDevice};

/// Decodes one inbound frame, runs the matching action handler and queues
/// the reply. Recoverable failures become error replies and keep the
/// connection open; a fatal error is propagated so the pump tears the
/// connection down.
pub async fn dispatch(
    state: &AppState,
    session: &mut ConnSession,
    out: &mpsc::Sender<String>,
    cancel: &CancellationToken,
    raw: &str,
) -> Result<()> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    let action = envelope
        .msg
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    tracing::debug!(conn_id = %session.conn_id, action = %action, "dispatching");

    let result = match action.as_str() {
        actions::JOIN => handle_join(state, session, out, cancel, envelope.msg).await,
        actions::PRECONNECT => handle_preconnect(state, session, out, envelope.msg).await,
        actions::ACCEPT => handle_ring(state, cancel, envelope.msg, RingStatus::Accept).await,
        actions::DECLINE => handle_ring(state, cancel, envelope.msg, RingStatus::Decline).await,
        actions::BUSY => handle_ring(state, cancel, envelope.msg, RingStatus::Busy).await,
        actions::PUBLISH => handle_publish(state, cancel, envelope.msg).await,
        actions::CHANGE_STATE => handle_change_state(state, cancel, envelope.msg).await,
        actions::INVITE_USERS => handle_invite_users(state, cancel, envelope.msg).await,
        actions::CONTROL | actions::CUSTOM => {
            handle_control(state, cancel, &action, envelope.msg).await
        }
        _ => Err(AppError::UnknownAction(action.clone())),
    };

    let reply = match result {
        Ok(body) => json!({ "tid": envelope.tid, "msg": body }),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            tracing::warn!(conn_id = %session.conn_id, action = %action, error = %e, "action rejected");
            json!({
                "tid": envelope.tid,
                "msg": { "error": { "code": e.code(), "message": e.to_string() } },
            })
        }
    };

    send_frame(out, cancel, &reply).await;
    Ok(())
}

async fn send_frame(out: &mpsc::Sender<String>, cancel: &CancellationToken, value: &Value) {
    let frame = value.to_string();
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = out.send(frame) => {}
    }
}

async fn handle_join(
    state: &AppState,
    session: &mut ConnSession,
    out: &mpsc::Sender<String>,
    cancel: &CancellationToken,
    msg: Value,
) -> Result<Value> {
    let payload: JoinPayload = serde_json::from_value(msg)?;

    let room = state.registry.load_or_create(&payload.room);
    room.authorize(&payload.token)?;

    let participant = Participant {
        conn_id: session.conn_id,
        out: out.clone(),
        user_id: payload.user_id,
        first_name: payload.first_name,
        last_name: payload.last_name,
        status: payload.status,
        photo: payload.photo,
        publishing: false,
        state: payload.state,
    };

    room.add(participant.clone())?;
    session.joined = Some(JoinedRoom {
        room: room.clone(),
        participant: participant.clone(),
    });

    tracing::info!(room = %payload.room, user_id = payload.user_id, "participant joined");

    let snapshot = room.snapshot();

    spawn_notify(room, participant.clone(), cancel, actions::JOIN, None, None);

    Ok(serde_json::to_value(JoinResponse {
        action: actions::JOIN,
        room: payload.room,
        this: participant,
        participants: snapshot.participants,
        invited_participants: snapshot.invited,
        started_at: snapshot.started_at,
    })?)
}

async fn handle_preconnect(
    state: &AppState,
    session: &mut ConnSession,
    out: &mpsc::Sender<String>,
    msg: Value,
) -> Result<Value> {
    let payload: PreconnectPayload = serde_json::from_value(msg)?;

    let room = state.registry.load_or_create(&payload.room);
    room.authorize(&payload.token)?;

    let device = Device {
        conn_id: session.conn_id,
        out: out.clone(),
        user_id: payload.user_id,
        id: payload.device_id.clone(),
        status: None,
    };

    room.add_device(device.clone())?;
    session.device = Some(RegisteredDevice {
        room: room.clone(),
        device,
    });

    tracing::info!(
        room = %payload.room,
        user_id = payload.user_id,
        device_id = %payload.device_id,
        "device registered"
    );

    let history = room.ring_history(payload.user_id);

    Ok(serde_json::to_value(PreconnectResponse {
        action: actions::PRECONNECT,
        room: payload.room,
        history,
    })?)
}

async fn handle_ring(
    state: &AppState,
    cancel: &CancellationToken,
    msg: Value,
    status: RingStatus,
) -> Result<Value> {
    let payload: RingPayload = serde_json::from_value(msg)?;

    let room = state.registry.get(&payload.room)?;
    let device = room.set_ring_status(payload.user_id, &payload.device_id, status)?;

    let cancel = cancel.clone();
    tokio::spawn(async move {
        room.notify_preconnect(&cancel, &device, status.as_str()).await;
    });

    Ok(Value::Null)
}

async fn handle_publish(
    state: &AppState,
    cancel: &CancellationToken,
    msg: Value,
) -> Result<Value> {
    let payload: PublishPayload = serde_json::from_value(msg)?;

    let room = state.registry.get(&payload.room)?;
    let participant = room.set_publishing(payload.user_id, true)?;

    spawn_notify(room, participant, cancel, actions::PUBLISH, None, None);

    if state.media.is_configured() {
        let media = state.media.clone();
        let body = json!({ "room": payload.room, "userId": payload.user_id });
        tokio::spawn(async move {
            if let Err(e) = media.post("/v1/publish", &body).await {
                tracing::warn!(error = %e, "media server publish notification failed");
            }
        });
    }

    Ok(Value::Null)
}

async fn handle_change_state(
    state: &AppState,
    cancel: &CancellationToken,
    msg: Value,
) -> Result<Value> {
    let payload: ChangeStatePayload = serde_json::from_value(msg)?;

    let room = state.registry.get(&payload.room)?;
    let participant = room.change_state(payload.user_id, payload.state)?;

    spawn_notify(room, participant, cancel, actions::CHANGE_STATE, None, None);

    Ok(Value::Null)
}

async fn handle_invite_users(
    state: &AppState,
    cancel: &CancellationToken,
    msg: Value,
) -> Result<Value> {
    let payload: InviteUsersPayload = serde_json::from_value(msg)?;

    let room = state.registry.get(&payload.room)?;
    let inviter = room.get(payload.user_id)?;

    for invited in payload.participants {
        room.add_invited(invited);
    }

    spawn_notify(room, inviter, cancel, actions::INVITE_USERS, None, None);

    Ok(Value::Null)
}

/// Opaque passthrough: no room mutation, just a broadcast carrying the
/// free-form `call`/`data` fields under the triggering action's name.
async fn handle_control(
    state: &AppState,
    cancel: &CancellationToken,
    action: &str,
    msg: Value,
) -> Result<Value> {
    let payload: ControlPayload = serde_json::from_value(msg)?;

    let room = state.registry.get(&payload.room)?;
    let participant = room.get(payload.user_id)?;

    spawn_notify(room, participant, cancel, action, payload.call, payload.data);

    Ok(Value::Null)
}

/// Broadcasts run as independent fire-and-forget tasks so a slow peer can
/// never stall the sender's own request/response turnaround.
fn spawn_notify(
    room: Arc<Room>,
    peer: Participant,
    cancel: &CancellationToken,
    event: &str,
    call: Option<String>,
    data: Option<String>,
) {
    let cancel = cancel.clone();
    let event = event.to_string();
    tokio::spawn(async move {
        room.notify(&cancel, &peer, &event, call, data).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use uuid::Uuid;

    fn test_state() -> AppState {
        AppState::new(Config::default())
    }

    struct Client {
        session: ConnSession,
        out_tx: mpsc::Sender<String>,
        out_rx: mpsc::Receiver<String>,
        cancel: CancellationToken,
    }

    impl Client {
        fn new() -> Self {
            let (out_tx, out_rx) = mpsc::channel(16);
            Self {
                session: ConnSession::new(Uuid::new_v4()),
                out_tx,
                out_rx,
                cancel: CancellationToken::new(),
            }
        }

        async fn send(&mut self, state: &AppState, raw: &str) -> Result<()> {
            dispatch(state, &mut self.session, &self.out_tx, &self.cancel, raw).await
        }

        /// Next queued frame, parsed. Broadcasts arrive from spawned tasks,
        /// so this waits rather than polling.
        async fn recv(&mut self) -> Value {
            let frame = tokio::time::timeout(Duration::from_secs(1), self.out_rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("channel closed");
            serde_json::from_str(&frame).unwrap()
        }

        fn try_recv(&mut self) -> Option<Value> {
            self.out_rx
                .try_recv()
                .ok()
                .map(|frame| serde_json::from_str(&frame).unwrap())
        }
    }

    fn join_msg(tid: &str, room: &str, token: &str, user_id: i64) -> String {
        json!({
            "tid": tid,
            "msg": {
                "action": "join",
                "room": room,
                "token": token,
                "userId": user_id,
                "firstName": format!("user{user_id}"),
                "lastName": "test",
                "isMicroOn": true,
                "isCameraOn": true,
                "batteryLife": 0.9,
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn two_clients_join_and_first_is_notified() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        // First join: alone in the room, no startedAt yet.
        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        let reply = c1.recv().await;
        assert_eq!(reply["tid"], "t-1");
        assert_eq!(reply["msg"]["self"]["userId"], 1);
        assert_eq!(reply["msg"]["participants"].as_array().unwrap().len(), 1);
        assert!(reply["msg"]["startedAt"].is_null());

        // Second join starts the call.
        c2.send(&state, &join_msg("t-2", "R1", "T", 2)).await.unwrap();
        let reply = c2.recv().await;
        assert_eq!(reply["tid"], "t-2");
        assert_eq!(reply["msg"]["participants"].as_array().unwrap().len(), 2);
        assert!(reply["msg"]["startedAt"].is_i64());

        // First client learns about the second via the broadcast.
        let broadcast = c1.recv().await;
        assert_eq!(broadcast["msg"]["action"], "notify");
        assert_eq!(broadcast["msg"]["event"], "join");
        assert_eq!(broadcast["msg"]["peer"]["userId"], 2);
        assert_eq!(broadcast["msg"]["self"]["userId"], 1);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_without_mutation_or_broadcast() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;

        c2.send(&state, &join_msg("t-2", "R1", "wrong", 2)).await.unwrap();
        let reply = c2.recv().await;
        assert_eq!(reply["tid"], "t-2");
        assert_eq!(reply["msg"]["error"]["code"], "invalid_token");

        let room = state.registry.get("R1").unwrap();
        assert_eq!(room.snapshot().participants.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(c1.try_recv().is_none(), "rejected join must not broadcast");
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_and_connection_survives() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;

        c2.send(&state, &join_msg("t-2", "R1", "T", 1)).await.unwrap();
        let reply = c2.recv().await;
        assert_eq!(reply["msg"]["error"]["code"], "duplicate_participant");

        // Same connection can retry with a different identity.
        c2.send(&state, &join_msg("t-3", "R1", "T", 2)).await.unwrap();
        let reply = c2.recv().await;
        assert_eq!(reply["msg"]["self"]["userId"], 2);
    }

    #[tokio::test]
    async fn actions_on_unknown_room_are_rejected() {
        let state = test_state();
        let mut c1 = Client::new();

        let raw = json!({
            "tid": "t-1",
            "msg": { "action": "publish", "room": "nope", "userId": 1 },
        })
        .to_string();
        c1.send(&state, &raw).await.unwrap();

        let reply = c1.recv().await;
        assert_eq!(reply["msg"]["error"]["code"], "room_not_found");
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_without_broadcast() {
        let state = test_state();
        let mut c1 = Client::new();

        let raw = json!({
            "tid": "t-1",
            "msg": { "action": "teleport", "room": "R1" },
        })
        .to_string();
        c1.send(&state, &raw).await.unwrap();

        let reply = c1.recv().await;
        assert_eq!(reply["tid"], "t-1");
        assert_eq!(reply["msg"]["error"]["code"], "unknown_action");
    }

    #[tokio::test]
    async fn malformed_frame_is_fatal() {
        let state = test_state();
        let mut c1 = Client::new();

        let err = c1.send(&state, "{not json").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn publish_marks_participant_and_notifies_peers() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;
        c2.send(&state, &join_msg("t-2", "R1", "T", 2)).await.unwrap();
        c2.recv().await;
        c1.recv().await; // drain the join broadcast

        let raw = json!({
            "tid": "t-3",
            "msg": { "action": "publish", "room": "R1", "userId": 1 },
        })
        .to_string();
        c1.send(&state, &raw).await.unwrap();
        let reply = c1.recv().await;
        assert!(reply["msg"].is_null());

        let broadcast = c2.recv().await;
        assert_eq!(broadcast["msg"]["event"], "publish");
        assert_eq!(broadcast["msg"]["peer"]["publishing"], true);
    }

    #[tokio::test]
    async fn change_state_overwrites_and_notifies() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;
        c2.send(&state, &join_msg("t-2", "R1", "T", 2)).await.unwrap();
        c2.recv().await;
        c1.recv().await;

        let raw = json!({
            "tid": "t-3",
            "msg": {
                "action": "changeState",
                "room": "R1",
                "userId": 2,
                "isMicroOn": false,
                "isSpeakerOn": true,
                "cameraType": "front",
                "batteryLife": 0.25,
            },
        })
        .to_string();
        c2.send(&state, &raw).await.unwrap();
        c2.recv().await;

        let broadcast = c1.recv().await;
        assert_eq!(broadcast["msg"]["event"], "changeState");
        assert_eq!(broadcast["msg"]["peer"]["isSpeakerOn"], true);
        assert_eq!(broadcast["msg"]["peer"]["cameraType"], "front");
    }

    #[tokio::test]
    async fn invite_users_appends_and_join_consumes() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;

        let raw = json!({
            "tid": "t-2",
            "msg": {
                "action": "inviteUsers",
                "room": "R1",
                "userId": 1,
                "participants": [
                    { "userId": 2, "firstName": "b", "lastName": "c", "status": null, "photo": null },
                ],
            },
        })
        .to_string();
        c1.send(&state, &raw).await.unwrap();
        c1.recv().await;

        let room = state.registry.get("R1").unwrap();
        assert_eq!(room.snapshot().invited.len(), 1);

        c2.send(&state, &join_msg("t-3", "R1", "T", 2)).await.unwrap();
        let reply = c2.recv().await;
        assert!(reply["msg"]["invitedParticipants"].as_array().unwrap().is_empty());
        assert_eq!(reply["msg"]["participants"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn control_passes_call_and_data_through() {
        let state = test_state();
        let mut c1 = Client::new();
        let mut c2 = Client::new();

        c1.send(&state, &join_msg("t-1", "R1", "T", 1)).await.unwrap();
        c1.recv().await;
        c2.send(&state, &join_msg("t-2", "R1", "T", 2)).await.unwrap();
        c2.recv().await;
        c1.recv().await;

        let raw = json!({
            "tid": "t-3",
            "msg": {
                "action": "control",
                "room": "R1",
                "userId": 1,
                "call": "mute",
                "data": "{\"target\":2}",
            },
        })
        .to_string();
        c1.send(&state, &raw).await.unwrap();
        c1.recv().await;

        let broadcast = c2.recv().await;
        assert_eq!(broadcast["msg"]["event"], "control");
        assert_eq!(broadcast["msg"]["call"], "mute");
        assert_eq!(broadcast["msg"]["data"], "{\"target\":2}");
    }

    #[tokio::test]
    async fn preconnect_accept_fans_out_to_sibling_device() {
        let state = test_state();
        let mut d1 = Client::new();
        let mut d2 = Client::new();

        let preconnect = |tid: &str, device_id: &str| {
            json!({
                "tid": tid,
                "msg": {
                    "action": "preconnect",
                    "room": "R1",
                    "token": "T",
                    "userId": 5,
                    "deviceId": device_id,
                },
            })
            .to_string()
        };

        d1.send(&state, &preconnect("t-1", "d1")).await.unwrap();
        let reply = d1.recv().await;
        assert_eq!(reply["msg"]["action"], "preconnect");
        assert!(reply["msg"]["history"].is_null());

        d2.send(&state, &preconnect("t-2", "d2")).await.unwrap();
        d2.recv().await;

        let raw = json!({
            "tid": "t-3",
            "msg": { "action": "accept", "room": "R1", "userId": 5, "deviceId": "d1" },
        })
        .to_string();
        d1.send(&state, &raw).await.unwrap();
        d1.recv().await;

        let broadcast = d2.recv().await;
        assert_eq!(broadcast["msg"]["action"], "notify");
        assert_eq!(broadcast["msg"]["event"], "accept");
        assert_eq!(broadcast["msg"]["userId"], 5);
        assert_eq!(broadcast["msg"]["deviceId"], "d1");

        // A device preconnecting afterwards sees the accept in its history.
        let mut d3 = Client::new();
        d3.send(&state, &preconnect("t-4", "d3")).await.unwrap();
        let reply = d3.recv().await;
        assert_eq!(reply["msg"]["history"]["id"], "d1");
        assert_eq!(reply["msg"]["history"]["status"], "accept");
    }
}
