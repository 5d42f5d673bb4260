use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rooms::{Device, InvitedParticipant, MediaState, Participant};

/// Inbound wire envelope. `tid` is an opaque client transaction id echoed
/// back in the reply; the action name lives inside `msg` next to the
/// action-specific fields.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub tid: String,
    pub msg: Value,
}

// ==================== Client -> Server payloads ====================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room: String,
    pub token: String,
    pub user_id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(flatten)]
    pub state: MediaState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconnectPayload {
    pub room: String,
    pub token: String,
    pub user_id: i64,
    pub device_id: String,
}

/// Shared by `accept`, `decline` and `busy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingPayload {
    pub room: String,
    pub user_id: i64,
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    pub room: String,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStatePayload {
    pub room: String,
    pub user_id: i64,
    #[serde(flatten)]
    pub state: MediaState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteUsersPayload {
    pub room: String,
    pub user_id: i64,
    pub participants: Vec<InvitedParticipant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub room: String,
    pub user_id: i64,
    #[serde(default)]
    pub call: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

// ==================== Server -> Client payloads ====================

/// Reply to a successful `join`: the full room snapshot so the new
/// participant starts from an authoritative view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub action: &'static str,
    pub room: String,
    #[serde(rename = "self")]
    pub this: Participant,
    pub participants: Vec<Participant>,
    pub invited_participants: Vec<InvitedParticipant>,
    pub started_at: Option<i64>,
}

/// Reply to `preconnect`: one prior ring outcome, if any, so a late device
/// can stop ringing immediately.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreconnectResponse {
    pub action: &'static str,
    pub room: String,
    pub history: Option<Device>,
}

/// Action names accepted by the dispatcher.
pub mod actions {
    pub const JOIN: &str = "join";
    pub const PRECONNECT: &str = "preconnect";
    pub const ACCEPT: &str = "accept";
    pub const DECLINE: &str = "decline";
    pub const BUSY: &str = "busy";
    pub const PUBLISH: &str = "publish";
    pub const CHANGE_STATE: &str = "changeState";
    pub const INVITE_USERS: &str = "inviteUsers";
    pub const CONTROL: &str = "control";
    pub const CUSTOM: &str = "custom";

    pub const LEAVE_EVENT: &str = "leave";
}
