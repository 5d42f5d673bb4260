use serde::Serialize;

use crate::rooms::{InvitedParticipant, Participant};

/// Broadcast sent to every other participant after a room mutation. Each
/// recipient gets the full room snapshot (`self` is the recipient's own
/// entry, `peer` is whoever triggered the event) so it can resynchronize
/// its view rather than apply a delta.
#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    pub msg: NotifyMessage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyMessage {
    pub action: &'static str,
    pub event: String,
    #[serde(rename = "self")]
    pub this: Participant,
    pub peer: Participant,
    pub participants: Vec<Participant>,
    pub invited_participants: Vec<InvitedParticipant>,
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Ring event fanned out to the other devices of the same user, so every
/// endpoint learns when one of them answered or declined.
#[derive(Debug, Serialize)]
pub struct NotifyPreconnectResponse {
    pub msg: NotifyPreconnectMessage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPreconnectMessage {
    pub action: &'static str,
    pub event: String,
    pub user_id: i64,
    pub device_id: String,
}
