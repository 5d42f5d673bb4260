use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Media-state flags a client reports for itself. Overwritten wholesale by
/// `changeState`; no validation beyond the types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    #[serde(default)]
    pub is_horizontal: bool,
    #[serde(default)]
    pub is_micro_on: bool,
    #[serde(default)]
    pub is_camera_on: bool,
    #[serde(default)]
    pub is_speaker_on: bool,
    #[serde(default)]
    pub camera_type: Option<String>,
    #[serde(default)]
    pub battery_life: f64,
}

/// One joined call member. `conn_id` is the removal identity (a user may
/// rejoin from a new connection); `out` carries serialized JSON frames to
/// that connection's writer task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(skip)]
    pub conn_id: Uuid,
    #[serde(skip)]
    pub out: mpsc::Sender<String>,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub status: Option<String>,
    pub photo: Option<String>,
    pub publishing: bool,
    #[serde(flatten)]
    pub state: MediaState,
}

/// A named but not-yet-joined call member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitedParticipant {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub status: Option<String>,
    pub photo: Option<String>,
}
