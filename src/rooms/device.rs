use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outcome of ringing one device. `None` on the device means it is still
/// ringing; the status is a one-way label overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingStatus {
    Accept,
    Decline,
    Busy,
}

impl RingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RingStatus::Accept => "accept",
            RingStatus::Decline => "decline",
            RingStatus::Busy => "busy",
        }
    }
}

/// One physical endpoint of a user that may ring for an incoming call,
/// registered by `preconnect` before any participant join happens.
/// Device ids are unique per user within a room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(skip)]
    pub conn_id: Uuid,
    #[serde(skip)]
    pub out: mpsc::Sender<String>,
    pub user_id: i64,
    pub id: String,
    pub status: Option<RingStatus>,
}
