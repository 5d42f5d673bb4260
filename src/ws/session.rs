use std::sync::Arc;

use uuid::Uuid;

use crate::rooms::{Device, Participant, Room};

/// Per-connection state owned by the dispatcher task. Tracks what this
/// connection attached to a room so the closing sequence knows what to
/// tear down.
pub struct ConnSession {
    pub conn_id: Uuid,
    pub joined: Option<JoinedRoom>,
    pub device: Option<RegisteredDevice>,
}

pub struct JoinedRoom {
    pub room: Arc<Room>,
    pub participant: Participant,
}

pub struct RegisteredDevice {
    pub room: Arc<Room>,
    pub device: Device,
}

impl ConnSession {
    pub fn new(conn_id: Uuid) -> Self {
        Self {
            conn_id,
            joined: None,
            device: None,
        }
    }
}
