use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::rooms::{
    Device, InvitedParticipant, MediaState, NotifyMessage, NotifyPreconnectMessage,
    NotifyPreconnectResponse, NotifyResponse, Participant, RingStatus,
};

/// In-memory state for one call session. Owned solely by the registry and
/// shared as `Arc<Room>` by every connection attached to it; the lock guards
/// all interior collections because participants attach from independent
/// connection tasks concurrently.
pub struct Room {
    name: String,
    inner: RwLock<RoomState>,
}

#[derive(Default)]
struct RoomState {
    token: Option<String>,
    participants: Vec<Participant>,
    invited: Vec<InvitedParticipant>,
    devices: HashMap<i64, Vec<Device>>,
    started_at: Option<i64>,
}

/// Point-in-time copy of the broadcastable room state, taken under the read
/// lock and marshaled/sent after it is released.
pub struct RoomSnapshot {
    pub participants: Vec<Participant>,
    pub invited: Vec<InvitedParticipant>,
    pub started_at: Option<i64>,
}

impl Room {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(RoomState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records the token on first use of the room, validates it afterwards.
    /// Every room-creating action must present the same token for the life
    /// of the room.
    pub fn authorize(&self, token: &str) -> Result<()> {
        let mut state = self.inner.write();
        match &state.token {
            None => {
                state.token = Some(token.to_string());
                Ok(())
            }
            Some(stored) if stored == token => Ok(()),
            Some(_) => Err(AppError::InvalidToken(self.name.clone())),
        }
    }

    /// Attaches a participant. Removes any matching invited entry, rejects a
    /// user id that is already active, and stamps `started_at` the instant
    /// the second participant joins (a call is only started once two sides
    /// are present; the stamp is never overwritten).
    pub fn add(&self, p: Participant) -> Result<()> {
        let mut state = self.inner.write();

        state.invited.retain(|i| i.user_id != p.user_id);

        if state.participants.iter().any(|x| x.user_id == p.user_id) {
            return Err(AppError::DuplicateParticipant {
                room: self.name.clone(),
                user_id: p.user_id,
            });
        }

        state.participants.push(p);

        if state.participants.len() == 2 && state.started_at.is_none() {
            state.started_at = Some(Utc::now().timestamp());
        }

        Ok(())
    }

    /// No-op (not an error) if the user already appears as a participant or
    /// an invited participant.
    pub fn add_invited(&self, invited: InvitedParticipant) {
        let mut state = self.inner.write();

        let present = state
            .participants
            .iter()
            .any(|p| p.user_id == invited.user_id)
            || state.invited.iter().any(|i| i.user_id == invited.user_id);

        if !present {
            state.invited.push(invited);
        }
    }

    pub fn get(&self, user_id: i64) -> Result<Participant> {
        let state = self.inner.read();
        state
            .participants
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned()
            .ok_or_else(|| AppError::ParticipantNotFound {
                room: self.name.clone(),
                user_id,
            })
    }

    /// Overwrites the media-state fields in place and returns the updated
    /// participant.
    pub fn change_state(&self, user_id: i64, new_state: MediaState) -> Result<Participant> {
        let mut state = self.inner.write();
        let p = state
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| AppError::ParticipantNotFound {
                room: self.name.clone(),
                user_id,
            })?;
        p.state = new_state;
        Ok(p.clone())
    }

    pub fn set_publishing(&self, user_id: i64, publishing: bool) -> Result<Participant> {
        let mut state = self.inner.write();
        let p = state
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| AppError::ParticipantNotFound {
                room: self.name.clone(),
                user_id,
            })?;
        p.publishing = publishing;
        Ok(p.clone())
    }

    /// Removes by connection identity, not user id, so a stale entry from a
    /// dropped connection never evicts a fresh rejoin. Idempotent.
    pub fn remove(&self, conn_id: Uuid) {
        let mut state = self.inner.write();
        state.participants.retain(|p| p.conn_id != conn_id);
    }

    pub fn add_device(&self, d: Device) -> Result<()> {
        let mut state = self.inner.write();
        let devices = state.devices.entry(d.user_id).or_default();

        if devices.iter().any(|x| x.id == d.id) {
            return Err(AppError::DuplicateDevice {
                user_id: d.user_id,
                device_id: d.id,
            });
        }

        devices.push(d);
        Ok(())
    }

    pub fn remove_device(&self, conn_id: Uuid) {
        let mut state = self.inner.write();
        for devices in state.devices.values_mut() {
            devices.retain(|d| d.conn_id != conn_id);
        }
        state.devices.retain(|_, devices| !devices.is_empty());
    }

    /// One-way ring status overwrite, keyed by (user, device id). Returns
    /// the updated device so the caller can fan the event out.
    pub fn set_ring_status(
        &self,
        user_id: i64,
        device_id: &str,
        status: RingStatus,
    ) -> Result<Device> {
        let mut state = self.inner.write();
        let device = state
            .devices
            .get_mut(&user_id)
            .and_then(|devices| devices.iter_mut().find(|d| d.id == device_id))
            .ok_or_else(|| AppError::DeviceNotFound {
                user_id,
                device_id: device_id.to_string(),
            })?;
        device.status = Some(status);
        Ok(device.clone())
    }

    /// Ring history returned to a preconnecting device: a decline/busy
    /// outcome from another user wins, otherwise any answered device of the
    /// same user, otherwise nothing.
    pub fn ring_history(&self, user_id: i64) -> Option<Device> {
        let state = self.inner.read();

        let foreign = state.devices.iter().flat_map(|(_, devices)| devices).find(|d| {
            d.user_id != user_id
                && matches!(d.status, Some(RingStatus::Decline) | Some(RingStatus::Busy))
        });
        if let Some(d) = foreign {
            return Some(d.clone());
        }

        state
            .devices
            .get(&user_id)
            .and_then(|devices| devices.iter().find(|d| d.status.is_some()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.inner.read();
        state.participants.is_empty() && state.devices.is_empty()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let state = self.inner.read();
        RoomSnapshot {
            participants: state.participants.clone(),
            invited: state.invited.clone(),
            started_at: state.started_at,
        }
    }

    /// Broadcasts the current room snapshot to every other active
    /// participant; the triggering participant never receives its own event.
    /// The snapshot is taken under the lock and sends happen after it is
    /// released, so a blocked recipient queue never holds the room lock.
    /// Delivery is at-most-once: cancelling `cancel` mid-broadcast abandons
    /// the remaining recipients.
    pub async fn notify(
        &self,
        cancel: &CancellationToken,
        peer: &Participant,
        event: &str,
        call: Option<String>,
        data: Option<String>,
    ) {
        let snapshot = self.snapshot();

        tracing::debug!(
            room = %self.name,
            event = %event,
            peer_id = peer.user_id,
            participants = snapshot.participants.len(),
            "broadcasting room event"
        );

        for recipient in &snapshot.participants {
            if recipient.conn_id == peer.conn_id {
                continue;
            }

            let response = NotifyResponse {
                msg: NotifyMessage {
                    action: "notify",
                    event: event.to_string(),
                    this: recipient.clone(),
                    peer: peer.clone(),
                    participants: snapshot.participants.clone(),
                    invited_participants: snapshot.invited.clone(),
                    started_at: snapshot.started_at,
                    call: call.clone(),
                    data: data.clone(),
                },
            };

            let frame = match serde_json::to_string(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(room = %self.name, error = %e, "failed to marshal notify");
                    return;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                res = recipient.out.send(frame) => {
                    if res.is_err() {
                        tracing::debug!(
                            room = %self.name,
                            user_id = recipient.user_id,
                            "recipient gone, skipping"
                        );
                    }
                }
            }
        }
    }

    /// Fans a ring event out to the other devices of the same user.
    pub async fn notify_preconnect(
        &self,
        cancel: &CancellationToken,
        device: &Device,
        event: &str,
    ) {
        let siblings: Vec<Device> = {
            let state = self.inner.read();
            state
                .devices
                .get(&device.user_id)
                .map(|devices| {
                    devices
                        .iter()
                        .filter(|d| d.conn_id != device.conn_id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let response = NotifyPreconnectResponse {
            msg: NotifyPreconnectMessage {
                action: "notify",
                event: event.to_string(),
                user_id: device.user_id,
                device_id: device.id.clone(),
            },
        };

        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(room = %self.name, error = %e, "failed to marshal ring event");
                return;
            }
        };

        for sibling in &siblings {
            tokio::select! {
                _ = cancel.cancelled() => return,
                res = sibling.out.send(frame.clone()) => {
                    if res.is_err() {
                        tracing::debug!(
                            room = %self.name,
                            device_id = %sibling.id,
                            "device gone, skipping"
                        );
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("participants", &state.participants.len())
            .field("devices", &state.devices.len())
            .finish()
    }
}
