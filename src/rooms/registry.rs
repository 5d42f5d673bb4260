use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::rooms::Room;

/// Process-wide mapping from room name to room, shared by every connection
/// task. Insertion is load-or-store; deletion only ever happens through the
/// reaper channel so a departing connection can never race its own room's
/// removal against a concurrent join.
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, Arc<Room>>>,
    reaper_tx: mpsc::UnboundedSender<String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        let rooms: Arc<DashMap<String, Arc<Room>>> = Arc::new(DashMap::new());
        let (reaper_tx, mut reaper_rx) = mpsc::unbounded_channel::<String>();

        let map = rooms.clone();
        tokio::spawn(async move {
            while let Some(name) = reaper_rx.recv().await {
                // Re-check emptiness under the map entry: a join may have
                // landed between the signal and now.
                let emptied = map
                    .get(&name)
                    .map(|room| room.is_empty())
                    .unwrap_or(false);

                if emptied {
                    map.remove(&name);
                    tracing::info!(room = %name, "empty room removed");
                }
            }
        });

        Self { rooms, reaper_tx }
    }

    /// Returns the existing room or atomically installs a new one. Under
    /// concurrent first access exactly one instance survives and every
    /// caller observes it.
    pub fn load_or_create(&self, name: &str) -> Arc<Room> {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(room = %name, "room created");
                Arc::new(Room::new(name))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Result<Arc<Room>> {
        self.rooms
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| AppError::RoomNotFound(name.to_string()))
    }

    /// Asks the reaper to drop the room if it is still empty when the
    /// signal is consumed.
    pub fn schedule_delete(&self, name: &str) {
        let _ = self.reaper_tx.send(name.to_string());
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
