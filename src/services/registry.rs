//! Session registry — live room membership and best-effort fan-out.
//!
//! DESIGN
//! ======
//! A room is the set of live connections attached to one whiteboard id,
//! each represented by the sender half of its outbound frame channel.
//! Membership is transient: a connection is added on admission and removed
//! only when its transport closes. This is unrelated to the durable member
//! list on the whiteboard row.
//!
//! Broadcast uses `try_send` so a slow or dead client can never stall the
//! relay path. Disconnected clients simply miss events; they recover from the
//! snapshot + stroke tail on their next join.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::Frame;

type Room = HashMap<Uuid, mpsc::Sender<Frame>>;

#[derive(Clone, Default)]
pub struct Registry {
    rooms: Arc<Mutex<HashMap<Uuid, Room>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection to a room. Joining twice replaces the sender.
    pub fn join(&self, whiteboard_id: Uuid, client_id: Uuid, tx: mpsc::Sender<Frame>) {
        let mut rooms = self.lock();
        let room = rooms.entry(whiteboard_id).or_default();
        room.insert(client_id, tx);
        info!(%whiteboard_id, %client_id, clients = room.len(), "registry: client joined room");
    }

    /// Remove a connection from every room it belongs to. Empty rooms are
    /// dropped. Returns the whiteboard ids the client was removed from.
    pub fn leave_all(&self, client_id: Uuid) -> Vec<Uuid> {
        let mut rooms = self.lock();
        let mut left = Vec::new();
        rooms.retain(|whiteboard_id, room| {
            if room.remove(&client_id).is_some() {
                left.push(*whiteboard_id);
                info!(%whiteboard_id, %client_id, remaining = room.len(), "registry: client left room");
            }
            !room.is_empty()
        });
        left
    }

    /// Deliver `frame` to every member of the room except `exclude`.
    /// Returns the number of clients the frame was queued for.
    pub fn broadcast(&self, whiteboard_id: Uuid, frame: &Frame, exclude: Option<Uuid>) -> usize {
        let rooms = self.lock();
        let Some(room) = rooms.get(&whiteboard_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (client_id, tx) in room {
            if exclude == Some(*client_id) {
                continue;
            }
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(%whiteboard_id, %client_id, event = %frame.event, "registry: client queue full; dropping frame");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%whiteboard_id, %client_id, event = %frame.event, "registry: client queue closed; dropping frame");
                }
            }
        }
        delivered
    }

    #[must_use]
    pub fn contains(&self, whiteboard_id: Uuid, client_id: Uuid) -> bool {
        self.lock()
            .get(&whiteboard_id)
            .is_some_and(|room| room.contains_key(&client_id))
    }

    #[must_use]
    pub fn room_size(&self, whiteboard_id: Uuid) -> usize {
        self.lock().get(&whiteboard_id).map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn has_room(&self, whiteboard_id: Uuid) -> bool {
        self.lock().contains_key(&whiteboard_id)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
