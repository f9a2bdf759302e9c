use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::rooms::RoomKey;

/// Identifies one live transport link.
pub type ConnectionId = Uuid;

/// What a connection told us about itself when entering a room. Used to
/// announce its departure when it disconnects without saying goodbye.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub user_id: Option<String>,
    pub username: Option<String>,
    /// Call peer id, only set for video rooms
    pub peer_id: Option<String>,
}

/// Live mapping from room key to the connections currently in it, plus each
/// connection's outbox.
///
/// Rooms are created on first join and dropped when their last member
/// leaves. Nothing here survives a restart. All operations are in-memory
/// and never suspend.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Per-connection targeted send channels
    outboxes: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,

    /// room -> (connection -> participant)
    rooms: RwLock<HashMap<RoomKey, HashMap<ConnectionId, Participant>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbox. Returns the receiving end, which the
    /// transport drains into the socket.
    pub fn connect(&self, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, tx);
        rx
    }

    /// Drop a connection's outbox and remove it from every room. Returns the
    /// memberships it held so the caller can notify the remaining members.
    pub fn disconnect(&self, conn: ConnectionId) -> Vec<(RoomKey, Participant)> {
        // Lock order everywhere: rooms, then outboxes.
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        self.inner
            .outboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);

        let mut left = Vec::new();
        rooms.retain(|key, members| {
            if let Some(participant) = members.remove(&conn) {
                left.push((key.clone(), participant));
            }
            !members.is_empty()
        });
        left.sort_by(|a, b| a.0.cmp(&b.0));
        left
    }

    /// Add `conn` to `room`, replacing any participant info it had there.
    /// Returns whether it was not a member before, or `None` if the
    /// connection is already gone, in which case nothing is recorded.
    pub fn join(&self, room: &RoomKey, conn: ConnectionId, participant: Participant) -> Option<bool> {
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if !self
            .inner
            .outboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&conn)
        {
            debug!("Connection {} is gone, not joining {}", conn, room);
            return None;
        }
        let fresh = rooms
            .entry(room.clone())
            .or_default()
            .insert(conn, participant)
            .is_none();
        debug!("Connection {} joined room {}", conn, room);
        Some(fresh)
    }

    /// Remove `conn` from `room`. `None` if it was not a member.
    pub fn leave(&self, room: &RoomKey, conn: ConnectionId) -> Option<Participant> {
        let mut rooms = self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let members = rooms.get_mut(room)?;
        let participant = members.remove(&conn)?;
        if members.is_empty() {
            rooms.remove(room);
        }
        debug!("Connection {} left room {}", conn, room);
        Some(participant)
    }

    pub fn contains(&self, room: &RoomKey, conn: ConnectionId) -> bool {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .is_some_and(|members| members.contains_key(&conn))
    }

    /// Number of connections currently in `room`.
    pub fn occupancy(&self, room: &RoomKey) -> usize {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map_or(0, HashMap::len)
    }

    /// Send an event to one connection. Dropped silently if it is gone.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        let outboxes = self.inner.outboxes.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = outboxes.get(&conn) {
            let _ = tx.send(event);
        }
    }

    /// Send an event to every member of `room`. Returns how many outboxes
    /// accepted it.
    pub fn broadcast(&self, room: &RoomKey, event: ServerEvent) -> usize {
        self.fan_out(room, None, event)
    }

    /// Send an event to every member of `room` except `sender`.
    pub fn broadcast_except(&self, room: &RoomKey, sender: ConnectionId, event: ServerEvent) -> usize {
        self.fan_out(room, Some(sender), event)
    }

    fn fan_out(&self, room: &RoomKey, skip: Option<ConnectionId>, event: ServerEvent) -> usize {
        let targets: Vec<ConnectionId> = {
            let rooms = self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner);
            let Some(members) = rooms.get(room) else {
                return 0;
            };
            members.keys().copied().filter(|c| Some(*c) != skip).collect()
        };

        let outboxes = self.inner.outboxes.read().unwrap_or_else(PoisonError::into_inner);
        let delivered = targets
            .iter()
            .filter_map(|conn| outboxes.get(conn))
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count();
        trace!("{} -> {} ({} recipients)", event.name(), room, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::events::TypingNotice;

    fn typing(name: &str) -> ServerEvent {
        ServerEvent::UserTyping(TypingNotice {
            username: name.into(),
        })
    }

    #[test]
    fn rooms_are_created_and_dropped_implicitly() {
        let registry = RoomRegistry::new();
        let room = RoomKey::Channel("c_1".into());
        let conn = Uuid::new_v4();
        let _rx = registry.connect(conn);

        assert_eq!(registry.occupancy(&room), 0);
        assert_eq!(registry.join(&room, conn, Participant::default()), Some(true));
        assert_eq!(registry.join(&room, conn, Participant::default()), Some(false));
        assert_eq!(registry.occupancy(&room), 1);

        assert!(registry.leave(&room, conn).is_some());
        assert!(registry.leave(&room, conn).is_none());
        assert_eq!(registry.occupancy(&room), 0);
    }

    #[test]
    fn broadcast_except_skips_sender() {
        let registry = RoomRegistry::new();
        let room = RoomKey::Channel("c_1".into());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = registry.connect(a);
        let mut rx_b = registry.connect(b);
        registry.join(&room, a, Participant::default());
        registry.join(&room, b, Participant::default());

        assert_eq!(registry.broadcast_except(&room, a, typing("ana")), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), typing("ana"));

        assert_eq!(registry.broadcast(&room, typing("ben")), 2);
        assert_eq!(rx_a.try_recv().unwrap(), typing("ben"));
        assert_eq!(rx_b.try_recv().unwrap(), typing("ben"));
    }

    #[test]
    fn rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _rx_a = registry.connect(a);
        let mut rx_b = registry.connect(b);
        registry.join(&RoomKey::Channel("c_1".into()), a, Participant::default());
        registry.join(&RoomKey::Channel("c_2".into()), b, Participant::default());

        registry.broadcast(&RoomKey::Channel("c_1".into()), typing("ana"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn disconnect_evicts_from_every_room() {
        let registry = RoomRegistry::new();
        let conn = Uuid::new_v4();
        let other = Uuid::new_v4();
        let _rx = registry.connect(conn);
        let _rx_other = registry.connect(other);
        let channel = RoomKey::Channel("c_1".into());
        let video = RoomKey::Video("c_1".into());
        let peer = Participant {
            peer_id: Some("peer-1".into()),
            ..Participant::default()
        };
        registry.join(&channel, conn, Participant::default());
        registry.join(&channel, other, Participant::default());
        registry.join(&video, conn, peer.clone());

        let left = registry.disconnect(conn);
        assert_eq!(left.len(), 2);
        assert!(left.contains(&(video.clone(), peer)));
        assert_eq!(registry.occupancy(&channel), 1);
        assert_eq!(registry.occupancy(&video), 0);
        assert_eq!(registry.broadcast(&channel, typing("x")), 1);
    }

    #[test]
    fn join_after_disconnect_is_refused() {
        let registry = RoomRegistry::new();
        let room = RoomKey::Channel("c_1".into());
        let conn = Uuid::new_v4();
        let _rx = registry.connect(conn);
        registry.disconnect(conn);

        assert_eq!(registry.join(&room, conn, Participant::default()), None);
        assert_eq!(registry.occupancy(&room), 0);
    }

    #[test]
    fn send_to_unknown_connection_is_dropped() {
        let registry = RoomRegistry::new();
        registry.send_to(Uuid::new_v4(), typing("ghost"));
    }
}
