//! Call-signaling rooms.
//!
//! A room is the signaling scope for one call: the set of connections that
//! joined under the same caller-supplied room id (by convention derived
//! from the lesson id). The relay forwards offer/answer/ICE events to
//! every member except the sender and keeps no history; a late joiner
//! sees nothing that happened before it joined.

use crate::registry::ConnectionHandle;
use dashmap::DashMap;
use tracing::{debug, trace};
use tutorlink_protocol::ServerEvent;

struct RoomMember {
    handle: ConnectionHandle,
    name: String,
    role: String,
}

/// All active signaling rooms, keyed by room id.
#[derive(Default)]
pub struct RoomMap {
    rooms: DashMap<String, Vec<RoomMember>>,
}

impl RoomMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room and notify the existing members.
    ///
    /// Re-joining under the same connection replaces the earlier
    /// membership instead of duplicating it.
    pub fn join(&self, room: &str, handle: ConnectionHandle, name: &str, role: &str) {
        let mut members = self.rooms.entry(room.to_string()).or_default();

        members.retain(|m| m.handle.conn_id() != handle.conn_id());

        let joined = ServerEvent::PeerJoined {
            room: room.to_string(),
            name: name.to_string(),
            role: role.to_string(),
        };
        for member in members.iter() {
            member.handle.send(joined.clone());
        }

        members.push(RoomMember {
            handle,
            name: name.to_string(),
            role: role.to_string(),
        });
        debug!(room = %room, name = %name, members = members.len(), "Peer joined room");
    }

    /// Forward a signaling event to every member of the room except the
    /// sender. The payload is relayed verbatim, never inspected.
    ///
    /// Returns the number of members the event was sent to.
    pub fn forward(&self, room: &str, from_conn: &str, event: ServerEvent) -> usize {
        let Some(members) = self.rooms.get(room) else {
            trace!(room = %room, "Forward to unknown room dropped");
            return 0;
        };

        let mut sent = 0;
        for member in members.iter().filter(|m| m.handle.conn_id() != from_conn) {
            if member.handle.send(event.clone()) {
                sent += 1;
            }
        }
        sent
    }

    /// Remove a connection from a room and notify the remaining members.
    /// An empty room is deleted.
    ///
    /// Returns the departing member's name, if the connection was a member.
    pub fn leave(&self, room: &str, conn_id: &str) -> Option<String> {
        let mut members = self.rooms.get_mut(room)?;

        let position = members.iter().position(|m| m.handle.conn_id() == conn_id)?;
        let departed = members.remove(position);

        let left = ServerEvent::PeerLeft {
            room: room.to_string(),
            name: departed.name.clone(),
        };
        for member in members.iter() {
            member.handle.send(left.clone());
        }

        let empty = members.is_empty();
        drop(members);
        if empty {
            self.rooms.remove_if(room, |_, m| m.is_empty());
            debug!(room = %room, "Deleted empty room");
        }

        Some(departed.name)
    }

    /// Handle an ungraceful disconnect: leave every room the connection
    /// was a member of, with the same notifications as an explicit leave.
    pub fn drop_connection(&self, conn_id: &str) {
        let joined: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.iter().any(|m| m.handle.conn_id() == conn_id))
            .map(|entry| entry.key().clone())
            .collect();

        for room in joined {
            self.leave(&room, conn_id);
        }
    }

    /// Number of members currently in a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn handle(conn_id: &str) -> (ConnectionHandle, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(conn_id, tx), rx)
    }

    fn offer(room: &str) -> ServerEvent {
        ServerEvent::Offer {
            room: room.into(),
            sdp: "v=0 ...".into(),
        }
    }

    #[test]
    fn test_offer_reaches_only_the_other_member() {
        let rooms = RoomMap::new();
        let (a, mut a_rx) = handle("conn-a");
        let (b, mut b_rx) = handle("conn-b");

        rooms.join("lesson_42", a, "Alice", "teacher");
        rooms.join("lesson_42", b, "Bob", "student");

        // Alice saw Bob join.
        assert!(matches!(
            a_rx.try_recv(),
            Ok(ServerEvent::PeerJoined { name, .. }) if name == "Bob"
        ));

        assert_eq!(rooms.forward("lesson_42", "conn-a", offer("lesson_42")), 1);
        assert!(matches!(b_rx.try_recv(), Ok(ServerEvent::Offer { .. })));
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_late_joiner_receives_no_history() {
        let rooms = RoomMap::new();
        let (a, _a_rx) = handle("conn-a");
        let (b, _b_rx) = handle("conn-b");

        rooms.join("lesson_42", a, "Alice", "teacher");
        rooms.join("lesson_42", b, "Bob", "student");
        rooms.forward("lesson_42", "conn-a", offer("lesson_42"));

        let (c, mut c_rx) = handle("conn-c");
        rooms.join("lesson_42", c, "Cara", "observer");
        assert!(c_rx.try_recv().is_err());
    }

    #[test]
    fn test_leave_notifies_and_deletes_empty_room() {
        let rooms = RoomMap::new();
        let (a, _a_rx) = handle("conn-a");
        let (b, mut b_rx) = handle("conn-b");

        rooms.join("room", a, "Alice", "teacher");
        rooms.join("room", b, "Bob", "student");

        assert_eq!(rooms.leave("room", "conn-a"), Some("Alice".to_string()));
        assert!(matches!(
            b_rx.try_recv(),
            Ok(ServerEvent::PeerLeft { name, .. }) if name == "Alice"
        ));

        assert_eq!(rooms.leave("room", "conn-b"), Some("Bob".to_string()));
        assert_eq!(rooms.member_count("room"), 0);

        // Leaving a room you were never in is a no-op.
        assert_eq!(rooms.leave("room", "conn-a"), None);
    }

    #[test]
    fn test_drop_connection_sweeps_all_rooms() {
        let rooms = RoomMap::new();
        let (a1, _rx1) = handle("conn-a");
        let (a2, _rx2) = handle("conn-a");
        let (b, mut b_rx) = handle("conn-b");

        rooms.join("room-1", a1, "Alice", "teacher");
        rooms.join("room-2", a2, "Alice", "teacher");
        rooms.join("room-2", b, "Bob", "student");

        rooms.drop_connection("conn-a");

        assert_eq!(rooms.member_count("room-1"), 0);
        assert_eq!(rooms.member_count("room-2"), 1);
        assert!(matches!(
            b_rx.try_recv(),
            Ok(ServerEvent::PeerLeft { name, .. }) if name == "Alice"
        ));
    }

    #[test]
    fn test_forward_to_unknown_room_is_dropped() {
        let rooms = RoomMap::new();
        assert_eq!(rooms.forward("ghost", "conn-a", offer("ghost")), 0);
    }
}
