use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Per-session broadcast rooms plus an admin hub.
///
/// Rooms are created on first subscription and dropped once a publish finds
/// nobody listening, so sessions without viewers cost nothing.
pub struct SessionRooms {
    rooms: DashMap<Uuid, broadcast::Sender<ServerEvent>>,
    admin: RoomHub,
    capacity: usize,
}

impl SessionRooms {
    /// Build the rooms registry with per-channel capacities.
    pub fn new(room_capacity: usize, admin_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            admin: RoomHub::new(admin_capacity),
            capacity: room_capacity,
        }
    }

    /// Join the room of `session_id`, creating it when needed.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.rooms
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Best-effort publish to everyone currently in the room.
    pub fn publish(&self, session_id: Uuid, event: ServerEvent) {
        let delivered = match self.rooms.get(&session_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => return,
        };
        if !delivered {
            self.rooms
                .remove_if(&session_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Number of listeners currently attached to a session room.
    pub fn listeners(&self, session_id: Uuid) -> usize {
        self.rooms
            .get(&session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Hub carrying operator-facing events for every session.
    pub fn admin(&self) -> &RoomHub {
        &self.admin
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct RoomHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl RoomHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> ServerEvent {
        ServerEvent::new(Some(name.to_string()), "{}".to_string())
    }

    #[tokio::test]
    async fn rooms_are_isolated_per_session() {
        let rooms = SessionRooms::new(8, 8);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut first_rx = rooms.subscribe(first);
        let mut second_rx = rooms.subscribe(second);

        rooms.publish(first, event("phase_changed"));

        let received = first_rx.recv().await.unwrap();
        assert_eq!(received.event.as_deref(), Some("phase_changed"));
        assert!(second_rx.try_recv().is_err());
    }

    #[test]
    fn empty_rooms_are_dropped_on_publish() {
        let rooms = SessionRooms::new(8, 8);
        let session = Uuid::new_v4();
        let receiver = rooms.subscribe(session);
        assert_eq!(rooms.listeners(session), 1);
        drop(receiver);

        rooms.publish(session, event("phase_changed"));
        assert!(!rooms.rooms.contains_key(&session));
    }

    #[test]
    fn publishing_without_room_is_a_no_op() {
        let rooms = SessionRooms::new(8, 8);
        rooms.publish(Uuid::new_v4(), event("phase_changed"));
        assert!(rooms.rooms.is_empty());
    }
}
