//! Connection bookkeeping: which socket belongs to which room participant, and how to reach it.

use std::collections::HashMap;

use indexmap::IndexSet;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::ws::ServerMessage,
    state::models::{ParticipantId, RoomId},
};

/// Identity of a live transport connection.
pub type ConnectionId = Uuid;

/// Writer side of a connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Room membership established by a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Room the connection joined.
    pub room_id: RoomId,
    /// Participant the connection speaks for.
    pub participant_id: ParticipantId,
}

/// Connection table owned by the engine.
#[derive(Debug, Default)]
pub struct SessionTable {
    outboxes: HashMap<ConnectionId, Outbox>,
    bindings: HashMap<ConnectionId, Binding>,
    /// Connections per room, in bind order.
    rooms: HashMap<RoomId, IndexSet<ConnectionId>>,
}

impl SessionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, not yet joined connection.
    pub fn connect(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        self.outboxes.insert(connection_id, outbox);
    }

    /// Forget a connection entirely, returning its binding.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<Binding> {
        self.outboxes.remove(&connection_id);
        self.unbind(connection_id)
    }

    /// Attach a connection to a room participant, replacing any previous binding.
    pub fn bind(
        &mut self,
        connection_id: ConnectionId,
        room_id: &str,
        participant_id: &str,
    ) -> Option<Binding> {
        let previous = self.unbind(connection_id);
        self.bindings.insert(
            connection_id,
            Binding {
                room_id: room_id.to_string(),
                participant_id: participant_id.to_string(),
            },
        );
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
        previous
    }

    /// Detach a connection from its room while keeping it reachable.
    pub fn unbind(&mut self, connection_id: ConnectionId) -> Option<Binding> {
        let binding = self.bindings.remove(&connection_id)?;
        if let Some(members) = self.rooms.get_mut(&binding.room_id) {
            members.shift_remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(&binding.room_id);
            }
        }
        Some(binding)
    }

    /// Detach every connection of a room, e.g. once the room is gone.
    pub fn unbind_room(&mut self, room_id: &str) -> Vec<ConnectionId> {
        let members: Vec<ConnectionId> = self
            .rooms
            .remove(room_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for connection_id in &members {
            self.bindings.remove(connection_id);
        }
        members
    }

    /// Binding of a connection, if it joined a room.
    pub fn binding(&self, connection_id: ConnectionId) -> Option<&Binding> {
        self.bindings.get(&connection_id)
    }

    /// Connections currently speaking for a participant.
    pub fn connections_of(&self, room_id: &str, participant_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| {
                self.bindings
                    .get(id)
                    .is_some_and(|b| b.participant_id == participant_id)
            })
            .collect()
    }

    /// Whether any connection is bound to the participant.
    pub fn is_participant_connected(&self, room_id: &str, participant_id: &str) -> bool {
        !self.connections_of(room_id, participant_id).is_empty()
    }

    /// Number of connections, joined or not.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    /// Queue a message for one connection.
    pub fn send(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let Some(outbox) = self.outboxes.get(&connection_id) else {
            return false;
        };
        if outbox.send(message).is_err() {
            warn!(connection_id = %connection_id, "writer closed, dropping outbound message");
            return false;
        }
        true
    }

    /// Queue a message for every connection bound to the room.
    pub fn broadcast(&self, room_id: &str, message: &ServerMessage) {
        self.broadcast_filtered(room_id, message, |_| true);
    }

    /// Queue a message for every connection of the room except `except`.
    pub fn broadcast_except(&self, room_id: &str, except: ConnectionId, message: &ServerMessage) {
        self.broadcast_filtered(room_id, message, |id| id != except);
    }

    fn broadcast_filtered<F>(&self, room_id: &str, message: &ServerMessage, keep: F)
    where
        F: Fn(ConnectionId) -> bool,
    {
        let Some(members) = self.rooms.get(room_id) else {
            return;
        };
        for connection_id in members.iter().copied().filter(|id| keep(*id)) {
            self.send(connection_id, message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(table: &mut SessionTable) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        table.connect(id, tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn broadcast_reaches_bound_connections_only() {
        let mut table = SessionTable::new();
        let (alice, mut alice_rx) = connection(&mut table);
        let (bob, mut bob_rx) = connection(&mut table);
        let (_lobby, mut lobby_rx) = connection(&mut table);
        let (other, mut other_rx) = connection(&mut table);

        table.bind(alice, "room", "a");
        table.bind(bob, "room", "b");
        table.bind(other, "elsewhere", "c");

        table.broadcast("room", &ServerMessage::VotesCleared);
        assert_eq!(drain(&mut alice_rx), vec![ServerMessage::VotesCleared]);
        assert_eq!(drain(&mut bob_rx), vec![ServerMessage::VotesCleared]);
        assert!(drain(&mut lobby_rx).is_empty());
        assert!(drain(&mut other_rx).is_empty());

        table.broadcast_except("room", alice, &ServerMessage::TimerReset);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![ServerMessage::TimerReset]);
    }

    #[test]
    fn rebinding_moves_connection_between_rooms() {
        let mut table = SessionTable::new();
        let (alice, _rx) = connection(&mut table);

        assert!(table.bind(alice, "first", "a").is_none());
        let previous = table.bind(alice, "second", "a").unwrap();
        assert_eq!(previous.room_id, "first");
        assert!(table.connections_of("first", "a").is_empty());
        assert_eq!(table.connections_of("second", "a"), vec![alice]);
    }

    #[test]
    fn disconnect_tracks_remaining_connections_of_participant() {
        let mut table = SessionTable::new();
        let (tab_one, _rx_one) = connection(&mut table);
        let (tab_two, _rx_two) = connection(&mut table);
        table.bind(tab_one, "room", "a");
        table.bind(tab_two, "room", "a");

        let binding = table.disconnect(tab_one).unwrap();
        assert_eq!(binding.participant_id, "a");
        assert!(table.is_participant_connected("room", "a"));

        table.disconnect(tab_two);
        assert!(!table.is_participant_connected("room", "a"));
        assert!(table.is_empty());
    }

    #[test]
    fn send_to_closed_writer_reports_failure() {
        let mut table = SessionTable::new();
        let (alice, rx) = connection(&mut table);
        drop(rx);
        assert!(!table.send(alice, ServerMessage::TimerExpired));
        assert!(!table.send(Uuid::new_v4(), ServerMessage::TimerExpired));
    }

    #[test]
    fn unbind_room_detaches_members() {
        let mut table = SessionTable::new();
        let (alice, _rx) = connection(&mut table);
        table.bind(alice, "room", "a");

        assert_eq!(table.unbind_room("room"), vec![alice]);
        assert!(table.binding(alice).is_none());
        assert_eq!(table.len(), 1);
    }
}
