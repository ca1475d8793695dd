//! Process-wide room table owned by the engine.

use std::{collections::HashMap, time::SystemTime};

use thiserror::Error;
use tracing::info;

use crate::state::{
    models::{Participant, Room, RoomId, RoomSpec},
    room::RoomAggregate,
};

/// Failure to register a new room.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another room already uses the requested id.
    #[error("room `{0}` already exists")]
    DuplicateRoom(RoomId),
}

/// Participant removal as seen from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    /// Record of the removed participant.
    pub participant: Participant,
    /// The room had no participant left and was deleted.
    pub room_deleted: bool,
}

/// Mapping from room id to live aggregate.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, RoomAggregate>,
    chat_limit: usize,
}

impl RoomRegistry {
    /// Empty registry whose rooms retain `chat_limit` chat messages.
    pub fn new(chat_limit: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            chat_limit,
        }
    }

    /// Register a new room stamped with the current time.
    pub fn create(&mut self, spec: RoomSpec) -> Result<Room, RegistryError> {
        if self.rooms.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateRoom(spec.id));
        }

        let room = Room {
            id: spec.id,
            name: spec.name,
            deck_type: spec.deck_type,
            custom_deck: spec.custom_deck,
            settings: spec.settings,
            created_at: SystemTime::now(),
            created_by: spec.created_by,
        };
        info!(room_id = %room.id, name = %room.name, "room created");
        self.rooms.insert(
            room.id.clone(),
            RoomAggregate::new(room.clone(), self.chat_limit),
        );
        Ok(room)
    }

    /// Look a room up.
    pub fn get(&self, id: &str) -> Option<&RoomAggregate> {
        self.rooms.get(id)
    }

    /// Look a room up for mutation.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut RoomAggregate> {
        self.rooms.get_mut(id)
    }

    /// Drop a room, stopping its countdown.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(mut room) = self.rooms.remove(id) else {
            return false;
        };
        room.cancel_timer();
        info!(room_id = %id, "room deleted");
        true
    }

    /// Remove a participant and delete the room once nobody is left.
    pub fn remove_participant(&mut self, room_id: &str, participant_id: &str) -> Option<Departure> {
        let room = self.rooms.get_mut(room_id)?;
        let participant = room.remove_participant(participant_id)?;
        let room_deleted = room.is_empty();
        if room_deleted {
            self.delete(room_id);
        }
        Some(Departure {
            participant,
            room_deleted,
        })
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when no room is live.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::state::{
        models::{DeckType, RoomSettings},
        room::DEFAULT_CHAT_HISTORY_LIMIT,
        timer::TimerState,
    };

    use super::*;

    fn spec(id: &str) -> RoomSpec {
        RoomSpec {
            id: id.into(),
            name: "Sprint 42".into(),
            deck_type: DeckType::Fibonacci,
            custom_deck: None,
            settings: RoomSettings::default(),
            created_by: "anonymous".into(),
        }
    }

    #[test]
    fn create_and_lookup() {
        let mut registry = RoomRegistry::new(DEFAULT_CHAT_HISTORY_LIMIT);
        let room = registry.create(spec("abc")).unwrap();
        assert_eq!(room.id, "abc");
        assert!(registry.get("abc").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = RoomRegistry::new(DEFAULT_CHAT_HISTORY_LIMIT);
        registry.create(spec("abc")).unwrap();
        assert_eq!(
            registry.create(spec("abc")),
            Err(RegistryError::DuplicateRoom("abc".into()))
        );
    }

    #[tokio::test]
    async fn last_departure_deletes_room_and_stops_timer() {
        let mut registry = RoomRegistry::new(DEFAULT_CHAT_HISTORY_LIMIT);
        registry.create(spec("abc")).unwrap();
        let room = registry.get_mut("abc").unwrap();
        room.join("a", "Alice", false);
        room.join("b", "Bob", false);

        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        room.start_timer(move |_| {
            tokio::spawn(async move {
                let _guard = dropped_tx;
                std::future::pending::<()>().await;
            })
        });
        assert!(matches!(room.timer().state(), TimerState::Running { .. }));

        let first = registry.remove_participant("abc", "a").unwrap();
        assert!(!first.room_deleted);
        assert_eq!(first.participant.id, "a");

        let last = registry.remove_participant("abc", "b").unwrap();
        assert!(last.room_deleted);
        assert!(registry.get("abc").is_none());
        assert!(registry.is_empty());
        assert!(dropped_rx.await.is_err());
    }

    #[test]
    fn unknown_participant_or_room_is_a_no_op() {
        let mut registry = RoomRegistry::new(DEFAULT_CHAT_HISTORY_LIMIT);
        registry.create(spec("abc")).unwrap();
        assert!(registry.remove_participant("abc", "ghost").is_none());
        assert!(registry.remove_participant("nope", "ghost").is_none());
        assert!(registry.get("abc").is_some());
        assert!(!registry.delete("nope"));
    }
}
