//! State machine of a single room.
//!
//! Every method runs to completion synchronously and reports failure through its return value;
//! the engine decides what to broadcast from that outcome.

use std::{collections::VecDeque, time::SystemTime};

use indexmap::IndexMap;
use tokio::task::JoinHandle;

use crate::state::{
    models::{
        CachedResult, CardValue, ChatKind, ChatMessage, ConnectionStatus, NewStory, Participant,
        ParticipantId, RevealOutcome, Room, RoomSettings, RoundStatus, SYSTEM_PARTICIPANT_ID,
        SYSTEM_PARTICIPANT_NAME, SettingsUpdate, Story, StoryId, StorySelection, StoryStatus,
        StoryUpdate, Vote, VotingRound, generate_id,
    },
    statistics,
    timer::{RoomTimer, TickOutcome},
};

/// Default number of chat messages a room retains.
pub const DEFAULT_CHAT_HISTORY_LIMIT: usize = 500;

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// Participant record after the join.
    pub participant: Participant,
    /// The participant id was already known to the room (reconnect).
    pub rejoined: bool,
}

/// Live state of one room: membership, stories, current round, chat and timer.
#[derive(Debug)]
pub struct RoomAggregate {
    room: Room,
    /// Insertion order is join order and drives moderator selection.
    participants: IndexMap<ParticipantId, Participant>,
    stories: Vec<Story>,
    current_story_id: Option<StoryId>,
    voting_round: Option<VotingRound>,
    chat: VecDeque<ChatMessage>,
    chat_limit: usize,
    timer: RoomTimer,
}

impl RoomAggregate {
    /// Empty aggregate for a freshly created room.
    pub fn new(room: Room, chat_limit: usize) -> Self {
        Self {
            room,
            participants: IndexMap::new(),
            stories: Vec::new(),
            current_story_id: None,
            voting_round: None,
            chat: VecDeque::new(),
            chat_limit: chat_limit.max(1),
            timer: RoomTimer::new(),
        }
    }

    /// Static room description and current settings.
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Participants in join order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look a participant up by id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// True when nobody is attached to the room anymore.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Stories in display order.
    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// Story currently being estimated.
    pub fn current_story_id(&self) -> Option<&str> {
        self.current_story_id.as_deref()
    }

    /// Active voting round, if any.
    pub fn voting_round(&self) -> Option<&VotingRound> {
        self.voting_round.as_ref()
    }

    /// Retained chat log, oldest first.
    pub fn chat(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> + ExactSizeIterator {
        self.chat.iter()
    }

    /// Countdown owned by the room.
    pub fn timer(&self) -> &RoomTimer {
        &self.timer
    }

    /// Whether `id` currently holds the moderator role.
    pub fn is_moderator(&self, id: &str) -> bool {
        self.participants.get(id).is_some_and(|p| p.is_moderator)
    }

    /// Add a participant or re-attach a known one.
    ///
    /// A reconnecting participant keeps their vote state and role; name and spectator flag are
    /// refreshed from the join request.
    pub fn join(&mut self, id: &str, name: &str, is_spectator: bool) -> JoinOutcome {
        let rejoined = match self.participants.get_mut(id) {
            Some(existing) => {
                existing.name = name.to_string();
                existing.connection_status = ConnectionStatus::Connected;
                if is_spectator && !existing.is_spectator {
                    existing.is_moderator = false;
                    existing.clear_vote();
                    if let Some(round) = self.voting_round.as_mut().filter(|r| !r.is_revealed()) {
                        round.votes.shift_remove(id);
                    }
                }
                existing.is_spectator = is_spectator;
                true
            }
            None => {
                let mut participant =
                    Participant::new(id.to_string(), name.to_string(), is_spectator);
                if !is_spectator && !self.has_connected_moderator() {
                    participant.is_moderator = true;
                }
                self.participants.insert(id.to_string(), participant);
                false
            }
        };

        self.ensure_moderator();
        let participant = self.participants[id].clone();
        JoinOutcome {
            participant,
            rejoined,
        }
    }

    /// Update a participant's transport status. Returns the updated record.
    pub fn set_connection_status(
        &mut self,
        id: &str,
        status: ConnectionStatus,
    ) -> Option<Participant> {
        self.participants.get_mut(id)?.connection_status = status;
        self.ensure_moderator();
        self.participants.get(id).cloned()
    }

    /// Delete a participant, handing the moderator role over when needed.
    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        let removed = self.participants.shift_remove(id)?;
        self.ensure_moderator();
        Some(removed)
    }

    /// Restore the single-moderator invariant among connected voters.
    ///
    /// When no connected voter is moderator, every stale flag is cleared and the earliest
    /// joined connected voter is promoted. When several are, the earliest joined one keeps it.
    /// Returns whether any flag changed.
    pub fn ensure_moderator(&mut self) -> bool {
        let mut changed = false;
        for participant in self.participants.values_mut() {
            if participant.is_spectator && participant.is_moderator {
                participant.is_moderator = false;
                changed = true;
            }
        }

        let Some(keeper) = self
            .participants
            .values()
            .filter(|p| p.is_active_voter())
            .find(|p| p.is_moderator)
            .or_else(|| self.participants.values().find(|p| p.is_active_voter()))
            .map(|p| p.id.clone())
        else {
            return changed;
        };

        for participant in self.participants.values_mut() {
            let should_moderate = participant.id == keeper;
            if participant.is_moderator != should_moderate {
                participant.is_moderator = should_moderate;
                changed = true;
            }
        }
        changed
    }

    /// Demote everyone and promote `id`. Fails for unknown participants and spectators.
    pub fn promote_moderator(&mut self, id: &str) -> bool {
        if !self.participants.get(id).is_some_and(|p| !p.is_spectator) {
            return false;
        }
        for participant in self.participants.values_mut() {
            participant.is_moderator = participant.id == id;
        }
        true
    }

    /// Record a vote for the active round. Only cards of the room's deck, or a blank, count.
    pub fn submit_vote(&mut self, participant_id: &str, story_id: &str, value: CardValue) -> bool {
        if value != CardValue::Blank && !self.room.cards().contains(&value) {
            return false;
        }
        let Some(round) = self.voting_round.as_mut() else {
            return false;
        };
        if round.story_id != story_id || round.is_revealed() {
            return false;
        }
        let Some(participant) = self.participants.get_mut(participant_id) else {
            return false;
        };
        if participant.is_spectator || (participant.has_voted && !self.room.settings.allow_revote)
        {
            return false;
        }

        round.votes.insert(
            participant_id.to_string(),
            Vote {
                participant_id: participant_id.to_string(),
                participant_name: participant.name.clone(),
                story_id: story_id.to_string(),
                value,
                timestamp: SystemTime::now(),
            },
        );
        participant.has_voted = true;
        true
    }

    /// Withdraw a participant's vote before reveal.
    pub fn clear_vote(&mut self, participant_id: &str) -> bool {
        let Some(round) = self.voting_round.as_mut().filter(|r| !r.is_revealed()) else {
            return false;
        };
        let Some(participant) = self.participants.get_mut(participant_id) else {
            return false;
        };
        round.votes.shift_remove(participant_id);
        participant.clear_vote();
        true
    }

    /// Reveal the active round, compute statistics and cache them on the story.
    pub fn reveal(&mut self) -> Option<RevealOutcome> {
        let round = self.voting_round.as_mut()?;
        let revealed_at = SystemTime::now();
        round.status = RoundStatus::Revealed;
        round.revealed_at = Some(revealed_at);

        let votes: Vec<Vote> = round.votes.values().cloned().collect();
        for vote in &votes {
            if let Some(participant) = self.participants.get_mut(&vote.participant_id) {
                participant.current_vote = Some(vote.value.clone());
            }
        }

        let stats = statistics::compute(&round.story_id, &votes);
        let started_at = round.started_at;
        if let Some(story) = self.stories.iter_mut().find(|s| s.id == round.story_id) {
            story.status = StoryStatus::Revealed;
            story.estimated_at = Some(revealed_at);
            story.cached = Some(CachedResult {
                votes: votes.clone(),
                stats: stats.clone(),
                started_at,
                revealed_at,
            });
        }

        Some(RevealOutcome { votes, stats })
    }

    /// Reopen the active round for the same story with no votes.
    pub fn reset_votes(&mut self) -> bool {
        let Some(round) = self.voting_round.as_mut() else {
            return false;
        };
        *round = VotingRound::open(round.story_id.clone());
        self.clear_all_votes();
        true
    }

    /// Change the story being estimated. `None` when `story_id` is unknown.
    pub fn set_current_story(&mut self, story_id: Option<&str>) -> Option<StorySelection> {
        let Some(story_id) = story_id else {
            self.current_story_id = None;
            self.voting_round = None;
            return Some(StorySelection::Cleared);
        };

        let story = self.stories.iter_mut().find(|s| s.id == story_id)?;
        self.current_story_id = Some(story.id.clone());

        let cached = story
            .cached
            .clone()
            .filter(|_| story.status == StoryStatus::Revealed);
        if cached.is_none() {
            story.status = StoryStatus::Voting;
        }

        self.clear_all_votes();
        match cached {
            Some(cached) => {
                self.voting_round = Some(VotingRound::replay(story_id.to_string(), &cached));
                for vote in &cached.votes {
                    if let Some(participant) = self.participants.get_mut(&vote.participant_id) {
                        participant.has_voted = true;
                        participant.current_vote = Some(vote.value.clone());
                    }
                }
                Some(StorySelection::Restored(RevealOutcome {
                    votes: cached.votes,
                    stats: cached.stats,
                }))
            }
            None => {
                self.voting_round = Some(VotingRound::open(story_id.to_string()));
                Some(StorySelection::Voting)
            }
        }
    }

    /// Append a story to the backlog.
    pub fn add_story(&mut self, new: NewStory) -> Story {
        let story = Story {
            id: generate_id(),
            room_id: self.room.id.clone(),
            title: new.title,
            description: new.description,
            order: new.order.unwrap_or(self.stories.len()),
            status: new.status.unwrap_or(StoryStatus::Pending),
            final_estimate: new.final_estimate,
            created_at: SystemTime::now(),
            estimated_at: None,
            cached: None,
        };
        self.stories.push(story.clone());
        story
    }

    /// Merge the provided fields into an existing story.
    pub fn update_story(&mut self, story_id: &str, update: StoryUpdate) -> Option<Story> {
        let story = self.stories.iter_mut().find(|s| s.id == story_id)?;
        if let Some(title) = update.title {
            story.title = title;
        }
        if let Some(description) = update.description {
            story.description = description;
        }
        if let Some(order) = update.order {
            story.order = order;
        }
        if let Some(status) = update.status {
            story.status = status;
        }
        if let Some(final_estimate) = update.final_estimate {
            story.final_estimate = final_estimate;
        }
        Some(story.clone())
    }

    /// Remove a story; deleting the current story also drops the active round.
    pub fn delete_story(&mut self, story_id: &str) -> bool {
        let Some(index) = self.stories.iter().position(|s| s.id == story_id) else {
            return false;
        };
        self.stories.remove(index);
        if self.current_story_id.as_deref() == Some(story_id) {
            self.current_story_id = None;
            self.voting_round = None;
        }
        true
    }

    /// Replace the backlog order with `story_ids`.
    ///
    /// Stories missing from the list are dropped and unknown or repeated ids are skipped.
    /// Returns how many stories were dropped.
    pub fn reorder_stories(&mut self, story_ids: &[StoryId]) -> usize {
        let mut remaining = std::mem::take(&mut self.stories);
        for id in story_ids {
            if let Some(index) = remaining.iter().position(|s| &s.id == id) {
                let mut story = remaining.remove(index);
                story.order = self.stories.len();
                self.stories.push(story);
            }
        }

        if let Some(current) = self.current_story_id.as_deref() {
            if remaining.iter().any(|s| s.id == current) {
                self.current_story_id = None;
                self.voting_round = None;
            }
        }
        remaining.len()
    }

    /// Assign the agreed estimate regardless of the story's status.
    pub fn set_final_estimate(&mut self, story_id: &str, value: Option<CardValue>) -> bool {
        let Some(story) = self.stories.iter_mut().find(|s| s.id == story_id) else {
            return false;
        };
        story.final_estimate = value;
        true
    }

    /// Append a participant's chat message.
    pub fn add_chat(&mut self, participant_id: &str, content: &str) -> Option<ChatMessage> {
        let participant = self.participants.get(participant_id)?;
        let message = ChatMessage {
            id: generate_id(),
            participant_id: participant.id.clone(),
            participant_name: participant.name.clone(),
            content: content.to_string(),
            timestamp: SystemTime::now(),
            kind: ChatKind::Message,
        };
        self.push_chat(message.clone());
        Some(message)
    }

    /// Append a room-generated notice.
    pub fn add_system_message(&mut self, content: &str) -> ChatMessage {
        let message = ChatMessage {
            id: generate_id(),
            participant_id: SYSTEM_PARTICIPANT_ID.to_string(),
            participant_name: SYSTEM_PARTICIPANT_NAME.to_string(),
            content: content.to_string(),
            timestamp: SystemTime::now(),
            kind: ChatKind::System,
        };
        self.push_chat(message.clone());
        message
    }

    /// Merge a partial settings update and return the resulting settings.
    pub fn update_settings(&mut self, update: SettingsUpdate) -> RoomSettings {
        self.room.settings.merge(update);
        self.room.settings.clone()
    }

    /// At least one connected voter exists and all of them have voted.
    pub fn all_voted(&self) -> bool {
        let mut voters = self.participants.values().filter(|p| p.is_active_voter());
        let Some(first) = voters.next() else {
            return false;
        };
        first.has_voted && voters.all(|p| p.has_voted)
    }

    /// Start a countdown using the configured duration. Returns its end time.
    pub fn start_timer<F>(&mut self, spawn: F) -> SystemTime
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.timer.start(self.room.settings.timer_duration, spawn)
    }

    /// Stop the countdown, returning the remaining seconds.
    pub fn pause_timer(&mut self) -> Option<u32> {
        self.timer.pause()
    }

    /// Stop and forget the countdown.
    pub fn reset_timer(&mut self) {
        self.timer.reset();
    }

    /// Apply a countdown tick if it belongs to the live countdown.
    pub fn tick_timer(&mut self, generation: u64) -> Option<TickOutcome> {
        self.timer.tick(generation)
    }

    /// Stop any countdown; used when the room goes away.
    pub fn cancel_timer(&mut self) {
        self.timer.cancel();
    }

    fn has_connected_moderator(&self) -> bool {
        self.participants
            .values()
            .any(|p| p.is_active_voter() && p.is_moderator)
    }

    fn clear_all_votes(&mut self) {
        for participant in self.participants.values_mut() {
            participant.clear_vote();
        }
    }

    fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push_back(message);
        while self.chat.len() > self.chat_limit {
            self.chat.pop_front();
        }
    }
}
