//! Projections of room state exposed over HTTP and in real-time events.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::{
    dto::{
        format_system_time,
        validation::{validate_deck, validate_display_name, validate_room_id},
    },
    state::{
        export::ExportRow,
        models::{
            CardValue, ChatKind, ChatMessage, ConnectionStatus, DeckType, Participant,
            ParticipantId, Room, RoomId, RoomSettings, RoundStatus, Story, StoryId, StoryStatus,
            Vote, VotingRound,
        },
        room::RoomAggregate,
        statistics::VotingStats,
        timer::TimerState,
    },
};

/// Payload used to create a room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_create_room_deck"))]
pub struct CreateRoomRequest {
    /// Requested identifier; generated when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_room_id"))]
    pub id: Option<String>,
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    pub deck_type: DeckType,
    /// Required when `deckType` is `custom`.
    #[serde(default)]
    pub custom_deck: Option<Vec<CardValue>>,
    /// Missing fields fall back to defaults.
    #[serde(default)]
    #[validate(nested)]
    pub settings: Option<RoomSettings>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn validate_create_room_deck(request: &CreateRoomRequest) -> Result<(), ValidationError> {
    validate_deck(request.deck_type, request.custom_deck.as_deref())
}

/// Public description of a room.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub deck_type: DeckType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_deck: Option<Vec<CardValue>>,
    /// Cards players pick from, resolved from the deck type.
    pub cards: Vec<CardValue>,
    pub settings: RoomSettings,
    pub created_at: String,
    pub created_by: String,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.clone(),
            name: room.name.clone(),
            deck_type: room.deck_type,
            custom_deck: room.custom_deck.clone(),
            cards: room.cards(),
            settings: room.settings.clone(),
            created_at: format_system_time(room.created_at),
            created_by: room.created_by.clone(),
        }
    }
}

/// Envelope returned by the room endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomResponse {
    pub room: RoomSummary,
}

/// Named deck preset.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummary {
    pub deck_type: DeckType,
    pub name: String,
    /// Empty for the custom deck.
    pub cards: Vec<CardValue>,
}

impl From<DeckType> for DeckSummary {
    fn from(deck_type: DeckType) -> Self {
        Self {
            deck_type,
            name: deck_type.display_name().to_string(),
            cards: deck_type.preset_cards(),
        }
    }
}

/// Export flavours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

/// Query string of the export endpoint.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// `json` (default) or `csv`.
    #[serde(default)]
    pub format: ExportFormat,
}

/// One story inside a JSON export.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStory {
    pub title: String,
    pub description: Option<String>,
    pub final_estimate: Option<CardValue>,
    pub status: StoryStatus,
}

impl From<ExportRow> for ExportedStory {
    fn from(row: ExportRow) -> Self {
        Self {
            title: row.title,
            description: row.description,
            final_estimate: row.final_estimate,
            status: row.status,
        }
    }
}

/// JSON export of a room's backlog.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub room_name: String,
    pub exported_at: String,
    pub stories: Vec<ExportedStory>,
}

/// Participant as seen by every room member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub name: String,
    pub is_spectator: bool,
    pub is_moderator: bool,
    pub has_voted: bool,
    /// Only set once the round is revealed.
    pub current_vote: Option<CardValue>,
    pub connection_status: ConnectionStatus,
    pub joined_at: String,
}

impl From<&Participant> for ParticipantSummary {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            name: participant.name.clone(),
            is_spectator: participant.is_spectator,
            is_moderator: participant.is_moderator,
            has_voted: participant.has_voted,
            current_vote: participant.current_vote.clone(),
            connection_status: participant.connection_status,
            joined_at: format_system_time(participant.joined_at),
        }
    }
}

/// A revealed vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub story_id: StoryId,
    pub value: CardValue,
    pub timestamp: String,
}

impl From<&Vote> for VoteSummary {
    fn from(vote: &Vote) -> Self {
        Self {
            participant_id: vote.participant_id.clone(),
            participant_name: vote.participant_name.clone(),
            story_id: vote.story_id.clone(),
            value: vote.value.clone(),
            timestamp: format_system_time(vote.timestamp),
        }
    }
}

/// Statistics of a revealed round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStatsSummary {
    pub story_id: StoryId,
    pub votes: Vec<VoteSummary>,
    pub average: Option<f64>,
    pub median: Option<f64>,
    pub mode: Vec<CardValue>,
    pub consensus: bool,
    pub spread: Option<u64>,
    pub distribution: IndexMap<String, usize>,
    /// Fibonacci card closest to the average.
    pub suggested_estimate: Option<i64>,
    pub high_disagreement: bool,
}

impl From<&VotingStats> for VotingStatsSummary {
    fn from(stats: &VotingStats) -> Self {
        Self {
            story_id: stats.story_id.clone(),
            votes: stats.votes.iter().map(VoteSummary::from).collect(),
            average: stats.average,
            median: stats.median,
            mode: stats.mode.clone(),
            consensus: stats.consensus,
            spread: stats.spread,
            distribution: stats.distribution.clone(),
            suggested_estimate: stats.suggested_estimate(),
            high_disagreement: stats.high_disagreement(),
        }
    }
}

/// Story with its cached results, if it was revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: StoryId,
    pub room_id: RoomId,
    pub title: String,
    pub description: Option<String>,
    pub order: usize,
    pub status: StoryStatus,
    pub final_estimate: Option<CardValue>,
    pub created_at: String,
    pub estimated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_votes: Option<Vec<VoteSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_stats: Option<VotingStatsSummary>,
}

impl From<&Story> for StorySummary {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id.clone(),
            room_id: story.room_id.clone(),
            title: story.title.clone(),
            description: story.description.clone(),
            order: story.order,
            status: story.status,
            final_estimate: story.final_estimate.clone(),
            created_at: format_system_time(story.created_at),
            estimated_at: story.estimated_at.map(format_system_time),
            cached_votes: story
                .cached
                .as_ref()
                .map(|cached| cached.votes.iter().map(VoteSummary::from).collect()),
            cached_stats: story
                .cached
                .as_ref()
                .map(|cached| VotingStatsSummary::from(&cached.stats)),
        }
    }
}

/// Voting round as exposed to clients.
///
/// While voting only the ids of participants who voted are listed; values appear once revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingRoundSummary {
    pub story_id: StoryId,
    pub status: RoundStatus,
    pub voted_participant_ids: Vec<ParticipantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<Vec<VoteSummary>>,
    pub started_at: String,
    pub revealed_at: Option<String>,
}

impl From<&VotingRound> for VotingRoundSummary {
    fn from(round: &VotingRound) -> Self {
        Self {
            story_id: round.story_id.clone(),
            status: round.status,
            voted_participant_ids: round.votes.keys().cloned().collect(),
            votes: round
                .is_revealed()
                .then(|| round.votes.values().map(VoteSummary::from).collect()),
            started_at: format_system_time(round.started_at),
            revealed_at: round.revealed_at.map(format_system_time),
        }
    }
}

/// Chat entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageSummary {
    pub id: String,
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub content: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl From<&ChatMessage> for ChatMessageSummary {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            participant_id: message.participant_id.clone(),
            participant_name: message.participant_name.clone(),
            content: message.content.clone(),
            timestamp: format_system_time(message.timestamp),
            kind: message.kind,
        }
    }
}

/// Shared countdown. Absent from snapshots while idle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSummary {
    pub is_running: bool,
    pub remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
}

impl TimerSummary {
    /// Project a timer state, `None` when idle.
    pub fn from_state(state: TimerState) -> Option<Self> {
        match state {
            TimerState::Idle => None,
            TimerState::Running { ends_at, remaining } => Some(Self {
                is_running: true,
                remaining,
                ends_at: Some(format_system_time(ends_at)),
            }),
            TimerState::Paused { remaining } => Some(Self {
                is_running: false,
                remaining,
                ends_at: None,
            }),
        }
    }
}

/// Full room snapshot sent on join and after structural changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateSummary {
    pub room: RoomSummary,
    pub participants: Vec<ParticipantSummary>,
    pub stories: Vec<StorySummary>,
    pub current_story_id: Option<StoryId>,
    pub voting_round: Option<VotingRoundSummary>,
    /// Most recent chat messages, oldest first.
    pub chat_messages: Vec<ChatMessageSummary>,
    pub timer: Option<TimerSummary>,
}

impl RoomStateSummary {
    /// Snapshot `room`, keeping the last `chat_limit` chat messages.
    pub fn from_aggregate(room: &RoomAggregate, chat_limit: usize) -> Self {
        let skip = room.chat().len().saturating_sub(chat_limit);
        Self {
            room: RoomSummary::from(room.room()),
            participants: room.participants().map(ParticipantSummary::from).collect(),
            stories: stories_summary(room.stories()),
            current_story_id: room.current_story_id().map(str::to_string),
            voting_round: room.voting_round().map(VotingRoundSummary::from),
            chat_messages: room.chat().skip(skip).map(ChatMessageSummary::from).collect(),
            timer: TimerSummary::from_state(room.timer().state()),
        }
    }
}

/// Project a backlog in display order.
pub fn stories_summary(stories: &[Story]) -> Vec<StorySummary> {
    stories.iter().map(StorySummary::from).collect()
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;

    use crate::state::{
        models::NewStory,
        room::{DEFAULT_CHAT_HISTORY_LIMIT, tests::sample_room},
    };

    use super::*;

    fn voting_room() -> (RoomAggregate, StoryId) {
        let mut room = RoomAggregate::new(sample_room("room"), DEFAULT_CHAT_HISTORY_LIMIT);
        room.join("a", "Alice", false);
        room.join("b", "Bob", false);
        let story = room
            .add_story(NewStory {
                title: "Login".into(),
                ..NewStory::default()
            })
            .id;
        room.set_current_story(Some(&story));
        room.submit_vote("a", &story, CardValue::Number(5));
        (room, story)
    }

    #[test]
    fn sync_hides_vote_values_while_voting() {
        let (room, _) = voting_room();
        let snapshot = RoomStateSummary::from_aggregate(&room, 100);
        let value = serde_json::to_value(&snapshot).unwrap();

        let round = &value["votingRound"];
        assert_eq!(round["status"], "voting");
        assert_eq!(round["votedParticipantIds"], json!(["a"]));
        assert!(round.get("votes").is_none());
        assert_eq!(value["participants"][0]["hasVoted"], true);
        assert_eq!(value["participants"][0]["currentVote"], serde_json::Value::Null);
        assert!(!value.to_string().contains("\"value\":5"));
    }

    #[test]
    fn sync_exposes_votes_once_revealed() {
        let (mut room, _) = voting_room();
        room.reveal();
        let value = serde_json::to_value(RoomStateSummary::from_aggregate(&room, 100)).unwrap();

        assert_eq!(value["votingRound"]["votes"][0]["value"], 5);
        assert_eq!(value["participants"][0]["currentVote"], 5);
        assert_eq!(value["stories"][0]["cachedStats"]["average"], 5.0);
        assert_eq!(value["stories"][0]["cachedStats"]["suggestedEstimate"], 5);
        assert_eq!(value["stories"][0]["cachedStats"]["highDisagreement"], false);
    }

    #[test]
    fn sync_keeps_latest_chat_messages() {
        let (mut room, _) = voting_room();
        for index in 0..150 {
            room.add_chat("a", &index.to_string());
        }
        let snapshot = RoomStateSummary::from_aggregate(&room, 100);
        assert_eq!(snapshot.chat_messages.len(), 100);
        assert_eq!(snapshot.chat_messages[0].content, "50");
        assert_eq!(snapshot.chat_messages[99].content, "149");
    }

    #[test]
    fn create_room_request_validation() {
        let valid: CreateRoomRequest = serde_json::from_value(json!({
            "name": "Sprint 42",
            "deckType": "tshirt",
            "settings": { "autoReveal": true }
        }))
        .unwrap();
        assert!(valid.validate().is_ok());
        assert!(valid.settings.as_ref().unwrap().auto_reveal);
        assert!(valid.settings.as_ref().unwrap().allow_revote);

        let blank_name: CreateRoomRequest =
            serde_json::from_value(json!({ "name": " ", "deckType": "fibonacci" })).unwrap();
        assert!(blank_name.validate().is_err());

        let bad_id: CreateRoomRequest = serde_json::from_value(
            json!({ "id": "no spaces", "name": "Sprint", "deckType": "fibonacci" }),
        )
        .unwrap();
        assert!(bad_id.validate().is_err());

        let missing_deck: CreateRoomRequest =
            serde_json::from_value(json!({ "name": "Sprint", "deckType": "custom" })).unwrap();
        assert!(missing_deck.validate().is_err());

        let bad_timer: CreateRoomRequest = serde_json::from_value(json!({
            "name": "Sprint",
            "deckType": "fibonacci",
            "settings": { "timerDuration": 0 }
        }))
        .unwrap();
        assert!(bad_timer.validate().is_err());
    }

    #[test]
    fn custom_cards_accept_numbers_labels_and_null() {
        let request: CreateRoomRequest = serde_json::from_value(json!({
            "name": "Sprint",
            "deckType": "custom",
            "customDeck": [1, "∞", null]
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(
            request.custom_deck,
            Some(vec![
                CardValue::Number(1),
                CardValue::from("∞"),
                CardValue::Blank
            ])
        );
    }

    #[test]
    fn timer_projection() {
        assert_eq!(TimerSummary::from_state(TimerState::Idle), None);
        let running = TimerSummary::from_state(TimerState::Running {
            ends_at: SystemTime::UNIX_EPOCH,
            remaining: 30,
        })
        .unwrap();
        assert!(running.is_running);
        assert_eq!(running.ends_at.as_deref(), Some("1970-01-01T00:00:00Z"));
        let paused = TimerSummary::from_state(TimerState::Paused { remaining: 12 }).unwrap();
        assert!(!paused.is_running);
        assert_eq!(paused.ends_at, None);
    }
}
