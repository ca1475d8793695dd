use std::{fmt, time::SystemTime};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::state::statistics::VotingStats;

/// Opaque short identifier of a room.
pub type RoomId = String;
/// Client-chosen identifier of a participant, stable across reconnects.
pub type ParticipantId = String;
/// Server-generated identifier of a story.
pub type StoryId = String;

/// Participant id used for room-generated chat notices.
pub const SYSTEM_PARTICIPANT_ID: &str = "system";
/// Display name used for room-generated chat notices.
pub const SYSTEM_PARTICIPANT_NAME: &str = "System";

/// Value carried by a card: an integer, a symbolic label ("?", "☕", "XL"...) or nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum CardValue {
    /// Numeric card contributing to average, median and spread.
    Number(i64),
    /// Symbolic card, excluded from numeric statistics.
    Label(String),
    /// Absent value.
    #[default]
    Blank,
}

impl CardValue {
    /// Numeric payload of the card, if any.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Label(label) => f.write_str(label),
            Self::Blank => f.write_str("null"),
        }
    }
}

impl From<i64> for CardValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CardValue {
    fn from(value: &str) -> Self {
        Self::Label(value.to_string())
    }
}

/// Named deck presets a room can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum DeckType {
    /// Classic Fibonacci sequence.
    Fibonacci,
    /// Compact Fibonacci sequence (1-13).
    FibonacciMini,
    /// T-shirt sizes.
    Tshirt,
    /// Powers of two.
    Powers2,
    /// Sequential 0-10 scale.
    Sequential,
    /// Explicit list supplied at creation time.
    Custom,
}

impl DeckType {
    /// Every deck type, in display order.
    pub const ALL: [DeckType; 6] = [
        DeckType::Fibonacci,
        DeckType::FibonacciMini,
        DeckType::Tshirt,
        DeckType::Powers2,
        DeckType::Sequential,
        DeckType::Custom,
    ];

    /// Cards of the preset. `Custom` has no preset cards.
    pub fn preset_cards(self) -> Vec<CardValue> {
        fn numbers(values: &[i64]) -> impl Iterator<Item = CardValue> + '_ {
            values.iter().copied().map(CardValue::Number)
        }
        fn labels<'a>(values: &'a [&'a str]) -> impl Iterator<Item = CardValue> + 'a {
            values.iter().copied().map(CardValue::from)
        }

        match self {
            DeckType::Fibonacci => numbers(&[0, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89])
                .chain(labels(&["?", "☕"]))
                .collect(),
            DeckType::FibonacciMini => numbers(&[1, 2, 3, 5, 8, 13])
                .chain(labels(&["☕"]))
                .collect(),
            DeckType::Tshirt => labels(&["XS", "S", "M", "L", "XL", "XXL", "?", "☕"]).collect(),
            DeckType::Powers2 => numbers(&[0, 1, 2, 4, 8, 16, 32, 64])
                .chain(labels(&["?", "☕"]))
                .collect(),
            DeckType::Sequential => (0..=10)
                .map(CardValue::Number)
                .chain(labels(&["?", "☕"]))
                .collect(),
            DeckType::Custom => Vec::new(),
        }
    }

    /// Human readable deck name.
    pub fn display_name(self) -> &'static str {
        match self {
            DeckType::Fibonacci => "Fibonacci",
            DeckType::FibonacciMini => "Fibonacci Mini",
            DeckType::Tshirt => "T-Shirt Sizes",
            DeckType::Powers2 => "Powers of 2",
            DeckType::Sequential => "Sequential (0-10)",
            DeckType::Custom => "Custom",
        }
    }
}

/// Moderator-controlled room settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Participants may change their vote before reveal.
    pub allow_revote: bool,
    /// Reveal automatically once every connected voter has voted.
    pub auto_reveal: bool,
    /// Clients display derived statistics after reveal.
    #[serde(alias = "showStatistics")]
    pub show_average: bool,
    /// Clients display the shared countdown.
    pub timer_enabled: bool,
    /// Countdown length in seconds.
    #[validate(range(min = 1, max = 3600))]
    pub timer_duration: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            allow_revote: true,
            auto_reveal: false,
            show_average: true,
            timer_enabled: false,
            timer_duration: 60,
        }
    }
}

/// Partial settings update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub allow_revote: Option<bool>,
    pub auto_reveal: Option<bool>,
    #[serde(alias = "showStatistics")]
    pub show_average: Option<bool>,
    pub timer_enabled: Option<bool>,
    #[validate(range(min = 1, max = 3600))]
    pub timer_duration: Option<u32>,
}

impl RoomSettings {
    /// Merge the provided fields over the current settings.
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(value) = update.allow_revote {
            self.allow_revote = value;
        }
        if let Some(value) = update.auto_reveal {
            self.auto_reveal = value;
        }
        if let Some(value) = update.show_average {
            self.show_average = value;
        }
        if let Some(value) = update.timer_enabled {
            self.timer_enabled = value;
        }
        if let Some(value) = update.timer_duration {
            self.timer_duration = value;
        }
    }
}

/// Static description of a room. Only `settings` changes after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub deck_type: DeckType,
    pub custom_deck: Option<Vec<CardValue>>,
    pub settings: RoomSettings,
    pub created_at: SystemTime,
    pub created_by: String,
}

impl Room {
    /// Cards players can pick from in this room.
    pub fn cards(&self) -> Vec<CardValue> {
        match (&self.deck_type, &self.custom_deck) {
            (DeckType::Custom, Some(cards)) => cards.clone(),
            (deck, _) => deck.preset_cards(),
        }
    }
}

/// Everything needed to create a room; the registry stamps the creation time.
#[derive(Debug, Clone)]
pub struct RoomSpec {
    pub id: RoomId,
    pub name: String,
    pub deck_type: DeckType,
    pub custom_deck: Option<Vec<CardValue>>,
    pub settings: RoomSettings,
    pub created_by: String,
}

/// Transport-level liveness of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Person attached to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub is_spectator: bool,
    pub is_moderator: bool,
    pub has_voted: bool,
    /// Only populated once the round is revealed.
    pub current_vote: Option<CardValue>,
    pub connection_status: ConnectionStatus,
    pub joined_at: SystemTime,
}

impl Participant {
    /// Fresh, connected participant without any vote.
    pub fn new(id: ParticipantId, name: String, is_spectator: bool) -> Self {
        Self {
            id,
            name,
            is_spectator,
            is_moderator: false,
            has_voted: false,
            current_vote: None,
            connection_status: ConnectionStatus::Connected,
            joined_at: SystemTime::now(),
        }
    }

    /// Connected and allowed to vote.
    pub fn is_active_voter(&self) -> bool {
        !self.is_spectator && self.connection_status == ConnectionStatus::Connected
    }

    pub(crate) fn clear_vote(&mut self) {
        self.has_voted = false;
        self.current_vote = None;
    }
}

/// Lifecycle of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum StoryStatus {
    Pending,
    Voting,
    Revealed,
    Skipped,
}

impl StoryStatus {
    /// Lowercase label used by exports.
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::Voting => "voting",
            StoryStatus::Revealed => "revealed",
            StoryStatus::Skipped => "skipped",
        }
    }
}

/// Votes and statistics captured when a story was revealed, replayed verbatim on recall.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub votes: Vec<Vote>,
    pub stats: VotingStats,
    pub started_at: SystemTime,
    pub revealed_at: SystemTime,
}

/// Unit of work being estimated.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: StoryId,
    pub room_id: RoomId,
    pub title: String,
    pub description: Option<String>,
    pub order: usize,
    pub status: StoryStatus,
    pub final_estimate: Option<CardValue>,
    pub created_at: SystemTime,
    pub estimated_at: Option<SystemTime>,
    pub cached: Option<CachedResult>,
}

/// Fields a client supplies when adding a story.
#[derive(Debug, Clone, Default)]
pub struct NewStory {
    pub title: String,
    pub description: Option<String>,
    pub order: Option<usize>,
    pub status: Option<StoryStatus>,
    pub final_estimate: Option<CardValue>,
}

/// Partial story update. The nested options distinguish "leave" from "clear".
#[derive(Debug, Clone, Default)]
pub struct StoryUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub order: Option<usize>,
    pub status: Option<StoryStatus>,
    pub final_estimate: Option<Option<CardValue>>,
}

/// A single participant's vote in a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub participant_id: ParticipantId,
    /// Display name snapshotted at vote time.
    pub participant_name: String,
    pub story_id: StoryId,
    pub value: CardValue,
    pub timestamp: SystemTime,
}

/// Whether the round still hides its votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundStatus {
    Voting,
    Revealed,
}

/// Transient voting state bound to the current story.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingRound {
    pub story_id: StoryId,
    pub status: RoundStatus,
    /// One vote per participant, in first-vote order.
    pub votes: IndexMap<ParticipantId, Vote>,
    pub started_at: SystemTime,
    pub revealed_at: Option<SystemTime>,
}

impl VotingRound {
    /// Open a new round for `story_id`.
    pub fn open(story_id: StoryId) -> Self {
        Self {
            story_id,
            status: RoundStatus::Voting,
            votes: IndexMap::new(),
            started_at: SystemTime::now(),
            revealed_at: None,
        }
    }

    /// Rebuild an already revealed round from cached results.
    pub fn replay(story_id: StoryId, cached: &CachedResult) -> Self {
        Self {
            story_id,
            status: RoundStatus::Revealed,
            votes: cached
                .votes
                .iter()
                .map(|vote| (vote.participant_id.clone(), vote.clone()))
                .collect(),
            started_at: cached.started_at,
            revealed_at: Some(cached.revealed_at),
        }
    }

    /// True once votes are visible.
    pub fn is_revealed(&self) -> bool {
        self.status == RoundStatus::Revealed
    }
}

/// Origin of a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatKind {
    Message,
    System,
}

/// Entry of the room chat log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub content: String,
    pub timestamp: SystemTime,
    pub kind: ChatKind,
}

/// Result of a reveal or of a cached replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealOutcome {
    pub votes: Vec<Vote>,
    pub stats: VotingStats,
}

/// Result of changing the current story.
#[derive(Debug, Clone, PartialEq)]
pub enum StorySelection {
    /// Current story cleared, no active round.
    Cleared,
    /// A fresh voting round was opened.
    Voting,
    /// A previously revealed story was restored from its cache.
    Restored(RevealOutcome),
}

/// Generate a short random identifier for stories and chat messages.
pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
