//! Real-time protocol: JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dto::room::{
        ChatMessageSummary, ParticipantSummary, RoomStateSummary, StorySummary, VoteSummary,
        VotingStatsSummary,
    },
    state::models::{
        CardValue, NewStory, ParticipantId, RoomId, RoomSettings, SettingsUpdate, StoryId,
        StoryStatus, StoryUpdate,
    },
};

/// Error code sent when a join targets a missing room.
pub const ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
/// Error code sent when a join request is rejected.
pub const JOIN_FAILED: &str = "JOIN_FAILED";
/// Error code sent to the connections of a kicked participant.
pub const KICKED: &str = "KICKED";

/// Messages accepted from room clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        room_id: RoomId,
        participant_id: ParticipantId,
        name: String,
        #[serde(default)]
        is_spectator: bool,
    },
    Vote {
        story_id: StoryId,
        #[serde(default)]
        value: CardValue,
    },
    ClearVote,
    Reveal,
    ResetVotes,
    NextStory {
        #[serde(default)]
        story_id: Option<StoryId>,
    },
    AddStory {
        story: NewStoryPayload,
    },
    UpdateStory {
        story_id: StoryId,
        updates: StoryUpdatePayload,
    },
    DeleteStory {
        story_id: StoryId,
    },
    ReorderStories {
        story_ids: Vec<StoryId>,
    },
    SetFinalEstimate {
        story_id: StoryId,
        #[serde(default)]
        value: Option<CardValue>,
    },
    Chat {
        content: String,
    },
    StartTimer,
    PauseTimer,
    ResetTimer,
    UpdateSettings {
        settings: SettingsUpdate,
    },
    KickParticipant {
        participant_id: ParticipantId,
    },
    PromoteModerator {
        participant_id: ParticipantId,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Tag name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Vote { .. } => "vote",
            Self::ClearVote => "clearVote",
            Self::Reveal => "reveal",
            Self::ResetVotes => "resetVotes",
            Self::NextStory { .. } => "nextStory",
            Self::AddStory { .. } => "addStory",
            Self::UpdateStory { .. } => "updateStory",
            Self::DeleteStory { .. } => "deleteStory",
            Self::ReorderStories { .. } => "reorderStories",
            Self::SetFinalEstimate { .. } => "setFinalEstimate",
            Self::Chat { .. } => "chat",
            Self::StartTimer => "startTimer",
            Self::PauseTimer => "pauseTimer",
            Self::ResetTimer => "resetTimer",
            Self::UpdateSettings { .. } => "updateSettings",
            Self::KickParticipant { .. } => "kickParticipant",
            Self::PromoteModerator { .. } => "promoteModerator",
            Self::Unknown => "unknown",
        }
    }
}

/// Story fields supplied by `addStory`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStoryPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: Option<usize>,
    #[serde(default)]
    pub status: Option<StoryStatus>,
    #[serde(default)]
    pub final_estimate: Option<CardValue>,
}

impl From<NewStoryPayload> for NewStory {
    fn from(payload: NewStoryPayload) -> Self {
        Self {
            title: payload.title,
            description: payload.description,
            order: payload.order,
            status: payload.status,
            final_estimate: payload.final_estimate,
        }
    }
}

/// Partial story update supplied by `updateStory`.
///
/// `description` and `finalEstimate` distinguish an absent field (keep) from `null` (clear).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryUpdatePayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub order: Option<usize>,
    #[serde(default)]
    pub status: Option<StoryStatus>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub final_estimate: Option<Option<CardValue>>,
}

impl From<StoryUpdatePayload> for StoryUpdate {
    fn from(payload: StoryUpdatePayload) -> Self {
        Self {
            title: payload.title,
            description: payload.description,
            order: payload.order,
            status: payload.status,
            final_estimate: payload.final_estimate,
        }
    }
}

impl SettingsUpdate {
    /// Validate with the same rules used at room creation.
    pub fn checked(self) -> Result<Self, validator::ValidationErrors> {
        self.validate().map(|_| self)
    }
}

/// Messages pushed to room clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Sync {
        state: RoomStateSummary,
    },
    ParticipantJoined {
        participant: ParticipantSummary,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    ParticipantUpdated {
        participant: ParticipantSummary,
    },
    /// Carries no vote value.
    VoteReceived {
        participant_id: ParticipantId,
    },
    VoteCleared {
        participant_id: ParticipantId,
    },
    VotesRevealed {
        votes: Vec<VoteSummary>,
        stats: VotingStatsSummary,
    },
    VotesCleared,
    StoryChanged {
        story_id: Option<StoryId>,
    },
    StoriesUpdated {
        stories: Vec<StorySummary>,
    },
    TimerStarted {
        ends_at: String,
    },
    TimerTick {
        remaining: u32,
    },
    TimerPaused {
        remaining: u32,
    },
    TimerExpired,
    TimerReset,
    ChatMessage {
        message: ChatMessageSummary,
    },
    SettingsUpdated {
        settings: RoomSettings,
    },
    Error {
        message: String,
        code: String,
    },
}

impl ServerMessage {
    /// Error event scoped to one connection.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_join_with_defaults() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"join","roomId":"abc","participantId":"p1","name":"Alice"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            ClientMessage::Join {
                room_id: "abc".into(),
                participant_id: "p1".into(),
                name: "Alice".into(),
                is_spectator: false,
            }
        );
    }

    #[test]
    fn parses_card_values() {
        let number = ClientMessage::from_json_str(r#"{"type":"vote","storyId":"s","value":8}"#);
        let label = ClientMessage::from_json_str(r#"{"type":"vote","storyId":"s","value":"?"}"#);
        let blank = ClientMessage::from_json_str(r#"{"type":"vote","storyId":"s","value":null}"#);

        assert!(matches!(number, Ok(ClientMessage::Vote { value: CardValue::Number(8), .. })));
        assert!(matches!(label, Ok(ClientMessage::Vote { value: CardValue::Label(ref l), .. }) if l == "?"));
        assert!(matches!(blank, Ok(ClientMessage::Vote { value: CardValue::Blank, .. })));
    }

    #[test]
    fn payloadless_messages_tolerate_empty_bodies() {
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"reveal"}"#).unwrap(),
            ClientMessage::Reveal
        );
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"clearVote","extra":{}}"#).unwrap(),
            ClientMessage::ClearVote
        );
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"nextStory","storyId":null}"#).unwrap(),
            ClientMessage::NextStory { story_id: None }
        );
    }

    #[test]
    fn unknown_tags_are_not_errors() {
        assert_eq!(
            ClientMessage::from_json_str(r#"{"type":"dance","moves":3}"#).unwrap(),
            ClientMessage::Unknown
        );
        assert!(ClientMessage::from_json_str("not json").is_err());
        assert!(ClientMessage::from_json_str(r#"{"type":"vote"}"#).is_err());
    }

    #[test]
    fn story_update_distinguishes_absent_from_null() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"updateStory","storyId":"s","updates":{"description":null,"title":"New"}}"#,
        )
        .unwrap();
        let ClientMessage::UpdateStory { updates, .. } = message else {
            panic!("expected updateStory");
        };
        assert_eq!(updates.title.as_deref(), Some("New"));
        assert_eq!(updates.description, Some(None));
        assert_eq!(updates.final_estimate, None);
    }

    #[test]
    fn settings_update_is_validated() {
        let message = ClientMessage::from_json_str(
            r#"{"type":"updateSettings","settings":{"timerDuration":0}}"#,
        )
        .unwrap();
        let ClientMessage::UpdateSettings { settings } = message else {
            panic!("expected updateSettings");
        };
        assert!(settings.checked().is_err());

        let legacy = ClientMessage::from_json_str(
            r#"{"type":"updateSettings","settings":{"showStatistics":false}}"#,
        )
        .unwrap();
        let ClientMessage::UpdateSettings { settings } = legacy else {
            panic!("expected updateSettings");
        };
        assert_eq!(settings.checked().unwrap().show_average, Some(false));
    }

    #[test]
    fn server_messages_are_tagged_camel_case() {
        let value = serde_json::to_value(ServerMessage::VoteReceived {
            participant_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "voteReceived", "participantId": "p1" }));

        let value = serde_json::to_value(ServerMessage::TimerExpired).unwrap();
        assert_eq!(value, json!({ "type": "timerExpired" }));

        let value = serde_json::to_value(ServerMessage::error(KICKED, "removed")).unwrap();
        assert_eq!(
            value,
            json!({ "type": "error", "message": "removed", "code": "KICKED" })
        );
    }
}
