use std::time::SystemTime;

use rand::{Rng, distr::Alphanumeric};
use tracing::info;

use crate::{
    dto::{
        format_system_time,
        room::{CreateRoomRequest, DeckSummary, ExportDocument, ExportFormat, RoomSummary},
    },
    error::ServiceError,
    services::dispatcher::Command,
    state::{
        SharedState,
        export::rows_csv,
        models::{DeckType, RoomSpec},
    },
};

const GENERATED_ROOM_ID_LEN: usize = 10;
const DEFAULT_CREATOR: &str = "anonymous";

/// Rendered backlog export.
#[derive(Debug)]
pub enum ExportBody {
    /// Structured document.
    Json(ExportDocument),
    /// CSV text.
    Csv(String),
}

/// Register a room from a validated creation request.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomSummary, ServiceError> {
    let spec = room_spec(request);
    let room = state
        .request(|reply| Command::CreateRoom { spec, reply })
        .await??;
    info!(room_id = %room.id, deck_type = ?room.deck_type, "room created over http");
    Ok(RoomSummary::from(&room))
}

/// Fetch a room description.
pub async fn get_room(state: &SharedState, room_id: &str) -> Result<RoomSummary, ServiceError> {
    state
        .request(|reply| Command::GetRoom {
            room_id: room_id.to_string(),
            reply,
        })
        .await?
        .map(|room| RoomSummary::from(&room))
        .ok_or_else(|| room_not_found(room_id))
}

/// Export a room backlog in the requested format.
pub async fn export_room(
    state: &SharedState,
    room_id: &str,
    format: ExportFormat,
) -> Result<ExportBody, ServiceError> {
    let export = state
        .request(|reply| Command::ExportRoom {
            room_id: room_id.to_string(),
            reply,
        })
        .await?
        .ok_or_else(|| room_not_found(room_id))?;

    Ok(match format {
        ExportFormat::Csv => ExportBody::Csv(rows_csv(&export.rows)),
        ExportFormat::Json => ExportBody::Json(ExportDocument {
            room_name: export.room_name,
            exported_at: format_system_time(SystemTime::now()),
            stories: export.rows.into_iter().map(Into::into).collect(),
        }),
    })
}

/// Every deck a room can be created with.
pub fn list_decks() -> Vec<DeckSummary> {
    DeckType::ALL.into_iter().map(DeckSummary::from).collect()
}

fn room_spec(request: CreateRoomRequest) -> RoomSpec {
    let custom_deck = match request.deck_type {
        DeckType::Custom => request.custom_deck,
        _ => None,
    };
    RoomSpec {
        id: request.id.unwrap_or_else(generate_room_id),
        name: request.name.trim().to_string(),
        deck_type: request.deck_type,
        custom_deck,
        settings: request.settings.unwrap_or_default(),
        created_by: request
            .created_by
            .filter(|creator| !creator.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CREATOR.to_string()),
    }
}

fn generate_room_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(GENERATED_ROOM_ID_LEN)
        .map(char::from)
        .collect()
}

fn room_not_found(room_id: &str) -> ServiceError {
    ServiceError::NotFound(format!("room `{room_id}` not found"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{config::AppConfig, state::AppState};

    use super::*;

    fn request(value: serde_json::Value) -> CreateRoomRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn generated_ids_are_short_alphanumeric() {
        let id = generate_room_id();
        assert_eq!(id.len(), GENERATED_ROOM_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn spec_fills_defaults() {
        let spec = room_spec(request(json!({
            "name": "  Sprint 42 ",
            "deckType": "tshirt",
            "customDeck": [1, 2]
        })));
        assert_eq!(spec.name, "Sprint 42");
        assert_eq!(spec.created_by, "anonymous");
        assert_eq!(spec.custom_deck, None);
        assert_eq!(spec.id.len(), GENERATED_ROOM_ID_LEN);
        assert_eq!(spec.settings.timer_duration, 60);
    }

    #[test]
    fn decks_cover_every_type() {
        let decks = list_decks();
        assert_eq!(decks.len(), DeckType::ALL.len());
        assert!(decks.iter().any(|d| d.deck_type == DeckType::Custom && d.cards.is_empty()));
    }

    #[tokio::test]
    async fn create_get_and_export() {
        let (state, dispatcher) = AppState::new(AppConfig::default());
        tokio::spawn(dispatcher.run());

        let created = create_room(
            &state,
            request(json!({ "id": "sprint", "name": "Sprint", "deckType": "fibonacci" })),
        )
        .await
        .unwrap();
        assert_eq!(created.id, "sprint");

        let duplicate = create_room(
            &state,
            request(json!({ "id": "sprint", "name": "Again", "deckType": "fibonacci" })),
        )
        .await;
        assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));

        assert_eq!(get_room(&state, "sprint").await.unwrap().name, "Sprint");
        assert!(matches!(
            get_room(&state, "missing").await,
            Err(ServiceError::NotFound(_))
        ));

        let Ok(ExportBody::Csv(csv)) = export_room(&state, "sprint", ExportFormat::Csv).await
        else {
            panic!("expected csv export");
        };
        assert_eq!(csv, "Title,Description,Final Estimate,Status");

        let Ok(ExportBody::Json(document)) =
            export_room(&state, "sprint", ExportFormat::Json).await
        else {
            panic!("expected json export");
        };
        assert_eq!(document.room_name, "Sprint");
        assert!(document.stories.is_empty());
    }
}
