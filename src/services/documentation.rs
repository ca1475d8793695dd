use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the planning poker backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::export_room,
        crate::routes::rooms::list_decks,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::RoomResponse,
            crate::dto::room::RoomSummary,
            crate::dto::room::DeckSummary,
            crate::dto::room::ExportFormat,
            crate::dto::room::ExportDocument,
            crate::dto::room::ExportedStory,
            crate::state::models::CardValue,
            crate::state::models::DeckType,
            crate::state::models::RoomSettings,
            crate::state::models::StoryStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room creation, lookup and export"),
        (name = "realtime", description = "WebSocket protocol for room clients"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_room_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/healthcheck", "/rooms", "/rooms/{id}", "/rooms/{id}/export", "/decks", "/ws"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
