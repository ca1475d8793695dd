use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::room::{CreateRoomRequest, DeckSummary, ExportDocument, ExportQuery, RoomResponse},
    error::AppError,
    services::room_service::{self, ExportBody},
    state::SharedState,
};

/// Routes handling room creation, lookup and backlog export.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/export", get(export_room))
        .route("/decks", get(list_decks))
}

/// Create a room clients can then join over the WebSocket.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = RoomResponse),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Room id already taken")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<(StatusCode, Json<RoomResponse>), AppError> {
    let room = room_service::create_room(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(RoomResponse { room })))
}

/// Fetch a room description.
#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room found", body = RoomResponse),
        (status = 404, description = "Room not found")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    let room = room_service::get_room(&state, &id).await?;
    Ok(Json(RoomResponse { room }))
}

/// Export the room backlog as CSV or JSON.
#[utoipa::path(
    get,
    path = "/rooms/{id}/export",
    tag = "rooms",
    params(("id" = String, Path, description = "Room identifier"), ExportQuery),
    responses(
        (status = 200, description = "Backlog export", content(
            (ExportDocument = "application/json"),
            (String = "text/csv")
        )),
        (status = 404, description = "Room not found")
    )
)]
pub async fn export_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let response = match room_service::export_room(&state, &id, query.format).await? {
        ExportBody::Json(document) => Json(document).into_response(),
        ExportBody::Csv(csv) => (
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{id}-stories.csv\""),
                ),
            ],
            csv,
        )
            .into_response(),
    };
    Ok(response)
}

/// List the decks a room can be created with.
#[utoipa::path(
    get,
    path = "/decks",
    tag = "rooms",
    responses((status = 200, description = "Available decks", body = [DeckSummary]))
)]
pub async fn list_decks() -> Json<Vec<DeckSummary>> {
    Json(room_service::list_decks())
}
