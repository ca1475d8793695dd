use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Service name.
    pub service: String,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    /// Rooms currently alive, absent when the room engine did not answer.
    pub active_rooms: Option<usize>,
}

impl HealthResponse {
    /// Create a health response indicating the room engine is serving.
    pub fn ok(timestamp: String, active_rooms: usize) -> Self {
        Self {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp,
            active_rooms: Some(active_rooms),
        }
    }

    /// Create a health response indicating the room engine is unreachable.
    pub fn degraded(timestamp: String) -> Self {
        Self {
            status: "degraded".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp,
            active_rooms: None,
        }
    }
}

const SERVICE_NAME: &str = "planning-poker";
