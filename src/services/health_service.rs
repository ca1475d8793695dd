use std::time::SystemTime;

use tracing::warn;

use crate::{
    dto::{format_system_time, health::HealthResponse},
    services::dispatcher::Command,
    state::SharedState,
};

/// Report liveness of the room engine together with its room count.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let timestamp = format_system_time(SystemTime::now());
    match state.request(|reply| Command::Stats { reply }).await {
        Ok(stats) => HealthResponse::ok(timestamp, stats.rooms),
        Err(err) => {
            warn!(error = %err, "room engine health check failed");
            HealthResponse::degraded(timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::AppConfig, state::AppState};

    use super::*;

    #[tokio::test]
    async fn reports_room_count() {
        let (state, dispatcher) = AppState::new(AppConfig::default());
        tokio::spawn(dispatcher.run());

        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_rooms, Some(0));
    }

    #[tokio::test]
    async fn degraded_without_engine() {
        let (state, dispatcher) = AppState::new(AppConfig::default());
        drop(dispatcher);

        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.active_rooms, None);
    }
}
