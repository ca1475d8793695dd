pub mod export;
pub mod models;
pub mod registry;
pub mod room;
pub mod session;
pub mod statistics;
pub mod timer;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    config::AppConfig,
    error::ServiceError,
    services::dispatcher::{Command, Dispatcher},
};

pub type SharedState = Arc<AppState>;

/// Handle shared by every HTTP and WebSocket handler.
///
/// All room state lives inside the [`Dispatcher`] task; this only holds the way in.
pub struct AppState {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<AppConfig>,
}

impl AppState {
    /// Construct the shared state together with the dispatcher that must be spawned to serve it.
    pub fn new(config: AppConfig) -> (SharedState, Dispatcher) {
        let config = Arc::new(config);
        let (dispatcher, commands) = Dispatcher::new(config.clone());
        (Arc::new(Self { commands, config }), dispatcher)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Enqueue a command without waiting for its effect.
    pub fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::Unavailable)
    }

    /// Enqueue a command carrying a reply channel and wait for the answer.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        match timeout(self.config.request_timeout, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ServiceError::Unavailable),
            Err(_) => {
                warn!(
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "room engine did not answer in time"
                );
                Err(ServiceError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn request_round_trips_through_the_engine() {
        let (state, dispatcher) = AppState::new(AppConfig::default());
        let engine = tokio::spawn(dispatcher.run());

        let stats = state
            .request(|reply| Command::Stats { reply })
            .await
            .unwrap();
        assert_eq!(stats.rooms, 0);

        drop(state);
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn request_reports_stopped_engine() {
        let (state, dispatcher) = AppState::new(AppConfig::default());
        drop(dispatcher);

        let err = state
            .request(|reply| Command::Stats { reply })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_when_engine_is_stuck() {
        let (state, _dispatcher) = AppState::new(AppConfig {
            request_timeout: Duration::from_millis(50),
            ..AppConfig::default()
        });

        let err = state
            .request(|reply| Command::Stats { reply })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
    }
}
