//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::DEFAULT_CHAT_HISTORY_LIMIT;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLANNING_POKER_CONFIG_PATH";

const DEFAULT_RECONNECT_GRACE_SECS: u64 = 30;
const DEFAULT_SYNC_CHAT_LIMIT: usize = 100;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long a disconnected participant is kept before removal.
    pub reconnect_grace: Duration,
    /// Chat messages retained per room.
    pub chat_history_limit: usize,
    /// Chat messages included in a `sync` snapshot.
    pub sync_chat_limit: usize,
    /// Upper bound for an HTTP request waiting on the engine.
    pub request_timeout: Duration,
    /// Restrict moderator actions to the room moderator.
    pub enforce_moderator: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        grace_secs = app_config.reconnect_grace.as_secs(),
                        enforce_moderator = app_config.enforce_moderator,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    reconnect_grace_secs: u64,
    chat_history_limit: usize,
    sync_chat_limit: usize,
    request_timeout_ms: u64,
    enforce_moderator: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: DEFAULT_RECONNECT_GRACE_SECS,
            chat_history_limit: DEFAULT_CHAT_HISTORY_LIMIT,
            sync_chat_limit: DEFAULT_SYNC_CHAT_LIMIT,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            enforce_moderator: true,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            reconnect_grace: Duration::from_secs(value.reconnect_grace_secs),
            chat_history_limit: value.chat_history_limit.max(1),
            sync_chat_limit: value.sync_chat_limit.min(value.chat_history_limit.max(1)),
            request_timeout: Duration::from_millis(value.request_timeout_ms.max(1)),
            enforce_moderator: value.enforce_moderator,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
