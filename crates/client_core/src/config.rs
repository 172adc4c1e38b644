use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "client.toml";
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_LOBBY_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid server url '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("server_url must start with http:// or https://, got '{0}'")]
    UnsupportedScheme(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    /// Explicit websocket base; derived from `server_url` when unset.
    pub ws_url: Option<String>,
    pub lobby_poll_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_url: None,
            lobby_poll_interval_ms: DEFAULT_LOBBY_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    ws_url: Option<String>,
    lobby_poll_interval_ms: Option<u64>,
}

impl ClientSettings {
    /// REST prefix, e.g. `http://host:8000/api`.
    pub fn api_base_url(&self) -> Result<String, ConfigError> {
        let base = self.validated_server_url()?;
        Ok(format!("{base}/api"))
    }

    /// Websocket base without a trailing slash, e.g. `ws://host:8000`.
    pub fn ws_base_url(&self) -> Result<String, ConfigError> {
        if let Some(ws_url) = self
            .ws_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            return Ok(ws_url.trim_end_matches('/').to_string());
        }
        let server_url = self.validated_server_url()?;
        if server_url.starts_with("https://") {
            Ok(server_url.replacen("https://", "wss://", 1))
        } else if server_url.starts_with("http://") {
            Ok(server_url.replacen("http://", "ws://", 1))
        } else {
            Err(ConfigError::UnsupportedScheme(server_url))
        }
    }

    pub fn lobby_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lobby_poll_interval_ms.max(1))
    }

    fn validated_server_url(&self) -> Result<String, ConfigError> {
        let trimmed = self.server_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|err| ConfigError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: err.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(trimmed.to_string()),
            _ => Err(ConfigError::UnsupportedScheme(self.server_url.clone())),
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(content) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&content) {
            Ok(file) => {
                if let Some(server_url) = file.server_url {
                    settings.server_url = server_url;
                }
                if file.ws_url.is_some() {
                    settings.ws_url = file.ws_url;
                }
                if let Some(interval) = file.lobby_poll_interval_ms {
                    settings.lobby_poll_interval_ms = interval;
                }
            }
            Err(err) => warn!(
                path = %path.display(),
                "config: ignoring unreadable settings file: {err}"
            ),
        }
    }

    if let Some(server_url) = env("SERVER_URL").or_else(|| env("APP__SERVER_URL")) {
        settings.server_url = server_url;
    }
    if let Some(ws_url) = env("WS_URL").or_else(|| env("APP__WS_URL")) {
        settings.ws_url = Some(ws_url);
    }
    if let Some(raw) = env("APP__LOBBY_POLL_INTERVAL_MS") {
        match raw.trim().parse::<u64>() {
            Ok(interval) => settings.lobby_poll_interval_ms = interval,
            Err(err) => warn!("config: ignoring APP__LOBBY_POLL_INTERVAL_MS='{raw}': {err}"),
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
