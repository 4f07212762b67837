//! Client configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed delay between a lost connection and the next attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Inactivity after the last keystroke before `typing_indicator{false}` is sent
pub const DEFAULT_TYPING_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Presence heartbeat period (3 minutes)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(180);

/// Upper bound on the cold-start connection status fetch
pub const DEFAULT_STATUS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for ordinary REST calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Session client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://localhost:3000`
    pub api_url: String,
    /// Base URL for session sockets, e.g. `ws://localhost:3000`
    pub ws_url: String,

    pub reconnect_delay: Duration,
    pub typing_idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub status_fetch_timeout: Duration,
    pub request_timeout: Duration,

    /// File holding the agent's last chosen presence status
    pub presence_file: PathBuf,
}

impl ClientConfig {
    /// Build a configuration with default timings for the given API base URL
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            typing_idle_timeout: DEFAULT_TYPING_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            status_fetch_timeout: DEFAULT_STATUS_FETCH_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            presence_file: default_presence_file(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            env::var("SUPPORTDESK_API_URL").map_err(|_| ConfigError::Missing("SUPPORTDESK_API_URL"))?;
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                "SUPPORTDESK_API_URL",
                "must start with http:// or https://".to_string(),
            ));
        }

        let mut config = Self::new(api_url);

        if let Ok(ws_url) = env::var("SUPPORTDESK_WS_URL") {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                return Err(ConfigError::Invalid(
                    "SUPPORTDESK_WS_URL",
                    "must start with ws:// or wss://".to_string(),
                ));
            }
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }

        config.reconnect_delay = env_millis("RECONNECT_DELAY_MS", config.reconnect_delay);
        config.typing_idle_timeout = env_millis("TYPING_IDLE_MS", config.typing_idle_timeout);
        config.heartbeat_interval = env::var("HEARTBEAT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.heartbeat_interval);
        config.status_fetch_timeout =
            env_millis("STATUS_FETCH_TIMEOUT_MS", config.status_fetch_timeout);

        if let Ok(path) = env::var("PRESENCE_FILE") {
            config.presence_file = PathBuf::from(path);
        }

        Ok(config)
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// `http://host` -> `ws://host`, `https://host` -> `wss://host`
fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    }
}

fn default_presence_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("supportdesk")
        .join("presence.json")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup() {
        for key in [
            "SUPPORTDESK_API_URL",
            "SUPPORTDESK_WS_URL",
            "RECONNECT_DELAY_MS",
            "TYPING_IDLE_MS",
            "HEARTBEAT_INTERVAL_SECS",
            "STATUS_FETCH_TIMEOUT_MS",
            "PRESENCE_FILE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_ws_url_derived_from_api_url() {
        assert_eq!(derive_ws_url("http://localhost:3000"), "ws://localhost:3000");
        assert_eq!(derive_ws_url("https://desk.example.com"), "wss://desk.example.com");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://localhost:3000/");
        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.typing_idle_timeout, Duration::from_millis(1000));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(180));
        assert_eq!(config.status_fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_api_url() {
        cleanup();
        assert!(matches!(
            ClientConfig::from_env(),
            Err(ConfigError::Missing("SUPPORTDESK_API_URL"))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup();
        env::set_var("SUPPORTDESK_API_URL", "https://desk.example.com");
        env::set_var("RECONNECT_DELAY_MS", "500");
        env::set_var("PRESENCE_FILE", "/tmp/presence.json");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.ws_url, "wss://desk.example.com");
        assert_eq!(config.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.presence_file, PathBuf::from("/tmp/presence.json"));

        cleanup();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_ws_url() {
        cleanup();
        env::set_var("SUPPORTDESK_API_URL", "http://localhost:3000");
        env::set_var("SUPPORTDESK_WS_URL", "http://localhost:3000");

        assert!(matches!(
            ClientConfig::from_env(),
            Err(ConfigError::Invalid("SUPPORTDESK_WS_URL", _))
        ));

        cleanup();
    }
}
