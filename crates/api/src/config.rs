//! Server configuration

use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Presence
    /// Heartbeats older than this no longer count as present
    pub presence_ttl: Duration,

    // Messages
    pub max_message_length: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let presence_ttl_secs: u64 = match env::var("PRESENCE_TTL_SECS") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid("PRESENCE_TTL_SECS", value))?,
            Err(_) => 360,
        };
        if presence_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "PRESENCE_TTL_SECS",
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            presence_ttl: Duration::from_secs(presence_ttl_secs),
            max_message_length: env::var("MAX_MESSAGE_LENGTH")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            // Two missed 3-minute heartbeats
            presence_ttl: Duration::from_secs(360),
            max_message_length: 4000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_config() {
        env::remove_var("BIND_ADDRESS");
        env::remove_var("PRESENCE_TTL_SECS");
        env::remove_var("MAX_MESSAGE_LENGTH");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.presence_ttl, Duration::from_secs(360));
        assert_eq!(config.max_message_length, 4000);
    }

    #[test]
    #[serial]
    fn test_presence_ttl_validation() {
        cleanup_config();

        env::set_var("PRESENCE_TTL_SECS", "abc");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("PRESENCE_TTL_SECS", _))
        ));

        env::set_var("PRESENCE_TTL_SECS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("PRESENCE_TTL_SECS", _))
        ));

        env::set_var("PRESENCE_TTL_SECS", "90");
        let config = Config::from_env().unwrap();
        assert_eq!(config.presence_ttl, Duration::from_secs(90));

        cleanup_config();
    }
}
