#![deny(unsafe_code)]

//! Configuration loading and validation for the ktrl IPC clients.
//!
//! Loads TOML files into [`AppConfig`]. Every section and field has a
//! default, so an empty file (or no file at all) yields a client pointed at
//! the daemon's well-known localhost ports.
//!
//! ```toml
//! [client]
//! host = "127.0.0.1"
//! command_port = 7331
//! notify_port = 7333
//! command_timeout_ms = 5000
//!
//! [notify]
//! topic = "layer"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use ktrl_ipc::endpoint::{DEFAULT_COMMAND_PORT, DEFAULT_HOST, DEFAULT_NOTIFY_PORT};
use ktrl_ipc::{CommandOptions, Endpoint, LAYER_TOPIC};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the daemon's sockets are and how long to wait on them.
    #[serde(default)]
    pub client: ClientConfig,

    /// Notification subscription settings.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings shared by both channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host both daemon sockets are bound on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the command (request/reply) socket.
    #[serde(default = "default_command_port")]
    pub command_port: u16,

    /// Port of the notification (publish/subscribe) socket.
    #[serde(default = "default_notify_port")]
    pub notify_port: u16,

    /// Reply window for a command in milliseconds (0 = wait forever).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Bound on establishing a connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            command_port: default_command_port(),
            notify_port: default_notify_port(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}

fn default_notify_port() -> u16 {
    DEFAULT_NOTIFY_PORT
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

/// Notification subscription settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Topic prefix to subscribe to. Empty subscribes to everything.
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
        }
    }
}

fn default_topic() -> String {
    LAYER_TOPIC.to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.command_endpoint()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("client.host: {e}")))?;
        if self.client.command_port == 0 {
            return Err(ConfigError::Validation(
                "client.command_port must be non-zero".to_string(),
            ));
        }
        if self.client.notify_port == 0 {
            return Err(ConfigError::Validation(
                "client.notify_port must be non-zero".to_string(),
            ));
        }
        if self.client.command_port == self.client.notify_port {
            return Err(ConfigError::Validation(format!(
                "client.command_port and client.notify_port must differ, both are {}",
                self.client.command_port
            )));
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.connect_timeout_ms must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    pub fn command_endpoint(&self) -> Endpoint {
        Endpoint::new(self.client.host.clone(), self.client.command_port)
    }

    pub fn notify_endpoint(&self) -> Endpoint {
        Endpoint::new(self.client.host.clone(), self.client.notify_port)
    }

    /// The reply window, or `None` when disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.client.command_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.client.connect_timeout_ms)
    }

    /// Options for a [`ktrl_ipc::CommandClient`] built from this config.
    pub fn command_options(&self) -> CommandOptions {
        CommandOptions {
            reply_timeout: self.command_timeout(),
            connect_timeout: self.connect_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.client.host, "127.0.0.1");
        assert_eq!(config.client.command_port, 7331);
        assert_eq!(config.client.notify_port, 7333);
        assert_eq!(config.notify.topic, "layer");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.command_endpoint().to_string(), "tcp://127.0.0.1:7331");
        assert_eq!(config.notify_endpoint().to_string(), "tcp://127.0.0.1:7333");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [client]
            host = "10.0.0.5"
            command_port = 8331
            notify_port = 8333
            command_timeout_ms = 1500
            connect_timeout_ms = 250

            [notify]
            topic = ""

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.command_endpoint(), Endpoint::new("10.0.0.5", 8331));
        assert_eq!(config.notify_endpoint(), Endpoint::new("10.0.0.5", 8333));
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.notify.topic, "");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_timeout_disables_reply_window() {
        let config = AppConfig::parse("[client]\ncommand_timeout_ms = 0\n").unwrap();
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.command_options().reply_timeout, None);
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        assert!(AppConfig::parse("[client]\ncommand_port = 0\n").is_err());
        assert!(AppConfig::parse("[client]\nnotify_port = 0\n").is_err());
    }

    #[test]
    fn test_validation_rejects_port_out_of_range() {
        let result = AppConfig::parse("[client]\ncommand_port = 70000\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_rejects_shared_port() {
        let toml = r#"
            [client]
            command_port = 9000
            notify_port = 9000
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_host() {
        let result = AppConfig::parse("[client]\nhost = \"\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let result = AppConfig::parse("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_zero_connect_timeout() {
        assert!(AppConfig::parse("[client]\nconnect_timeout_ms = 0\n").is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ktrl.toml");
        tokio::fs::write(&path, b"[client]\ncommand_port = 4242\nhost = \"0.0.0.0\"\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.client.command_port, 4242);
        assert_eq!(config.client.host, "0.0.0.0");
    }

    #[test_log::test(tokio::test)]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/ktrl.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = AppConfig::parse("[notify]\ntopic = \"keymap\"\n").unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert_eq!(AppConfig::parse(&rendered).unwrap(), config);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}
