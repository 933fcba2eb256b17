//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (first of `herald.toml`, `/etc/herald/herald.toml`,
//!   `~/.config/herald/herald.toml`)
//! - Environment variables (`HERALD__SECTION__KEY`), which win over the file

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use herald_transport::{
    ConnectionConfig, CredentialSource, EnvCredentials, StaticCredentials, WebSocketConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Session identity. Missing values fall back to `HERALD_SUBJECT_ID` and
    /// `HERALD_TOKEN`.
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Realtime link endpoint.
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    /// REST API root.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub subject_id: Option<String>,

    #[serde(default)]
    pub token: Option<String>,
}

/// Reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Fixed delay between automatic reconnects in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Consecutive failed dials before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_websocket_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_delay_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_attempts: default_max_attempts(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl HeraldConfig {
    /// Load configuration from the first config file found, with
    /// `HERALD__*` environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if an override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::find_file() {
            tracing::debug!(path = %path.display(), "Using config file");
            builder = builder.add_source(File::from(path).required(true));
        }

        Self::from_builder(
            builder.add_source(
                Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HeraldConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Credentials from the `identity` section. Values it leaves out are
    /// read from the environment; with an empty section the environment is
    /// re-read on every use.
    #[must_use]
    pub fn credentials(&self) -> Arc<dyn CredentialSource> {
        let IdentityConfig { subject_id, token } = &self.identity;
        if subject_id.is_none() && token.is_none() {
            return Arc::new(EnvCredentials);
        }

        Arc::new(StaticCredentials::new(
            subject_id.clone().or_else(|| EnvCredentials.subject_id()),
            token.clone().or_else(|| EnvCredentials.bearer_token()),
        ))
    }

    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: Duration::from_millis(self.reconnect.delay_ms),
            max_reconnect_attempts: self.reconnect.max_attempts,
        }
    }

    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.server.websocket_url.clone(),
            handshake_timeout: Duration::from_millis(self.reconnect.handshake_timeout_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_config() {
        let config = HeraldConfig::default();
        assert_eq!(config.reconnect.delay_ms, 3_000);
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(!config.metrics.enabled);

        let connection = config.connection_config();
        assert_eq!(connection.reconnect_delay, Duration::from_secs(3));
        assert_eq!(connection.max_reconnect_attempts, 5);
        assert_eq!(
            config.websocket_config().handshake_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [server]
            websocket_url = "wss://push.example.com/ws"

            [identity]
            subject_id = "u42"

            [reconnect]
            max_attempts = 8
        "#;

        let config: HeraldConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.websocket_url, "wss://push.example.com/ws");
        assert_eq!(config.server.api_base_url, default_api_base_url());
        assert_eq!(config.identity.subject_id.as_deref(), Some("u42"));
        assert!(config.identity.token.is_none());
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.delay_ms, 3_000);
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file = r#"
            [reconnect]
            delay_ms = 500

            [metrics]
            enabled = true
        "#;

        let builder = config::Config::builder()
            .add_source(File::from_str(file, FileFormat::Toml))
            .set_override("reconnect.delay_ms", 250)
            .unwrap();

        let config = HeraldConfig::from_builder(builder).unwrap();
        assert_eq!(config.reconnect.delay_ms, 250);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_configured_token_is_used() {
        let config: HeraldConfig = toml::from_str(
            r#"
            [identity]
            subject_id = "u1"
            token = "secret"
        "#,
        )
        .unwrap();

        let credentials = config.credentials();
        assert_eq!(credentials.subject_id().as_deref(), Some("u1"));
        assert_eq!(credentials.bearer_token().as_deref(), Some("secret"));
    }
}
