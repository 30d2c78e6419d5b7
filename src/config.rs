//! Configuration for the RiceBot MQTT link
//!
//! A configuration file carries two sections: `[mqtt]` describes how to reach
//! the broker, `[reconnect]` describes the backoff policy. Both sections are
//! optional and fall back to the defaults the mobile app ships with.

use crate::service::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Top-level configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub mqtt: ConnectionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Wire transport used to reach the broker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Plain MQTT over TCP
    #[serde(alias = "mqtt")]
    Tcp,
    /// MQTT over WebSocket
    #[serde(alias = "websocket")]
    Ws,
}

impl TransportProtocol {
    fn scheme(self, tls: bool) -> &'static str {
        match (self, tls) {
            (TransportProtocol::Tcp, false) => "mqtt",
            (TransportProtocol::Tcp, true) => "mqtts",
            (TransportProtocol::Ws, false) => "ws",
            (TransportProtocol::Ws, true) => "wss",
        }
    }
}

/// Broker connection parameters, fixed for the duration of one attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Broker hostname (no scheme, no path)
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path; ignored for TCP
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_protocol")]
    pub protocol: TransportProtocol,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    #[serde(default)]
    pub use_tls: bool,
    /// Largest MQTT packet accepted or sent, in bytes
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

fn default_host() -> String {
    "broker.hivemq.com".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_path() -> String {
    "/mqtt".to_string()
}

fn default_protocol() -> TransportProtocol {
    TransportProtocol::Ws
}

fn default_keep_alive() -> u16 {
    60
}

/// rumqttc's own default of 10 KiB is smaller than a full device status burst
pub const DEFAULT_MAX_PACKET_BYTES: usize = 256 * 1024;

fn default_max_packet_bytes() -> usize {
    DEFAULT_MAX_PACKET_BYTES
}

/// Random client id in the same shape the app generates: `ricebot-app-xxxxxxxxx`
pub fn default_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("ricebot-app-{}", &id[..9])
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            protocol: default_protocol(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            use_tls: false,
            max_packet_bytes: default_max_packet_bytes(),
            username_env: None,
            password_env: None,
        }
    }
}

impl ConnectionConfig {
    /// Build a connection config from a broker URL such as `wss://host:8884/mqtt`
    pub fn from_url(broker_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{broker_url}: {e}")))?;

        let (protocol, use_tls, default_port) = match url.scheme() {
            "mqtt" | "tcp" => (TransportProtocol::Tcp, false, 1883),
            "mqtts" | "ssl" => (TransportProtocol::Tcp, true, 8883),
            "ws" => (TransportProtocol::Ws, false, 80),
            "wss" => (TransportProtocol::Ws, true, 443),
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {broker_url}"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidUrl(format!("missing host in {broker_url}")))?;

        let path = match url.path() {
            "" | "/" => default_path(),
            p => p.to_string(),
        };

        let config = Self {
            host: host.to_string(),
            port: url.port().unwrap_or(default_port),
            path,
            protocol,
            use_tls,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Render the broker address as a URL, for logs and display
    pub fn broker_url(&self) -> String {
        let scheme = self.protocol.scheme(self.use_tls);
        match self.protocol {
            TransportProtocol::Tcp => format!("{scheme}://{}:{}", self.host, self.port),
            TransportProtocol::Ws => {
                format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.host.contains("://") || self.host.contains('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.host '{}' must be a bare hostname; use protocol/port/path for the rest",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.port must be non-zero".to_string(),
            ));
        }
        if self.protocol == TransportProtocol::Ws && !self.path.starts_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.path '{}' must start with '/'",
                self.path
            )));
        }
        if self.max_packet_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_packet_bytes must be greater than 0".to_string(),
            ));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(char::is_whitespace) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must be non-empty and not start with whitespace".to_string(),
            ));
        }
        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.password_env.as_ref())
    }
}

/// Reconnection backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    3000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }

    /// Fresh retry policy with `attempt = 0`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate both sections
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mqtt.validate()?;
        self.reconnect.validate()
    }

    /// Serialize back to TOML, as shown by `ricebot config --show`
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_public_websocket_broker() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "broker.hivemq.com");
        assert_eq!(config.port, 8000);
        assert_eq!(config.path, "/mqtt");
        assert_eq!(config.protocol, TransportProtocol::Ws);
        assert!(!config.use_tls);
        assert_eq!(config.broker_url(), "ws://broker.hivemq.com:8000/mqtt");
    }

    #[test]
    fn test_default_client_id_shape() {
        let id = default_client_id();
        assert!(id.starts_with("ricebot-app-"));
        assert_eq!(id.len(), "ricebot-app-".len() + 9);
        assert_ne!(default_client_id(), default_client_id());
    }

    #[test]
    fn test_from_url_schemes() {
        let tcp = ConnectionConfig::from_url("mqtt://broker.hivemq.com:1883").unwrap();
        assert_eq!(tcp.protocol, TransportProtocol::Tcp);
        assert_eq!(tcp.port, 1883);
        assert!(!tcp.use_tls);

        let tls = ConnectionConfig::from_url("mqtts://broker.example.com").unwrap();
        assert_eq!(tls.protocol, TransportProtocol::Tcp);
        assert_eq!(tls.port, 8883);
        assert!(tls.use_tls);

        let ws = ConnectionConfig::from_url("ws://broker.hivemq.com:8000/mqtt").unwrap();
        assert_eq!(ws.protocol, TransportProtocol::Ws);
        assert_eq!(ws.path, "/mqtt");

        let wss = ConnectionConfig::from_url("wss://broker.example.com").unwrap();
        assert_eq!(wss.port, 443);
        assert!(wss.use_tls);
        assert_eq!(wss.path, "/mqtt");
    }

    #[test]
    fn test_from_url_rejects_unknown_scheme() {
        let result = ConnectionConfig::from_url("http://broker.example.com");
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        let result = ConnectionConfig::from_url("not a url");
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let config = ConnectionConfig {
            host: "ws://broker".to_string(),
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ConnectionConfig {
            host: "  ".to_string(),
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ws_path() {
        let config = ConnectionConfig {
            path: "mqtt".to_string(),
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());

        // TCP ignores the path entirely
        let config = ConnectionConfig {
            path: "mqtt".to_string(),
            protocol: TransportProtocol::Tcp,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_packet_bytes_default_and_validation() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_packet_bytes, DEFAULT_MAX_PACKET_BYTES);

        let parsed: ClientConfig = toml::from_str("[mqtt]\nmax_packet_bytes = 65536").unwrap();
        assert_eq!(parsed.mqtt.max_packet_bytes, 65536);

        let config = ConnectionConfig {
            max_packet_bytes: 0,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 3000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconnect_validation() {
        let zero_attempts = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        assert!(zero_attempts.validate().is_err());

        let inverted = ReconnectConfig {
            base_delay_ms: 5000,
            max_delay_ms: 1000,
            ..ReconnectConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.mqtt.host, "broker.hivemq.com");
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_protocol_aliases() {
        let config: ClientConfig = toml::from_str(
            r#"
[mqtt]
protocol = "mqtt"
port = 1883
"#,
        )
        .unwrap();
        assert_eq!(config.mqtt.protocol, TransportProtocol::Tcp);

        let config: ClientConfig = toml::from_str(
            r#"
[mqtt]
protocol = "websocket"
"#,
        )
        .unwrap();
        assert_eq!(config.mqtt.protocol, TransportProtocol::Ws);
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        std::env::set_var("RICEBOT_TEST_USER_CFG", "cooker");
        let config = ConnectionConfig {
            username_env: Some("RICEBOT_TEST_USER_CFG".to_string()),
            password_env: Some("RICEBOT_TEST_PASS_MISSING".to_string()),
            ..ConnectionConfig::default()
        };
        assert_eq!(config.get_mqtt_username(), Some("cooker".to_string()));
        assert_eq!(config.get_mqtt_password(), None);
        std::env::remove_var("RICEBOT_TEST_USER_CFG");
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let config = ClientConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: ClientConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
