//! Application configuration.

use crate::error::{AppError, AppResult};
use feedmux::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One channel to subscribe to at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel key (e.g., "trades", "bbo", "trades:BTC").
    pub channel: String,
    /// Extra subscription fields sent to the endpoint (e.g., the coin).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// At most one live subscription for this channel key.
    #[serde(default)]
    pub single: bool,
}

/// Socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSettings {
    /// Connect as soon as the application starts.
    #[serde(default = "default_connect_on_start")]
    pub connect_on_start: bool,
    /// Quiet-link interval before an application-level ping (ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Pong deadline after a ping (ms).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// Outbound control-message queue capacity.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_connect_on_start() -> bool {
    true
}

fn default_heartbeat_interval_ms() -> u64 {
    45_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_outbound_capacity() -> usize {
    100
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            connect_on_start: default_connect_on_start(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Feed endpoint URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Channels to subscribe to at startup.
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    /// Socket settings.
    #[serde(default)]
    pub websocket: SocketSettings,
}

fn default_ws_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            channels: Vec::new(),
            websocket: SocketSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default locations.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("FEEDMUX_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Build the multiplexer connection configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            connect_on_start: self.websocket.connect_on_start,
            heartbeat_interval_ms: self.websocket.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.websocket.heartbeat_timeout_ms,
            outbound_capacity: self.websocket.outbound_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.ws_url.starts_with("wss://"));
        assert!(config.channels.is_empty());
        assert_eq!(config.websocket.heartbeat_interval_ms, 45_000);
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            ws_url = "ws://127.0.0.1:9000"

            [websocket]
            connect_on_start = false
            heartbeat_interval_ms = 30000

            [[channels]]
            channel = "trades"
            payload = { coin = "BTC" }

            [[channels]]
            channel = "candle"
            payload = { coin = "ETH", interval = "1m" }
            single = true
        "#;

        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.ws_url, "ws://127.0.0.1:9000");
        assert!(!config.websocket.connect_on_start);
        assert_eq!(config.websocket.heartbeat_interval_ms, 30_000);
        // Unset fields keep their defaults
        assert_eq!(config.websocket.heartbeat_timeout_ms, 10_000);

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].channel, "trades");
        assert_eq!(config.channels[0].payload, json!({"coin": "BTC"}));
        assert!(!config.channels[0].single);
        assert!(config.channels[1].single);
    }

    #[test]
    fn test_channel_without_payload() {
        let raw = r#"
            [[channels]]
            channel = "allMids"
        "#;

        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.channels[0].payload, serde_json::Value::Null);
    }

    #[test]
    fn test_connection_config_mapping() {
        let mut config = AppConfig::default();
        config.ws_url = "ws://localhost:1".to_string();
        config.websocket.connect_on_start = false;

        let conn = config.connection_config();
        assert_eq!(conn.url, "ws://localhost:1");
        assert!(!conn.connect_on_start);
    }
}
