//! Configuration management for Roomdrop.
//!
//! This module handles loading, saving, and managing Roomdrop configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/roomdrop/config.toml` |
//! | macOS | `~/Library/Application Support/com.roomdrop.Roomdrop/config.toml` |
//! | Windows | `%APPDATA%\roomdrop\Roomdrop\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use roomdrop_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Backend: {}", config.server.base_url);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ApiConfig;
use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::transfer::SenderConfig;

/// Main configuration struct for Roomdrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Backend and hub endpoints
    pub server: ServerConfig,
    /// Message channel settings
    pub channel: ChannelSettings,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output directory for received files
    pub default_output: Option<PathBuf>,
}

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root of the room-lifecycle HTTP API
    pub base_url: String,
    /// Message hub endpoint
    pub ws_url: String,
    /// Public origin used when building shareable links
    pub origin: String,
    /// Timeout for a single HTTP request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            ws_url: "ws://localhost:8080/ws/p2p".to_string(),
            origin: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Message channel configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Delay before the single reconnect attempt after an abnormal close
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Timeout for opening the connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Frames that may wait in the outbound queue
    pub outbound_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(crate::DEFAULT_RECONNECT_DELAY_SECS),
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 256,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size for transfers
    pub chunk_size: usize,
    /// Pause between chunks in milliseconds (0 disables pacing)
    pub chunk_delay_ms: u64,
    /// Chunks read ahead of the channel
    pub read_ahead: usize,
    /// How long completed entries stay in the progress list
    #[serde(with = "humantime_serde")]
    pub progress_linger: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: crate::DEFAULT_CHUNK_DELAY_MS,
            read_ahead: 4,
            progress_linger: Duration::from_millis(crate::PROGRESS_LINGER_MS),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first bad key.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.transfer.read_ahead == 0 {
            return Err(Error::InvalidConfig {
                key: "transfer.read_ahead".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.channel.outbound_capacity == 0 {
            return Err(Error::InvalidConfig {
                key: "channel.outbound_capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        for (key, value) in [
            ("server.base_url", &self.server.base_url),
            ("server.ws_url", &self.server.ws_url),
            ("server.origin", &self.server.origin),
        ] {
            url::Url::parse(value).map_err(|e| Error::InvalidConfig {
                key: key.into(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Settings for the message channel.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            ws_url: self.server.ws_url.clone(),
            reconnect_delay: self.channel.reconnect_delay,
            connect_timeout: self.channel.connect_timeout,
            outbound_capacity: self.channel.outbound_capacity,
        }
    }

    /// Settings for the chunked sender.
    #[must_use]
    pub const fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            chunk_size: self.transfer.chunk_size,
            chunk_delay: Duration::from_millis(self.transfer.chunk_delay_ms),
            read_ahead: self.transfer.read_ahead,
        }
    }

    /// Settings for the backend client.
    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.server.base_url.clone(),
            origin: self.server.origin.clone(),
            request_timeout: self.server.request_timeout,
        }
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "roomdrop", "Roomdrop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<Duration, String> {
        let number = |digits: &str| digits.parse::<u64>().map_err(|e| e.to_string());

        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {s}"))
        } else {
            Err(format!("invalid duration format: {s}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.base_url, "http://localhost:8080/api");
        assert_eq!(config.channel.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.transfer.chunk_size, 65_536);
        assert_eq!(config.transfer.progress_linger, Duration::from_millis(2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.server.base_url = "https://drop.example/api".to_string();
        original.channel.reconnect_delay = Duration::from_millis(250);
        original.transfer.chunk_size = 16 * 1024;

        let content = toml::to_string_pretty(&original).expect("serialize");
        std::fs::write(&config_path, &content).expect("write");

        let loaded_content = std::fs::read_to_string(&config_path).expect("read");
        let loaded: Config = toml::from_str(&loaded_content).expect("parse");

        assert_eq!(loaded.server.base_url, "https://drop.example/api");
        assert_eq!(loaded.channel.reconnect_delay, Duration::from_millis(250));
        assert_eq!(loaded.transfer.chunk_size, 16 * 1024);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();

        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[channel]"));
        assert!(toml_str.contains("[transfer]"));
        assert!(toml_str.contains("reconnect_delay = \"3s\""));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[server]
origin = "https://drop.example"

[channel]
reconnect_delay = "500ms"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.server.origin, "https://drop.example");
        assert_eq!(config.channel.reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.server.ws_url, "ws://localhost:8080/ws/p2p");
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_duration_formats() {
        assert_eq!(humantime_serde::parse("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(humantime_serde::parse("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(humantime_serde::parse("15ms"), Ok(Duration::from_millis(15)));
        assert!(humantime_serde::parse("soon").is_err());
        assert!(humantime_serde::parse("307445734561825861m").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "transfer.chunk_size"
        ));

        let mut config = Config::default();
        config.server.ws_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_configs() {
        let config = Config::default();
        let channel = config.channel_config();
        assert_eq!(channel.ws_url, config.server.ws_url);
        assert_eq!(channel.outbound_capacity, 256);

        let sender = config.sender_config();
        assert_eq!(sender.chunk_delay, Duration::from_millis(10));
        assert_eq!(sender.read_ahead, 4);

        let api = config.api_config();
        assert_eq!(api.origin, "http://localhost:8080");
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.ends_with("config.toml"));
    }
}
