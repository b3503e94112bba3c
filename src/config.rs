//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HTTP_PORT, DEFAULT_SERVER_URL};
use crate::error::{Error, Result};
use crate::protocol::mode::{AgcSpeed, BufferMode, ReceiverMode};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioSettings,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Audio WebSocket endpoint
    pub url: String,
    /// Receiver to select after connecting
    pub receiver_id: Option<String>,
    pub connect_timeout_ms: u64,
    pub user_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            receiver_id: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            user_id: None,
        }
    }
}

/// Initial listening intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// 0..=160, 100 is unity
    pub volume: u32,
    pub mute: bool,
    pub squelch: bool,
    pub nr: bool,
    pub nb: bool,
    pub an: bool,
    pub agc_speed: AgcSpeed,
    pub agc_attack_ms: u32,
    pub agc_release_ms: u32,
    pub buffer_mode: BufferMode,
    /// Mode to use instead of the server default
    pub mode: Option<ReceiverMode>,
    /// Frequency to tune instead of the server default
    pub frequency_hz: Option<f64>,
    /// Output device name; the system default when unset
    pub output_device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 50,
            mute: false,
            squelch: false,
            nr: false,
            nb: false,
            an: false,
            agc_speed: AgcSpeed::Medium,
            agc_attack_ms: 10,
            agc_release_ms: 500,
            buffer_mode: BufferMode::Medium,
            mode: None,
            frequency_hz: None,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "websdr", "websdr-client")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, else the per-user file if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            url = "wss://sdr.example.org/audio"
            receiver_id = "rx1"

            [audio]
            buffer_mode = "high"
            mode = "LSB"
            agc_speed = "custom"
            nb = true

            [ui]
            http_port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url, "wss://sdr.example.org/audio");
        assert_eq!(config.server.receiver_id.as_deref(), Some("rx1"));
        assert_eq!(config.server.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(config.audio.buffer_mode, BufferMode::High);
        assert_eq!(config.audio.mode, Some(ReceiverMode::Lsb));
        assert_eq!(config.audio.agc_speed, AgcSpeed::Custom);
        assert!(config.audio.nb);
        assert_eq!(config.audio.volume, 50);
        assert_eq!(config.ui.http_port, 9000);
        assert!(config.ui.enabled);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            AppConfig::from_toml("[audio]\nvolume = \"loud\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/websdr/config.toml")));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
