//! Configuration module for WaaV Converse
//!
//! This module handles engine configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_converse::config::ConverseConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ConverseConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("converse.yaml");
//! let config = ConverseConfig::from_file(&config_path)?;
//!
//! println!("Endpoint: {}", config.endpoint.url);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::{Serialize, Serializer};
use zeroize::Zeroizing;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{
    AudioConstraints, DEFAULT_CHANNELS, DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE,
};
use crate::core::controller::{
    ControllerConfig, DEFAULT_CHUNK_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
};
use crate::core::player::DEFAULT_LEAD_MS;
use crate::core::transport::{DEFAULT_CONNECT_TIMEOUT_MS, ReconnectionConfig, WebSocketConfig};
use crate::core::turn::TurnDetectorConfig;

/// Serialize a secret as a fixed mask so it never reaches logs or output.
fn mask_secret<S: Serializer>(secret: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("***"),
        None => serializer.serialize_none(),
    }
}

/// Remote endpoint settings
#[derive(Debug, Clone, Serialize)]
pub struct EndpointConfig {
    /// Endpoint URL (`ws://` or `wss://`)
    pub url: String,
    /// Bearer token forwarded to the endpoint
    #[serde(serialize_with = "mask_secret")]
    pub auth_token: Option<String>,
    /// Timeout for each connection attempt (milliseconds)
    pub connect_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

/// Capture and chunking settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture frame duration (milliseconds)
    pub frame_ms: u32,
    /// Audio per outbound chunk (milliseconds)
    pub chunk_interval_ms: u32,
    /// Input device name; `None` uses the system default
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_ms: DEFAULT_FRAME_MS,
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            input_device: None,
        }
    }
}

/// Response playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackConfig {
    /// Audio kept buffered ahead of the play head (milliseconds)
    pub lead_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            lead_ms: DEFAULT_LEAD_MS,
        }
    }
}

/// Engine configuration
///
/// Contains everything needed to run a conversation:
/// - Endpoint settings (URL, bearer token, connect timeout)
/// - Audio capture and chunking
/// - Turn detection
/// - Playback
/// - Reconnection policy
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConverseConfig {
    pub endpoint: EndpointConfig,
    pub audio: AudioConfig,
    pub turn_detection: TurnDetectorConfig,
    pub playback: PlaybackConfig,
    pub reconnection: ReconnectionConfig,
}

/// Zeroize the auth token when the configuration is dropped.
impl Drop for ConverseConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut token) = self.endpoint.auth_token {
            token.zeroize();
        }
    }
}

impl ConverseConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in main.rs at application startup, so its values
    /// are visible here as ordinary environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise from the environment.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_endpoint(&self.endpoint)?;
        validation::validate_audio(&self.audio)?;
        self.turn_detection.validate()?;
        validation::validate_playback(&self.playback)?;
        validation::validate_reconnection(&self.reconnection)?;
        Ok(())
    }

    /// Check whether an endpoint URL is configured
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint.url.trim().is_empty()
    }

    /// Capture constraints for the audio source
    pub fn audio_constraints(&self) -> AudioConstraints {
        AudioConstraints {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            frame_ms: self.audio.frame_ms,
            device: self.audio.input_device.clone(),
        }
    }

    /// Settings for the conversation controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            audio: self.audio_constraints(),
            chunk_interval_ms: self.audio.chunk_interval_ms,
            turn_detection: self.turn_detection.clone(),
            playback_lead_ms: self.playback.lead_ms,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Settings for the WebSocket transport
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.endpoint.url.clone(),
            auth_token: self.endpoint.auth_token.clone().map(Zeroizing::new),
            connect_timeout_ms: self.endpoint.connect_timeout_ms,
            reconnection: self.reconnection.clone(),
        }
    }

    /// Effective configuration as YAML, with secrets masked
    pub fn to_masked_yaml(&self) -> Result<String, Box<dyn std::error::Error>> {
        Ok(serde_yaml::to_string(self)?)
    }
}
