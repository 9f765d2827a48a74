use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// endpoint:
///   url: "wss://voice.example.com/v1/converse"
///   auth_token: "your-token"
///   connect_timeout_ms: 10000
///
/// audio:
///   sample_rate: 24000
///   channels: 1
///   frame_ms: 20
///   chunk_interval_ms: 100
///   input_device: "MacBook Pro Microphone"
///
/// turn_detection:
///   strategy: "local"
///   positive_threshold: 0.5
///   negative_threshold: 0.35
///   min_confirm_ms: 100
///   silence_threshold_ms: 1000
///   min_speech_ms: 300
///   noise_floor_db: -50.0
///   speech_level_db: -20.0
///
/// playback:
///   lead_ms: 300
///
/// reconnection:
///   enabled: true
///   max_attempts: 5
///   initial_delay_ms: 500
///   max_delay_ms: 8000
///   backoff_multiplier: 2.0
///   jitter: true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoint: Option<EndpointYaml>,
    pub audio: Option<AudioYaml>,
    pub turn_detection: Option<TurnDetectionYaml>,
    pub playback: Option<PlaybackYaml>,
    pub reconnection: Option<ReconnectionYaml>,
}

/// Endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointYaml {
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

/// Audio configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub frame_ms: Option<u32>,
    pub chunk_interval_ms: Option<u32>,
    pub input_device: Option<String>,
}

/// Turn detection configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnDetectionYaml {
    /// `local` or `server`
    pub strategy: Option<String>,
    pub positive_threshold: Option<f32>,
    pub negative_threshold: Option<f32>,
    pub min_confirm_ms: Option<u32>,
    pub silence_threshold_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub noise_floor_db: Option<f32>,
    pub speech_level_db: Option<f32>,
}

/// Playback configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub lead_ms: Option<u64>,
}

/// Reconnection configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectionYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
    pub jitter: Option<bool>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
endpoint:
  url: "wss://voice.example.com"
  auth_token: "token"
  connect_timeout_ms: 5000

audio:
  sample_rate: 16000
  channels: 1
  frame_ms: 10
  chunk_interval_ms: 60
  input_device: "USB Mic"

turn_detection:
  strategy: "server"
  positive_threshold: 0.6
  negative_threshold: 0.4
  min_confirm_ms: 80
  silence_threshold_ms: 900
  min_speech_ms: 250
  noise_floor_db: -55.0
  speech_level_db: -25.0

playback:
  lead_ms: 250

reconnection:
  enabled: false
  max_attempts: 2
  initial_delay_ms: 100
  max_delay_ms: 1000
  backoff_multiplier: 1.5
  jitter: false
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let endpoint = config.endpoint.unwrap();
        assert_eq!(endpoint.url, Some("wss://voice.example.com".to_string()));
        assert_eq!(endpoint.auth_token, Some("token".to_string()));
        assert_eq!(endpoint.connect_timeout_ms, Some(5000));

        let audio = config.audio.unwrap();
        assert_eq!(audio.sample_rate, Some(16000));
        assert_eq!(audio.frame_ms, Some(10));
        assert_eq!(audio.chunk_interval_ms, Some(60));
        assert_eq!(audio.input_device, Some("USB Mic".to_string()));

        let turn = config.turn_detection.unwrap();
        assert_eq!(turn.strategy, Some("server".to_string()));
        assert_eq!(turn.positive_threshold, Some(0.6));
        assert_eq!(turn.min_speech_ms, Some(250));
        assert_eq!(turn.noise_floor_db, Some(-55.0));

        assert_eq!(config.playback.unwrap().lead_ms, Some(250));

        let reconnection = config.reconnection.unwrap();
        assert_eq!(reconnection.enabled, Some(false));
        assert_eq!(reconnection.backoff_multiplier, Some(1.5));
        assert_eq!(reconnection.jitter, Some(false));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
turn_detection:
  silence_threshold_ms: 2500
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.endpoint.is_none());
        assert!(config.audio.is_none());
        let turn = config.turn_detection.unwrap();
        assert_eq!(turn.silence_threshold_ms, Some(2500));
        assert!(turn.strategy.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();

        assert!(config.endpoint.is_none());
        assert!(config.audio.is_none());
        assert!(config.turn_detection.is_none());
        assert!(config.playback.is_none());
        assert!(config.reconnection.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("converse.yaml");

        fs::write(&config_path, "playback:\n  lead_ms: 420\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.playback.unwrap().lead_ms, Some(420));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = YamlConfig::from_file(&PathBuf::from("/nonexistent/converse.yaml"));

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "audio: [not, a, map").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML config")
        );
    }
}
