use url::Url;

use super::{AudioConfig, EndpointConfig, PlaybackConfig};
use crate::core::transport::ReconnectionConfig;
use crate::errors::ConverseError;

fn invalid(message: impl Into<String>) -> Box<dyn std::error::Error> {
    Box::new(ConverseError::InvalidConfiguration(message.into()))
}

/// Validate endpoint settings
///
/// An empty URL is accepted here so configuration can be inspected without an
/// endpoint; a set URL must be a `ws://` or `wss://` URL with a host.
pub fn validate_endpoint(endpoint: &EndpointConfig) -> Result<(), Box<dyn std::error::Error>> {
    let url = endpoint.url.trim();
    if !url.is_empty() {
        let parsed = Url::parse(url).map_err(|e| invalid(format!("endpoint.url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(invalid(format!(
                "endpoint.url must use ws:// or wss://, got '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(invalid("endpoint.url has no host"));
        }
    }

    if endpoint.connect_timeout_ms == 0 {
        return Err(invalid("endpoint.connect_timeout_ms must be greater than 0"));
    }
    if let Some(token) = &endpoint.auth_token
        && token.trim().is_empty()
    {
        return Err(invalid("endpoint.auth_token must not be blank"));
    }

    Ok(())
}

/// Validate capture and chunking settings
pub fn validate_audio(audio: &AudioConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !(8000..=48000).contains(&audio.sample_rate) {
        return Err(invalid(format!(
            "audio.sample_rate must be between 8000 and 48000, got {}",
            audio.sample_rate
        )));
    }
    if !(1..=2).contains(&audio.channels) {
        return Err(invalid(format!(
            "audio.channels must be 1 or 2, got {}",
            audio.channels
        )));
    }
    if audio.frame_ms == 0 {
        return Err(invalid("audio.frame_ms must be greater than 0"));
    }
    if audio.chunk_interval_ms < audio.frame_ms {
        return Err(invalid(format!(
            "audio.chunk_interval_ms ({}) must be at least audio.frame_ms ({})",
            audio.chunk_interval_ms, audio.frame_ms
        )));
    }
    Ok(())
}

/// Validate playback settings
pub fn validate_playback(playback: &PlaybackConfig) -> Result<(), Box<dyn std::error::Error>> {
    if playback.lead_ms == 0 {
        return Err(invalid("playback.lead_ms must be greater than 0"));
    }
    Ok(())
}

/// Validate the reconnection policy
pub fn validate_reconnection(
    reconnection: &ReconnectionConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if reconnection.backoff_multiplier < 1.0 {
        return Err(invalid("reconnection.backoff_multiplier must be at least 1.0"));
    }
    if reconnection.initial_delay_ms > reconnection.max_delay_ms {
        return Err(invalid(
            "reconnection.initial_delay_ms must not exceed reconnection.max_delay_ms",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint() {
        let mut endpoint = EndpointConfig::default();
        assert!(validate_endpoint(&endpoint).is_ok());

        endpoint.url = "wss://voice.example.com/v1".to_string();
        assert!(validate_endpoint(&endpoint).is_ok());

        endpoint.url = "https://voice.example.com".to_string();
        let err = validate_endpoint(&endpoint).unwrap_err();
        assert!(err.to_string().contains("ws:// or wss://"));

        endpoint.url = "not a url".to_string();
        assert!(validate_endpoint(&endpoint).is_err());
    }

    #[test]
    fn test_validate_endpoint_blank_token() {
        let endpoint = EndpointConfig {
            auth_token: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(validate_endpoint(&endpoint).is_err());
    }

    #[test]
    fn test_validate_audio() {
        assert!(validate_audio(&AudioConfig::default()).is_ok());

        let audio = AudioConfig {
            sample_rate: 4000,
            ..Default::default()
        };
        assert!(validate_audio(&audio).is_err());

        let audio = AudioConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(validate_audio(&audio).is_err());

        let audio = AudioConfig {
            frame_ms: 40,
            chunk_interval_ms: 20,
            ..Default::default()
        };
        let err = validate_audio(&audio).unwrap_err();
        assert!(err.to_string().contains("chunk_interval_ms"));
    }

    #[test]
    fn test_validate_playback() {
        assert!(validate_playback(&PlaybackConfig::default()).is_ok());
        assert!(validate_playback(&PlaybackConfig { lead_ms: 0 }).is_err());
    }

    #[test]
    fn test_validate_reconnection() {
        assert!(validate_reconnection(&ReconnectionConfig::default()).is_ok());

        let config = ReconnectionConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(validate_reconnection(&config).is_err());

        let config = ReconnectionConfig {
            initial_delay_ms: 10_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(validate_reconnection(&config).is_err());
    }
}
