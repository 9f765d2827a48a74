use std::env;
use std::str::FromStr;

use super::ConverseConfig;
use crate::core::turn::TurnStrategyKind;

/// Read a variable, treating empty values as unset.
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable.
fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: '{raw}' ({e})")),
        None => Ok(None),
    }
}

/// Build a configuration from defaults and environment variables.
///
/// Recognized variables:
/// - `CONVERSE_ENDPOINT_URL`
/// - `CONVERSE_AUTH_TOKEN`
/// - `CONVERSE_SAMPLE_RATE`
/// - `CONVERSE_CHUNK_INTERVAL_MS`
/// - `CONVERSE_TURN_STRATEGY` (`local` or `server`)
/// - `CONVERSE_SILENCE_THRESHOLD_MS`
/// - `CONVERSE_MIN_SPEECH_MS`
/// - `CONVERSE_INPUT_DEVICE`
pub fn load_from_env() -> Result<ConverseConfig, Box<dyn std::error::Error>> {
    let mut config = ConverseConfig::default();

    if let Some(url) = env_string("CONVERSE_ENDPOINT_URL") {
        config.endpoint.url = url;
    }
    if let Some(token) = env_string("CONVERSE_AUTH_TOKEN") {
        config.endpoint.auth_token = Some(token);
    }
    if let Some(rate) = env_parse::<u32>("CONVERSE_SAMPLE_RATE")? {
        config.audio.sample_rate = rate;
    }
    if let Some(interval) = env_parse::<u32>("CONVERSE_CHUNK_INTERVAL_MS")? {
        config.audio.chunk_interval_ms = interval;
    }
    if let Some(strategy) = env_string("CONVERSE_TURN_STRATEGY") {
        config.turn_detection.strategy = TurnStrategyKind::parse(&strategy).ok_or_else(|| {
            format!("Invalid value for CONVERSE_TURN_STRATEGY: '{strategy}' (expected local or server)")
        })?;
    }
    if let Some(silence) = env_parse::<u32>("CONVERSE_SILENCE_THRESHOLD_MS")? {
        config.turn_detection.silence_threshold_ms = silence;
    }
    if let Some(min_speech) = env_parse::<u32>("CONVERSE_MIN_SPEECH_MS")? {
        config.turn_detection.min_speech_ms = min_speech;
    }
    if let Some(device) = env_string("CONVERSE_INPUT_DEVICE") {
        config.audio.input_device = Some(device);
    }

    Ok(config)
}
