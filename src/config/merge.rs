use super::ConverseConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;
use crate::core::turn::TurnStrategyKind;

/// Build the final configuration: environment variables (over defaults) as
/// the base, YAML values on top.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ConverseConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml_config else {
        return Ok(config);
    };

    if let Some(endpoint) = yaml.endpoint {
        if let Some(url) = endpoint.url {
            config.endpoint.url = url;
        }
        if let Some(token) = endpoint.auth_token {
            config.endpoint.auth_token = Some(token);
        }
        if let Some(timeout) = endpoint.connect_timeout_ms {
            config.endpoint.connect_timeout_ms = timeout;
        }
    }

    if let Some(audio) = yaml.audio {
        if let Some(rate) = audio.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(channels) = audio.channels {
            config.audio.channels = channels;
        }
        if let Some(frame_ms) = audio.frame_ms {
            config.audio.frame_ms = frame_ms;
        }
        if let Some(interval) = audio.chunk_interval_ms {
            config.audio.chunk_interval_ms = interval;
        }
        if let Some(device) = audio.input_device {
            config.audio.input_device = Some(device);
        }
    }

    if let Some(turn) = yaml.turn_detection {
        let target = &mut config.turn_detection;
        if let Some(strategy) = turn.strategy {
            target.strategy = TurnStrategyKind::parse(&strategy).ok_or_else(|| {
                format!("Invalid turn_detection.strategy '{strategy}' (expected local or server)")
            })?;
        }
        if let Some(v) = turn.positive_threshold {
            target.positive_threshold = v;
        }
        if let Some(v) = turn.negative_threshold {
            target.negative_threshold = v;
        }
        if let Some(v) = turn.min_confirm_ms {
            target.min_confirm_ms = v;
        }
        if let Some(v) = turn.silence_threshold_ms {
            target.silence_threshold_ms = v;
        }
        if let Some(v) = turn.min_speech_ms {
            target.min_speech_ms = v;
        }
        if let Some(v) = turn.noise_floor_db {
            target.noise_floor_db = v;
        }
        if let Some(v) = turn.speech_level_db {
            target.speech_level_db = v;
        }
    }

    if let Some(playback) = yaml.playback
        && let Some(lead_ms) = playback.lead_ms
    {
        config.playback.lead_ms = lead_ms;
    }

    if let Some(reconnection) = yaml.reconnection {
        let target = &mut config.reconnection;
        if let Some(v) = reconnection.enabled {
            target.enabled = v;
        }
        if let Some(v) = reconnection.max_attempts {
            target.max_attempts = v;
        }
        if let Some(v) = reconnection.initial_delay_ms {
            target.initial_delay_ms = v;
        }
        if let Some(v) = reconnection.max_delay_ms {
            target.max_delay_ms = v;
        }
        if let Some(v) = reconnection.backoff_multiplier {
            target.backoff_multiplier = v;
        }
        if let Some(v) = reconnection.jitter {
            target.jitter = v;
        }
    }

    Ok(config)
}
