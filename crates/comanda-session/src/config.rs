//! Engine configuration and generation-settings resolution.
//!
//! Generation parameters resolve per field with a fixed precedence:
//! explicit request value, then `COMANDA_*` environment default, then
//! the restaurant's stored value, then a hard-coded per-mode default.
//! The resolved value is clamped to the protocol's legal ranges last,
//! whatever its source.

use serde::Deserialize;

use comanda_audio::AudioConfig;
use comanda_protocol::SessionSettings;
use comanda_transport::ReconnectPolicy;
use comanda_types::SessionMode;

/// Legal protocol range for sampling temperature.
const TEMPERATURE_RANGE: (f32, f32) = (0.6, 1.2);
/// Legal protocol range for repetition penalties.
const PENALTY_RANGE: (f32, f32) = (-2.0, 2.0);
/// Legal protocol range for the response token limit.
const TOKEN_RANGE: (u32, u32) = (1, 4096);

/// Explicitly requested generation values (highest precedence).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationRequest {
    /// Requested response token limit.
    pub max_response_tokens: Option<u32>,
    /// Requested sampling temperature.
    pub temperature: Option<f32>,
    /// Requested frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Requested presence penalty.
    pub presence_penalty: Option<f32>,
}

/// Stored per-restaurant generation values, as handed over by the
/// external settings collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestaurantSettings {
    /// Stored response token limit.
    pub max_response_tokens: Option<u32>,
    /// Stored sampling temperature.
    pub temperature: Option<f32>,
    /// Stored frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Stored presence penalty.
    pub presence_penalty: Option<f32>,
}

/// Hard-coded defaults per operating mode (lowest precedence).
fn mode_defaults(mode: SessionMode) -> (u32, f32, f32, f32) {
    match mode {
        // Staff terminals get longer, steadier responses.
        SessionMode::Employee => (1024, 0.7, 0.0, 0.0),
        // Kiosk responses stay short and a little livelier.
        SessionMode::Customer => (512, 0.8, 0.3, 0.0),
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f32(name: &str) -> Option<f32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn clamp_f32(value: f32, range: (f32, f32)) -> f32 {
    value.clamp(range.0, range.1)
}

fn clamp_u32(value: u32, range: (u32, u32)) -> u32 {
    value.clamp(range.0, range.1)
}

/// Resolves the generation settings that ride in `session.update`.
pub fn resolve_generation(
    request: &GenerationRequest,
    stored: Option<&RestaurantSettings>,
    mode: SessionMode,
) -> SessionSettings {
    let (default_tokens, default_temperature, default_frequency, default_presence) =
        mode_defaults(mode);

    let max_response_tokens = request
        .max_response_tokens
        .or_else(|| env_u32("COMANDA_MAX_RESPONSE_TOKENS"))
        .or_else(|| stored.and_then(|s| s.max_response_tokens))
        .unwrap_or(default_tokens);
    let temperature = request
        .temperature
        .or_else(|| env_f32("COMANDA_TEMPERATURE"))
        .or_else(|| stored.and_then(|s| s.temperature))
        .unwrap_or(default_temperature);
    let frequency_penalty = request
        .frequency_penalty
        .or_else(|| env_f32("COMANDA_FREQUENCY_PENALTY"))
        .or_else(|| stored.and_then(|s| s.frequency_penalty))
        .unwrap_or(default_frequency);
    let presence_penalty = request
        .presence_penalty
        .or_else(|| env_f32("COMANDA_PRESENCE_PENALTY"))
        .or_else(|| stored.and_then(|s| s.presence_penalty))
        .unwrap_or(default_presence);

    SessionSettings {
        max_response_tokens: Some(clamp_u32(max_response_tokens, TOKEN_RANGE)),
        temperature: Some(clamp_f32(temperature, TEMPERATURE_RANGE)),
        frequency_penalty: Some(clamp_f32(frequency_penalty, PENALTY_RANGE)),
        presence_penalty: Some(clamp_f32(presence_penalty, PENALTY_RANGE)),
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Negotiation timeout, milliseconds.
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
    /// Audio pipeline tuning.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Reconnection backoff tuning.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Explicit generation overrides for this session.
    #[serde(default)]
    pub generation: GenerationRequest,
    /// Stored per-restaurant generation values.
    #[serde(default)]
    pub restaurant: Option<RestaurantSettings>,
}

fn default_negotiation_timeout_ms() -> u64 {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
            audio: AudioConfig::default(),
            reconnect: ReconnectPolicy::default(),
            generation: GenerationRequest::default(),
            restaurant: None,
        }
    }
}

impl EngineConfig {
    /// The negotiation timeout as a duration.
    pub fn negotiation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.negotiation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The COMANDA_* environment overrides are process-global; these
    // tests leave them unset and exercise the other precedence tiers.

    #[test]
    fn request_value_wins_over_everything() {
        let request = GenerationRequest {
            temperature: Some(1.0),
            ..Default::default()
        };
        let stored = RestaurantSettings {
            temperature: Some(0.65),
            ..Default::default()
        };
        let settings = resolve_generation(&request, Some(&stored), SessionMode::Employee);
        assert_eq!(settings.temperature, Some(1.0));
    }

    #[test]
    fn stored_value_beats_mode_default() {
        let stored = RestaurantSettings {
            max_response_tokens: Some(2048),
            ..Default::default()
        };
        let settings = resolve_generation(
            &GenerationRequest::default(),
            Some(&stored),
            SessionMode::Customer,
        );
        assert_eq!(settings.max_response_tokens, Some(2048));
    }

    #[test]
    fn mode_default_applies_when_nothing_else_is_set() {
        let employee = resolve_generation(&GenerationRequest::default(), None, SessionMode::Employee);
        assert_eq!(employee.max_response_tokens, Some(1024));
        assert_eq!(employee.temperature, Some(0.7));

        let customer = resolve_generation(&GenerationRequest::default(), None, SessionMode::Customer);
        assert_eq!(customer.max_response_tokens, Some(512));
        assert_eq!(customer.frequency_penalty, Some(0.3));
    }

    #[test]
    fn resolved_values_are_clamped_to_legal_ranges() {
        let request = GenerationRequest {
            temperature: Some(5.0),
            max_response_tokens: Some(1_000_000),
            frequency_penalty: Some(-9.0),
            ..Default::default()
        };
        let settings = resolve_generation(&request, None, SessionMode::Employee);
        assert_eq!(settings.temperature, Some(1.2));
        assert_eq!(settings.max_response_tokens, Some(4096));
        assert_eq!(settings.frequency_penalty, Some(-2.0));
    }

    #[test]
    fn config_defaults_deserialize_from_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.negotiation_timeout_ms, 10_000);
        assert_eq!(config.audio.target_rate, 24_000);
        assert_eq!(config.reconnect.max_attempts, 8);
    }
}
