//! Application-level configuration loading, including game timings and protocol limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use validator::Validate;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "IMPOSTER_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Time players get to submit an answer before discussion opens anyway.
    pub question_duration: Duration,
    /// Length of the discussion phase.
    pub discussion_duration: Duration,
    /// Time allowed for votes before results are computed with what arrived.
    pub voting_duration: Duration,
    /// How long results stay on screen before the room returns to waiting.
    pub results_duration: Duration,
    /// Interval between `discussion_timer` broadcasts.
    pub timer_tick_interval: Duration,
    /// Delay between `game_starting` and the first question once everyone is ready.
    pub start_countdown: Duration,
    /// Interval between liveness probes and stale-connection sweeps.
    pub heartbeat_interval: Duration,
    /// Age of the last heartbeat after which a connection is evicted.
    pub heartbeat_timeout: Duration,
    /// Oldest accepted inbound envelope timestamp, relative to now.
    pub timestamp_max_age: Duration,
    /// Furthest accepted inbound envelope timestamp in the future.
    pub timestamp_max_skew: Duration,
    /// Upper bound for a single best-effort mirror write.
    pub mirror_timeout: Duration,
    /// Active players required to start a round.
    pub min_players: usize,
    /// Maximum chat message length, in characters.
    pub max_chat_length: usize,
    /// Maximum display name length, in characters.
    pub max_name_length: usize,
    /// Maximum answer length, in characters.
    pub max_answer_length: usize,
    /// Number of questions the imposter prompt is drawn from.
    pub question_pool_size: u32,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match parse_config(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        min_players = app_config.min_players,
                        discussion_secs = app_config.discussion_duration.as_secs(),
                        "loaded game configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            question_duration: Duration::from_secs(60),
            discussion_duration: Duration::from_secs(120),
            voting_duration: Duration::from_secs(60),
            results_duration: Duration::from_secs(10),
            timer_tick_interval: Duration::from_secs(1),
            start_countdown: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            timestamp_max_age: Duration::from_secs(300),
            timestamp_max_skew: Duration::from_secs(30),
            mirror_timeout: Duration::from_secs(2),
            min_players: 3,
            max_chat_length: 500,
            max_name_length: 32,
            max_answer_length: 200,
            question_pool_size: 50,
        }
    }
}

/// Error returned when the configuration file cannot be turned into an [`AppConfig`].
#[derive(Debug, thiserror::Error)]
enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid values: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let raw = serde_json::from_str::<RawConfig>(contents)?;
    raw.validate()?;
    Ok(raw.into())
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
///
/// Every field is optional; missing values keep their built-in default.
struct RawConfig {
    #[validate(range(min = 1))]
    question_secs: Option<u64>,
    #[validate(range(min = 1))]
    discussion_secs: Option<u64>,
    #[validate(range(min = 1))]
    voting_secs: Option<u64>,
    #[validate(range(min = 1))]
    results_secs: Option<u64>,
    #[validate(range(min = 100))]
    timer_tick_ms: Option<u64>,
    start_countdown_secs: Option<u64>,
    #[validate(range(min = 1))]
    heartbeat_interval_secs: Option<u64>,
    #[validate(range(min = 1))]
    heartbeat_timeout_secs: Option<u64>,
    #[validate(range(min = 1))]
    timestamp_max_age_secs: Option<u64>,
    timestamp_max_skew_secs: Option<u64>,
    #[validate(range(min = 50))]
    mirror_timeout_ms: Option<u64>,
    #[validate(range(min = 1, max = 64))]
    min_players: Option<usize>,
    #[validate(range(min = 1, max = 10_000))]
    max_chat_length: Option<usize>,
    #[validate(range(min = 1, max = 128))]
    max_name_length: Option<usize>,
    #[validate(range(min = 1, max = 10_000))]
    max_answer_length: Option<usize>,
    #[validate(range(min = 1))]
    question_pool_size: Option<u32>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };

        Self {
            question_duration: secs(raw.question_secs, defaults.question_duration),
            discussion_duration: secs(raw.discussion_secs, defaults.discussion_duration),
            voting_duration: secs(raw.voting_secs, defaults.voting_duration),
            results_duration: secs(raw.results_secs, defaults.results_duration),
            timer_tick_interval: millis(raw.timer_tick_ms, defaults.timer_tick_interval),
            start_countdown: secs(raw.start_countdown_secs, defaults.start_countdown),
            heartbeat_interval: secs(raw.heartbeat_interval_secs, defaults.heartbeat_interval),
            heartbeat_timeout: secs(raw.heartbeat_timeout_secs, defaults.heartbeat_timeout),
            timestamp_max_age: secs(raw.timestamp_max_age_secs, defaults.timestamp_max_age),
            timestamp_max_skew: secs(raw.timestamp_max_skew_secs, defaults.timestamp_max_skew),
            mirror_timeout: millis(raw.mirror_timeout_ms, defaults.mirror_timeout),
            min_players: raw.min_players.unwrap_or(defaults.min_players),
            max_chat_length: raw.max_chat_length.unwrap_or(defaults.max_chat_length),
            max_name_length: raw.max_name_length.unwrap_or(defaults.max_name_length),
            max_answer_length: raw.max_answer_length.unwrap_or(defaults.max_answer_length),
            question_pool_size: raw.question_pool_size.unwrap_or(defaults.question_pool_size),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = parse_config("{}").unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.discussion_duration, defaults.discussion_duration);
        assert_eq!(config.min_players, defaults.min_players);
    }

    #[test]
    fn overrides_are_applied() {
        let config =
            parse_config(r#"{"discussionSecs": 45, "minPlayers": 4, "timerTickMs": 500}"#)
                .unwrap();
        assert_eq!(config.discussion_duration, Duration::from_secs(45));
        assert_eq!(config.min_players, 4);
        assert_eq!(config.timer_tick_interval, Duration::from_millis(500));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            parse_config(r#"{"minPlayers": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
