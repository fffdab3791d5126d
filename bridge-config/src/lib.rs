use std::env;
use std::time::Duration;

use craftlink_bridge_protocol::MAX_FRAME_BYTES;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_COOLDOWN_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_FRAME_BYTES: usize = MAX_FRAME_BYTES;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ENV_KEY: &str = "CRAFTLINK_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_MAX_HISTORY_ITEMS: usize = 40;

const ENV_HOST: &str = "CRAFTLINK_HOST";
const ENV_PORT: &str = "CRAFTLINK_PORT";
const ENV_WAKE_WORD: &str = "CRAFTLINK_WAKE_WORD";
const ENV_PLAYER_PATTERN: &str = "CRAFTLINK_PLAYER_PATTERN";
const ENV_COOLDOWN_SECS: &str = "CRAFTLINK_COOLDOWN_SECS";
const ENV_REQUEST_TIMEOUT_MS: &str = "CRAFTLINK_REQUEST_TIMEOUT_MS";
const ENV_MAX_FRAME_BYTES: &str = "CRAFTLINK_MAX_FRAME_BYTES";
const ENV_FAIL_PENDING: &str = "CRAFTLINK_FAIL_PENDING_ON_DISCONNECT";
const ENV_BASE_URL: &str = "CRAFTLINK_BASE_URL";
const ENV_MODEL: &str = "CRAFTLINK_MODEL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub wake_word: Option<String>,
    pub player_pattern: Option<String>,
    pub cooldown_secs: u64,
    pub request_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub fail_pending_on_disconnect: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            wake_word: None,
            player_pattern: None,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            fail_pending_on_disconnect: false,
        }
    }
}

impl BridgeConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("host cannot be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "max frame bytes must be greater than 0".to_string(),
            ));
        }
        if let Some(pattern) = self.player_pattern.as_deref() {
            Regex::new(pattern).map_err(|err| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                error: err.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Values that win over the environment, typically fed from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub wake_word: Option<String>,
    pub player_pattern: Option<String>,
    pub cooldown_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_frame_bytes: Option<usize>,
    pub fail_pending_on_disconnect: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub base_url: String,
    pub env_key: String,
    pub api_key: String,
    pub model: String,
    pub max_history_items: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub env_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("player pattern '{pattern}' does not compile: {error}")]
    InvalidPattern { pattern: String, error: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub fn load_bridge_config() -> Result<BridgeConfig, ConfigError> {
    load_bridge_config_with(BridgeOverrides::default())
}

pub fn load_bridge_config_with(overrides: BridgeOverrides) -> Result<BridgeConfig, ConfigError> {
    load_bridge_config_from(|key| env::var(key).ok(), overrides)
}

pub fn load_bridge_config_from(
    lookup: impl Fn(&str) -> Option<String>,
    overrides: BridgeOverrides,
) -> Result<BridgeConfig, ConfigError> {
    let defaults = BridgeConfig::default();
    let lookup_nonempty = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let config = BridgeConfig {
        host: overrides
            .host
            .or_else(|| lookup_nonempty(ENV_HOST))
            .unwrap_or(defaults.host),
        port: match overrides.port {
            Some(port) => port,
            None => parse_env(&lookup_nonempty, ENV_PORT)?.unwrap_or(defaults.port),
        },
        wake_word: overrides
            .wake_word
            .or_else(|| lookup_nonempty(ENV_WAKE_WORD))
            .filter(|value| !value.is_empty()),
        player_pattern: overrides
            .player_pattern
            .or_else(|| lookup_nonempty(ENV_PLAYER_PATTERN))
            .filter(|value| !value.is_empty()),
        cooldown_secs: match overrides.cooldown_secs {
            Some(secs) => secs,
            None => parse_env(&lookup_nonempty, ENV_COOLDOWN_SECS)?
                .unwrap_or(defaults.cooldown_secs),
        },
        request_timeout_ms: match overrides.request_timeout_ms {
            Some(ms) => ms,
            None => parse_env(&lookup_nonempty, ENV_REQUEST_TIMEOUT_MS)?
                .unwrap_or(defaults.request_timeout_ms),
        },
        max_frame_bytes: match overrides.max_frame_bytes {
            Some(bytes) => bytes,
            None => parse_env(&lookup_nonempty, ENV_MAX_FRAME_BYTES)?
                .unwrap_or(defaults.max_frame_bytes),
        },
        fail_pending_on_disconnect: match overrides.fail_pending_on_disconnect {
            Some(flag) => flag,
            None => match lookup_nonempty(ENV_FAIL_PENDING) {
                Some(raw) => parse_bool(ENV_FAIL_PENDING, &raw)?,
                None => defaults.fail_pending_on_disconnect,
            },
        },
    };

    config.validate()?;
    Ok(config)
}

pub fn load_model_config() -> Result<ModelConfig, ConfigError> {
    load_model_config_with(ModelOverrides::default())
}

pub fn load_model_config_with(overrides: ModelOverrides) -> Result<ModelConfig, ConfigError> {
    load_model_config_from(|key| env::var(key).ok(), overrides)
}

pub fn load_model_config_from(
    lookup: impl Fn(&str) -> Option<String>,
    overrides: ModelOverrides,
) -> Result<ModelConfig, ConfigError> {
    let env_key = overrides
        .env_key
        .unwrap_or_else(|| DEFAULT_ENV_KEY.to_string());
    let api_key = lookup(&env_key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(env_key.clone()))?;

    Ok(ModelConfig {
        base_url: overrides
            .base_url
            .or_else(|| lookup(ENV_BASE_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        env_key,
        api_key,
        model: overrides
            .model
            .or_else(|| lookup(ENV_MODEL))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        max_history_items: DEFAULT_MAX_HISTORY_ITEMS,
    })
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}
