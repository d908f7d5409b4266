use codeprep_core::SamplingOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_CONTEST_SOURCE_URL: &str = "https://codeforces.com/api/contest.list?gym=false";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How relay output is written onto the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFraming {
    /// `{"type": "stream" | "complete" | "error", "content": ...}` envelopes.
    Json,
    /// Raw text fragments, a `[DONE]` sentinel and `Error: ...` lines.
    Text,
}

/// Behaviour switches for the `/ws/llm` relay.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub require_auth: bool,
    pub topic_filter: bool,
    pub framing: ResponseFraming,
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            topic_filter: true,
            framing: ResponseFraming::Json,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub sampling: SamplingOptions,
    pub relay: RelayConfig,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    /// `None` disables the scheduled contest sync.
    pub contest_sync_interval: Option<Duration>,
    pub contest_source_url: String,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{}' is not a boolean", other),
            )),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10u32)?;
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "DATABASE_MAX_CONNECTIONS".to_string(),
                "pool size must be at least 1".to_string(),
            ));
        }
        let database_acquire_timeout =
            Duration::from_secs(parse_var("DATABASE_ACQUIRE_TIMEOUT_SECS", 5u64)?);

        let ollama_base_url = var_or("OLLAMA_BASE_URL", "http://localhost:11434");
        if !(ollama_base_url.starts_with("http://") || ollama_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "OLLAMA_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", ollama_base_url),
            ));
        }
        let ollama_model = var_or("OLLAMA_MODEL", "llama3.2");

        let defaults = SamplingOptions::default();
        let sampling = SamplingOptions {
            temperature: parse_var("OLLAMA_TEMPERATURE", defaults.temperature)?,
            top_p: parse_var("OLLAMA_TOP_P", defaults.top_p)?,
            top_k: parse_var("OLLAMA_TOP_K", defaults.top_k)?,
        };

        let framing_str = var_or("RELAY_FRAMING", "json");
        let framing = match framing_str.to_lowercase().as_str() {
            "json" => ResponseFraming::Json,
            "text" => ResponseFraming::Text,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "RELAY_FRAMING".to_string(),
                    format!("'{}' must be 'json' or 'text'", framing_str),
                ));
            }
        };
        let relay_defaults = RelayConfig::default();
        let timeout_secs = parse_var(
            "RELAY_REQUEST_TIMEOUT_SECS",
            relay_defaults.request_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_REQUEST_TIMEOUT_SECS".to_string(),
                "timeout must be at least 1 second".to_string(),
            ));
        }
        let relay = RelayConfig {
            require_auth: parse_flag("RELAY_REQUIRE_AUTH", relay_defaults.require_auth)?,
            topic_filter: parse_flag("RELAY_TOPIC_FILTER", relay_defaults.topic_filter)?,
            framing,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let contest_sync_secs = parse_var("CONTEST_SYNC_INTERVAL_SECS", 6 * 60 * 60u64)?;
        let contest_sync_interval =
            (contest_sync_secs > 0).then(|| Duration::from_secs(contest_sync_secs));
        let contest_source_url = var_or("CONTEST_SOURCE_URL", DEFAULT_CONTEST_SOURCE_URL);

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            database_acquire_timeout,
            ollama_base_url,
            ollama_model,
            sampling,
            relay,
            log_level,
            prompts_path,
            contest_sync_interval,
            contest_source_url,
        })
    }
}
