use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// How provider-local timestamps become UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// Tag the provider's local wall-clock time as UTC without shifting it.
    #[default]
    Relabel,
    /// Subtract the provider's reported `utc_offset_seconds`.
    Offset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timestamp mode {0:?}, expected relabel or offset")]
pub struct UnknownTimestampMode(pub String);

impl FromStr for TimestampMode {
    type Err = UnknownTimestampMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relabel" => Ok(TimestampMode::Relabel),
            "offset" => Ok(TimestampMode::Offset),
            _ => Err(UnknownTimestampMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timestamp_mode: TimestampMode,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPEN_METEO_URL.to_string(),
            timeout: Duration::from_secs(20),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            timestamp_mode: TimestampMode::Relabel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub forecast: ForecastConfig,
}

impl AppConfig {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("PLANNER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/db/planner.sqlite"));

        let bind_addr = env_var("PLANNER_BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?;
        let timestamp_mode = env_var("FORECAST_TIMESTAMPS", TimestampMode::default())?;

        let forecast = ForecastConfig {
            base_url: env::var("OPEN_METEO_URL").unwrap_or_else(|_| DEFAULT_OPEN_METEO_URL.to_string()),
            timeout: Duration::from_secs(env_var("FORECAST_TIMEOUT_SECS", 20)?),
            max_retries: env_var("FORECAST_MAX_RETRIES", 2)?,
            retry_delay: Duration::from_millis(env_var("FORECAST_RETRY_DELAY_MS", 500)?),
            timestamp_mode,
        };

        Ok(Self { db_path, bind_addr, forecast })
    }
}

fn env_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    parse_var(key, env::var(key).ok(), default)
}

/// Unset means `default`; anything set must parse.
fn parse_var<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
