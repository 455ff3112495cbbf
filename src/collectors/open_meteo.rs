use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::model::Location;
use crate::utils::config::{ForecastConfig, TimestampMode};

/// Longest inclusive date range a single fetch may cover.
pub const MAX_RANGE_DAYS: i64 = 14;

const HOURLY_FIELDS: &str = "cloud_cover,precipitation,visibility";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid date range: {0}")]
    InvalidRange(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned {0}")]
    Status(StatusCode),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(e) => !e.is_builder() && !e.is_decode(),
            FetchError::Status(status) => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            FetchError::InvalidRange(_) | FetchError::Malformed(_) => false,
        }
    }
}

/// One provider hour before clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyForecast {
    pub timestamp: DateTime<Utc>,
    pub cloud_cover: i64,
    pub precipitation: f64,
    pub visibility: i64,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    utc_offset_seconds: Option<i64>,
    #[serde(default)]
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    visibility: Vec<Option<f64>>,
}

/// Rejects reversed ranges and ranges longer than [`MAX_RANGE_DAYS`].
pub fn validate_range(date_from: NaiveDate, date_to: NaiveDate) -> Result<(), FetchError> {
    if date_to < date_from {
        return Err(FetchError::InvalidRange(format!("{date_from} is after {date_to}")));
    }
    let days = (date_to - date_from).num_days() + 1;
    if days > MAX_RANGE_DAYS {
        return Err(FetchError::InvalidRange(format!(
            "{days} days requested, at most {MAX_RANGE_DAYS} allowed"
        )));
    }
    Ok(())
}

/// Provider timezone parameter: the stored zone, or `auto` when unset.
pub fn timezone_param(location: &Location) -> &str {
    match location.timezone.trim() {
        "" => "auto",
        tz => tz,
    }
}

/// Hourly forecast client for the Open-Meteo API.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    config: ForecastConfig,
}

impl OpenMeteoClient {
    pub fn new(config: ForecastConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .timeout(config.timeout)
            .user_agent(concat!("astro_planner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetches hourly cloud cover, precipitation and visibility for the
    /// inclusive local-date range. Validation happens before any request.
    pub async fn fetch_hourly(
        &self,
        location: &Location,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<HourlyForecast>, FetchError> {
        validate_range(date_from, date_to)?;

        let params = [
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("start_date", date_from.format("%Y-%m-%d").to_string()),
            ("end_date", date_to.format("%Y-%m-%d").to_string()),
            ("timezone", timezone_param(location).to_string()),
        ];

        info!(location_id = location.id, from = %date_from, to = %date_to, "Fetching hourly forecast");

        let mut attempt: u32 = 0;
        let mut delay = self.config.retry_delay;
        let body = loop {
            match self.request_once(&params).await {
                Ok(body) => break body,
                Err(e) if attempt < self.config.max_retries && e.is_transient() => {
                    attempt += 1;
                    warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Forecast fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        };

        let response: OpenMeteoResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        let hours = parse_hourly(response, self.config.timestamp_mode)?;
        debug!(location_id = location.id, hours = hours.len(), "Parsed hourly forecast");
        Ok(hours)
    }

    async fn request_once(&self, params: &[(&str, String)]) -> Result<String, FetchError> {
        let resp = self.client.get(&self.config.base_url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(resp.text().await?)
    }
}

/// Zips the parallel hourly arrays, truncating to the shortest one.
fn parse_hourly(response: OpenMeteoResponse, mode: TimestampMode) -> Result<Vec<HourlyForecast>, FetchError> {
    let hourly = response.hourly.unwrap_or_default();
    let n = hourly
        .time
        .len()
        .min(hourly.cloud_cover.len())
        .min(hourly.precipitation.len())
        .min(hourly.visibility.len());

    let offset = match mode {
        TimestampMode::Relabel => Duration::zero(),
        TimestampMode::Offset => {
            let secs = response.utc_offset_seconds.unwrap_or(0);
            Duration::try_seconds(secs)
                .ok_or_else(|| FetchError::Malformed(format!("utc_offset_seconds {secs} out of range")))?
        }
    };

    (0..n)
        .map(|i| {
            let raw = &hourly.time[i];
            let utc = parse_local_time(raw)?
                .checked_sub_signed(offset)
                .ok_or_else(|| FetchError::Malformed(format!("{raw:?} shifted by {offset} leaves the calendar")))?;
            Ok(HourlyForecast {
                timestamp: utc.and_utc(),
                cloud_cover: hourly.cloud_cover[i].unwrap_or(0.0) as i64,
                precipitation: hourly.precipitation[i].unwrap_or(0.0),
                visibility: hourly.visibility[i].unwrap_or(0.0) as i64,
            })
        })
        .collect()
}

fn parse_local_time(raw: &str) -> Result<NaiveDateTime, FetchError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| FetchError::Malformed(format!("bad timestamp {raw:?}")))
}
