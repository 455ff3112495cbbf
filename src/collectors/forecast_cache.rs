use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use thiserror::Error;
use tracing::info;

use crate::collectors::open_meteo::{FetchError, HourlyForecast, OpenMeteoClient};
use crate::core::model::{ForecastHour, Location};
use crate::utils::db::{self, DbError};

pub const SOURCE_TAG: &str = "open-meteo";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// `[date_from 00:00Z, date_to + 1 day 00:00Z)`.
pub fn utc_bounds(date_from: NaiveDate, date_to: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date_from.and_time(NaiveTime::MIN).and_utc();
    let end = date_to
        .checked_add_days(Days::new(1))
        .unwrap_or(date_to)
        .and_time(NaiveTime::MIN)
        .and_utc();
    (start, end)
}

/// Upserts provider hours, clamping cloud cover to 0..=100 and visibility to >= 0.
pub fn store_hours(conn: &Connection, location_id: i64, hours: &[HourlyForecast]) -> Result<usize, DbError> {
    for h in hours {
        db::upsert_forecast_hour(
            conn,
            &ForecastHour {
                location_id,
                timestamp: h.timestamp,
                cloud_cover: h.cloud_cover.clamp(0, 100) as u8,
                precipitation: h.precipitation,
                visibility: h.visibility.max(0),
                source: SOURCE_TAG.to_string(),
            },
        )?;
    }
    Ok(hours.len())
}

/// Everything cached for the location within the UTC day bounds of the range.
pub fn cached_range(
    conn: &Connection,
    location_id: i64,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<Vec<ForecastHour>, DbError> {
    let (start, end) = utc_bounds(date_from, date_to);
    db::forecast_range(conn, location_id, start, end)
}

/// Read-through fetch: pull from the provider, upsert, then return the whole
/// cached slice for the range. A failed fetch writes nothing.
pub async fn fetch_hours(
    conn: &mut Connection,
    client: &OpenMeteoClient,
    location: &Location,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<Vec<ForecastHour>, CacheError> {
    let fetched = client.fetch_hourly(location, date_from, date_to).await?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(DbError::from)?;
    let stored = store_hours(&tx, location.id, &fetched)?;
    let hours = cached_range(&tx, location.id, date_from, date_to)?;
    tx.commit().map_err(DbError::from)?;

    info!(location_id = location.id, stored, cached = hours.len(), "Forecast cache refreshed");
    Ok(hours)
}
