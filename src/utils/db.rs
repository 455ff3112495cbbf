use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::core::model::{
    AstroWindow, ForecastHour, HourScore, Location, ObservationPlan, PlanThresholds, Target, TargetType,
};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS locations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        timezone TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS targets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        target_type TEXT NOT NULL,
        right_ascension REAL,
        declination REAL
    );
    CREATE TABLE IF NOT EXISTS plans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
        target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
        date_from TEXT NOT NULL,
        date_to TEXT NOT NULL,
        min_target_altitude REAL NOT NULL,
        max_cloud_cover INTEGER NOT NULL,
        avoid_moon INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS forecast_hours (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        cloud_cover INTEGER NOT NULL,
        precipitation REAL NOT NULL,
        visibility INTEGER NOT NULL,
        source TEXT NOT NULL,
        UNIQUE(location_id, timestamp)
    );
    CREATE TABLE IF NOT EXISTS astro_windows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_id INTEGER NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        score REAL NOT NULL,
        avg_cloud_cover INTEGER NOT NULL,
        moon_illumination REAL NOT NULL,
        max_target_altitude REAL NOT NULL,
        is_astronomical_dark INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS astro_windows_plan ON astro_windows(plan_id);
    CREATE TABLE IF NOT EXISTS hour_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_id INTEGER NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        score REAL NOT NULL,
        cloud_cover INTEGER NOT NULL,
        moon_illumination REAL NOT NULL,
        target_alt REAL NOT NULL,
        is_dark INTEGER NOT NULL,
        UNIQUE(plan_id, timestamp)
    );
"#;

/// Opens (creating if needed) the planner database at `path`.
pub fn open_or_init(path: &Path) -> Result<Connection, DbError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init(conn)
}

pub fn open_in_memory() -> Result<Connection, DbError> {
    init(Connection::open_in_memory()?)
}

fn init(conn: Connection) -> Result<Connection, DbError> {
    // concurrent plan runs queue on the write lock instead of failing
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Fixed-width RFC 3339 so text order is time order.
pub fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn ts_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn insert_location(
    conn: &Connection,
    name: &str,
    latitude: f64,
    longitude: f64,
    timezone: &str,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO locations (name, latitude, longitude, timezone) VALUES (?1, ?2, ?3, ?4)",
        params![name, latitude, longitude, timezone],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_location(conn: &Connection, id: i64) -> Result<Location, DbError> {
    conn.query_row(
        "SELECT id, name, latitude, longitude, timezone FROM locations WHERE id = ?1",
        params![id],
        |row| {
            Ok(Location {
                id: row.get(0)?,
                name: row.get(1)?,
                latitude: row.get(2)?,
                longitude: row.get(3)?,
                timezone: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(DbError::NotFound { entity: "location", id })
}

pub fn insert_target(
    conn: &Connection,
    name: &str,
    target_type: TargetType,
    right_ascension: Option<f64>,
    declination: Option<f64>,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO targets (name, target_type, right_ascension, declination) VALUES (?1, ?2, ?3, ?4)",
        params![name, target_type.as_str(), right_ascension, declination],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_target(conn: &Connection, id: i64) -> Result<Target, DbError> {
    conn.query_row(
        "SELECT id, name, target_type, right_ascension, declination FROM targets WHERE id = ?1",
        params![id],
        |row| {
            let raw_type: String = row.get(2)?;
            let target_type = raw_type
                .parse::<TargetType>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
            Ok(Target {
                id: row.get(0)?,
                name: row.get(1)?,
                target_type,
                right_ascension: row.get(3)?,
                declination: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(DbError::NotFound { entity: "target", id })
}

pub fn insert_plan(
    conn: &Connection,
    location_id: i64,
    target_id: i64,
    date_from: NaiveDate,
    date_to: NaiveDate,
    thresholds: &PlanThresholds,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO plans (location_id, target_id, date_from, date_to, min_target_altitude, max_cloud_cover, avoid_moon)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            location_id,
            target_id,
            date_from.format("%Y-%m-%d").to_string(),
            date_to.format("%Y-%m-%d").to_string(),
            thresholds.min_target_altitude,
            thresholds.max_cloud_cover,
            thresholds.avoid_moon,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_plan(conn: &Connection, id: i64) -> Result<ObservationPlan, DbError> {
    conn.query_row(
        "SELECT id, location_id, target_id, date_from, date_to, min_target_altitude, max_cloud_cover, avoid_moon
         FROM plans WHERE id = ?1",
        params![id],
        |row| {
            Ok(ObservationPlan {
                id: row.get(0)?,
                location_id: row.get(1)?,
                target_id: row.get(2)?,
                date_from: date_from_row(row, 3)?,
                date_to: date_from_row(row, 4)?,
                thresholds: PlanThresholds {
                    min_target_altitude: row.get(5)?,
                    max_cloud_cover: row.get(6)?,
                    avoid_moon: row.get(7)?,
                },
            })
        },
    )
    .optional()?
    .ok_or(DbError::NotFound { entity: "plan", id })
}

/// Inserts or overwrites the row for (location, timestamp).
pub fn upsert_forecast_hour(conn: &Connection, hour: &ForecastHour) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO forecast_hours (location_id, timestamp, cloud_cover, precipitation, visibility, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(location_id, timestamp) DO UPDATE SET
             cloud_cover = excluded.cloud_cover,
             precipitation = excluded.precipitation,
             visibility = excluded.visibility,
             source = excluded.source",
        params![
            hour.location_id,
            ts_to_sql(hour.timestamp),
            hour.cloud_cover,
            hour.precipitation,
            hour.visibility,
            hour.source,
        ],
    )?;
    Ok(())
}

/// Cached hours with `start <= timestamp < end`, oldest first.
pub fn forecast_range(
    conn: &Connection,
    location_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ForecastHour>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT location_id, timestamp, cloud_cover, precipitation, visibility, source
         FROM forecast_hours
         WHERE location_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
         ORDER BY timestamp",
    )?;
    let rows = stmt.query_map(params![location_id, ts_to_sql(start), ts_to_sql(end)], |row| {
        Ok(ForecastHour {
            location_id: row.get(0)?,
            timestamp: ts_from_row(row, 1)?,
            cloud_cover: row.get(2)?,
            precipitation: row.get(3)?,
            visibility: row.get(4)?,
            source: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Deletes every window of the plan and inserts `windows` in their place.
/// Callers wrap this in a transaction.
pub fn replace_windows(conn: &Connection, plan_id: i64, windows: &[AstroWindow]) -> Result<usize, DbError> {
    conn.execute("DELETE FROM astro_windows WHERE plan_id = ?1", params![plan_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO astro_windows
            (plan_id, start_time, end_time, score, avg_cloud_cover, moon_illumination, max_target_altitude, is_astronomical_dark)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for w in windows {
        stmt.execute(params![
            plan_id,
            ts_to_sql(w.start_time),
            ts_to_sql(w.end_time),
            w.score,
            w.avg_cloud_cover,
            w.moon_illumination,
            w.max_target_altitude,
            w.is_astronomical_dark,
        ])?;
    }
    Ok(windows.len())
}

/// Stored windows of a plan, best score first.
pub fn list_windows(conn: &Connection, plan_id: i64) -> Result<Vec<AstroWindow>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time, score, avg_cloud_cover, moon_illumination, max_target_altitude, is_astronomical_dark
         FROM astro_windows WHERE plan_id = ?1
         ORDER BY score DESC, start_time",
    )?;
    let rows = stmt.query_map(params![plan_id], |row| {
        Ok(AstroWindow {
            start_time: ts_from_row(row, 0)?,
            end_time: ts_from_row(row, 1)?,
            score: row.get(2)?,
            avg_cloud_cover: row.get(3)?,
            moon_illumination: row.get(4)?,
            max_target_altitude: row.get(5)?,
            is_astronomical_dark: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Same contract as [`replace_windows`], for the per-hour series of a run.
pub fn replace_hour_scores(conn: &Connection, plan_id: i64, hours: &[HourScore]) -> Result<usize, DbError> {
    conn.execute("DELETE FROM hour_scores WHERE plan_id = ?1", params![plan_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO hour_scores (plan_id, timestamp, score, cloud_cover, moon_illumination, target_alt, is_dark)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for h in hours {
        stmt.execute(params![
            plan_id,
            ts_to_sql(h.timestamp),
            h.score,
            h.cloud_cover,
            h.moon_illumination,
            h.target_alt,
            h.is_dark,
        ])?;
    }
    Ok(hours.len())
}

fn hour_score_from_row(row: &Row<'_>) -> rusqlite::Result<HourScore> {
    Ok(HourScore {
        timestamp: ts_from_row(row, 0)?,
        score: row.get(1)?,
        cloud_cover: row.get(2)?,
        moon_illumination: row.get(3)?,
        target_alt: row.get(4)?,
        is_dark: row.get(5)?,
    })
}

/// Last run's hours in time order.
pub fn list_hour_scores(conn: &Connection, plan_id: i64) -> Result<Vec<HourScore>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, score, cloud_cover, moon_illumination, target_alt, is_dark
         FROM hour_scores WHERE plan_id = ?1
         ORDER BY timestamp",
    )?;
    let rows = stmt.query_map(params![plan_id], hour_score_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Top `limit` hours by score, earlier hour first on ties.
pub fn best_hour_scores(conn: &Connection, plan_id: i64, limit: usize) -> Result<Vec<HourScore>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, score, cloud_cover, moon_illumination, target_alt, is_dark
         FROM hour_scores WHERE plan_id = ?1
         ORDER BY score DESC, timestamp
         LIMIT ?2",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![plan_id, limit], hour_score_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(location_id: i64, h: u32, cloud: u8) -> ForecastHour {
        ForecastHour {
            location_id,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 15, h, 0, 0).unwrap(),
            cloud_cover: cloud,
            precipitation: 0.0,
            visibility: 24_000,
            source: "open-meteo".to_string(),
        }
    }

    fn window(h: u32, score: f64) -> AstroWindow {
        AstroWindow {
            start_time: Utc.with_ymd_and_hms(2024, 7, 15, h, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 7, 15, h + 1, 0, 0).unwrap(),
            score,
            avg_cloud_cover: 10,
            moon_illumination: 0.25,
            max_target_altitude: 42.0,
            is_astronomical_dark: true,
        }
    }

    fn seed_plan(conn: &Connection) -> i64 {
        let loc = insert_location(conn, "Ridge", 45.0, 7.0, "UTC").unwrap();
        let tgt = insert_target(conn, "M31", TargetType::Dso, Some(10.6847), Some(41.2687)).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        let thresholds = PlanThresholds { min_target_altitude: 20.0, max_cloud_cover: 40, avoid_moon: true };
        insert_plan(conn, loc, tgt, day, day, &thresholds).unwrap()
    }

    #[test]
    fn upsert_overwrites_instead_of_duplicating() {
        let conn = open_in_memory().unwrap();
        let loc = insert_location(&conn, "Ridge", 45.0, 7.0, "").unwrap();

        upsert_forecast_hour(&conn, &hour(loc, 3, 20)).unwrap();
        upsert_forecast_hour(&conn, &hour(loc, 3, 75)).unwrap();

        let start = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 7, 16, 0, 0, 0).unwrap();
        let rows = forecast_range(&conn, loc, start, end).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cloud_cover, 75);
    }

    #[test]
    fn forecast_range_is_half_open_and_ordered() {
        let conn = open_in_memory().unwrap();
        let loc = insert_location(&conn, "Ridge", 45.0, 7.0, "").unwrap();
        for h in [5, 1, 3, 2] {
            upsert_forecast_hour(&conn, &hour(loc, h, 0)).unwrap();
        }
        let start = Utc.with_ymd_and_hms(2024, 7, 15, 1, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 7, 15, 5, 0, 0).unwrap();
        let hours: Vec<u32> = forecast_range(&conn, loc, start, end)
            .unwrap()
            .iter()
            .map(|f| chrono::Timelike::hour(&f.timestamp))
            .collect();
        assert_eq!(hours, vec![1, 2, 3]);
    }

    #[test]
    fn replace_windows_drops_previous_set() {
        let conn = open_in_memory().unwrap();
        let plan = seed_plan(&conn);

        replace_windows(&conn, plan, &[window(1, 70.0), window(4, 90.0)]).unwrap();
        replace_windows(&conn, plan, &[window(2, 65.0)]).unwrap();

        let stored = list_windows(&conn, plan).unwrap();
        assert_eq!(stored, vec![window(2, 65.0)]);
    }

    #[test]
    fn list_windows_orders_by_score_then_start() {
        let conn = open_in_memory().unwrap();
        let plan = seed_plan(&conn);
        replace_windows(&conn, plan, &[window(1, 70.0), window(6, 90.0), window(3, 70.0)]).unwrap();

        let stored = list_windows(&conn, plan).unwrap();
        let scores: Vec<f64> = stored.iter().map(|w| w.score).collect();
        assert_eq!(scores, vec![90.0, 70.0, 70.0]);
        assert!(stored[1].start_time < stored[2].start_time);
    }

    fn scored(h: u32, score: f64) -> HourScore {
        HourScore {
            timestamp: Utc.with_ymd_and_hms(2024, 7, 15, h, 0, 0).unwrap(),
            score,
            cloud_cover: 15,
            moon_illumination: 0.5,
            target_alt: 33.0,
            is_dark: h < 4,
        }
    }

    #[test]
    fn hour_scores_are_replaced_and_listed_in_time_order() {
        let conn = open_in_memory().unwrap();
        let plan = seed_plan(&conn);
        replace_hour_scores(&conn, plan, &[scored(9, 10.0)]).unwrap();
        replace_hour_scores(&conn, plan, &[scored(3, 80.0), scored(1, 55.5), scored(2, 80.0)]).unwrap();

        let stored = list_hour_scores(&conn, plan).unwrap();
        assert_eq!(stored, vec![scored(1, 55.5), scored(2, 80.0), scored(3, 80.0)]);
    }

    #[test]
    fn best_hours_rank_by_score_then_time() {
        let conn = open_in_memory().unwrap();
        let plan = seed_plan(&conn);
        let hours: Vec<HourScore> = (0..14).map(|h| scored(h, f64::from(h % 5))).collect();
        replace_hour_scores(&conn, plan, &hours).unwrap();

        let best = best_hour_scores(&conn, plan, 10).unwrap();
        assert_eq!(best.len(), 10);
        let order: Vec<u32> = best.iter().map(|h| chrono::Timelike::hour(&h.timestamp)).collect();
        assert_eq!(order, vec![4, 9, 3, 8, 13, 2, 7, 12, 1, 6]);
    }

    #[test]
    fn plan_round_trips() {
        let conn = open_in_memory().unwrap();
        let id = seed_plan(&conn);
        let plan = get_plan(&conn, id).unwrap();
        assert_eq!(plan.date_from, NaiveDate::from_ymd_opt(2024, 7, 15).unwrap());
        assert_eq!(plan.thresholds.max_cloud_cover, 40);
        assert!(plan.thresholds.avoid_moon);

        let target = get_target(&conn, plan.target_id).unwrap();
        assert_eq!(target.target_type, TargetType::Dso);
        assert_eq!(target.right_ascension, Some(10.6847));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let conn = open_in_memory().unwrap();
        assert!(matches!(get_plan(&conn, 99), Err(DbError::NotFound { entity: "plan", id: 99 })));
        assert!(matches!(get_location(&conn, 7), Err(DbError::NotFound { entity: "location", .. })));
    }

    #[test]
    fn on_disk_database_is_created_with_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/db/planner.sqlite");
        let conn = open_or_init(&path).unwrap();
        insert_location(&conn, "Ridge", 45.0, 7.0, "").unwrap();
        drop(conn);

        let reopened = open_or_init(&path).unwrap();
        assert_eq!(get_location(&reopened, 1).unwrap().name, "Ridge");
    }
}
