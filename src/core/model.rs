use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

/// Observing site. An empty `timezone` lets the forecast provider pick one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetType {
    Moon,
    Planet,
    #[serde(rename = "DSO")]
    Dso,
    MilkyWay,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Moon => "Moon",
            TargetType::Planet => "Planet",
            TargetType::Dso => "DSO",
            TargetType::MilkyWay => "MilkyWay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown target type {0:?}")]
pub struct UnknownTargetType(pub String);

impl FromStr for TargetType {
    type Err = UnknownTargetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Moon" => Ok(TargetType::Moon),
            "Planet" => Ok(TargetType::Planet),
            "DSO" => Ok(TargetType::Dso),
            "MilkyWay" => Ok(TargetType::MilkyWay),
            other => Err(UnknownTargetType(other.to_string())),
        }
    }
}

/// What to observe. RA/Dec are J2000 degrees and only meaningful for DSOs;
/// for planets `name` is the body identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub target_type: TargetType,
    pub right_ascension: Option<f64>,
    pub declination: Option<f64>,
}

/// The per-plan knobs the scorer and the good-hour filter look at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanThresholds {
    pub min_target_altitude: f64,
    pub max_cloud_cover: u8,
    pub avoid_moon: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationPlan {
    pub id: i64,
    pub location_id: i64,
    pub target_id: i64,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub thresholds: PlanThresholds,
}

/// One cached provider hour for a location. Unique per (location, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastHour {
    pub location_id: i64,
    pub timestamp: DateTime<Utc>,
    pub cloud_cover: u8,
    pub precipitation: f64,
    pub visibility: i64,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourScore {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub cloud_cover: u8,
    pub moon_illumination: f64,
    pub target_alt: f64,
    pub is_dark: bool,
}

/// Aggregate over a run of contiguous good hours. `end_time` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstroWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub score: f64,
    pub avg_cloud_cover: u8,
    pub moon_illumination: f64,
    pub max_target_altitude: f64,
    pub is_astronomical_dark: bool,
}
