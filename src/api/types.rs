use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::model::{AstroWindow, HourScore};
use crate::predictors::planner::PlanRun;

/// Parallel series for plotting a run hour by hour.
#[derive(Debug, Serialize, PartialEq)]
pub struct ChartDto {
    pub labels: Vec<String>,
    pub scores: Vec<f64>,
    pub clouds: Vec<u8>,
}

impl ChartDto {
    pub fn from_hours(hours: &[HourScore]) -> Self {
        Self {
            labels: hours.iter().map(|h| h.timestamp.format("%Y-%m-%d %H:%M").to_string()).collect(),
            scores: hours.iter().map(|h| (h.score * 100.0).round() / 100.0).collect(),
            clouds: hours.iter().map(|h| h.cloud_cover).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub plan_id: i64,
    pub hours: Vec<HourScore>,
    pub windows: Vec<AstroWindow>,
    pub chart: ChartDto,
}

impl From<PlanRun> for RunResponse {
    fn from(run: PlanRun) -> Self {
        let chart = ChartDto::from_hours(&run.hours);
        Self { plan_id: run.plan_id, hours: run.hours, windows: run.windows, chart }
    }
}

/// Stored results of a plan's last run.
#[derive(Debug, Serialize)]
pub struct PlanDetailResponse {
    pub plan_id: i64,
    pub windows: Vec<AstroWindow>,
    pub chart: ChartDto,
    pub hours_best: Vec<HourScore>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn hour(offset: i64, score: f64, cloud: u8) -> HourScore {
        HourScore {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap() + Duration::hours(offset),
            score,
            cloud_cover: cloud,
            moon_illumination: 0.1,
            target_alt: 40.0,
            is_dark: true,
        }
    }

    #[test]
    fn chart_series_line_up_with_hours() {
        let chart = ChartDto::from_hours(&[hour(0, 71.456, 12), hour(2, 64.0, 30)]);
        assert_eq!(chart.labels, vec!["2024-03-09 22:00", "2024-03-10 00:00"]);
        assert_eq!(chart.scores, vec![71.46, 64.0]);
        assert_eq!(chart.clouds, vec![12, 30]);
    }

    #[test]
    fn run_response_keeps_every_hour() {
        let run = PlanRun { plan_id: 7, hours: vec![hour(0, 80.0, 5), hour(1, 20.0, 90)], windows: Vec::new() };
        let body = serde_json::to_value(RunResponse::from(run)).unwrap();
        assert_eq!(body["plan_id"], 7);
        assert_eq!(body["hours"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["chart"]["clouds"][1], 90);
        assert!(body["windows"].as_array().is_some_and(|w| w.is_empty()));
    }
}
