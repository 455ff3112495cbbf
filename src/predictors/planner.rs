use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collectors::forecast_cache::{self, CacheError};
use crate::collectors::open_meteo::{self, FetchError, HourlyForecast, OpenMeteoClient};
use crate::core::model::{AstroWindow, ForecastHour, HourScore, Location, ObservationPlan, PlanThresholds, Target, TargetType};
use crate::core::sky::{self, SkyGeometry, TargetAltitude};
use crate::predictors::scoring::{is_good_hour, score_hour};
use crate::predictors::windows::merge_windows;
use crate::utils::db::{self, DbError};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("forecast fetch failed: {0}")]
    Fetch(FetchError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] DbError),
}

impl From<FetchError> for PlanError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidRange(msg) => PlanError::Validation(msg),
            other => PlanError::Fetch(other),
        }
    }
}

impl From<CacheError> for PlanError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Fetch(e) => e.into(),
            CacheError::Db(e) => PlanError::Persistence(e),
        }
    }
}

/// A plan with the records it references.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub plan: ObservationPlan,
    pub location: Location,
    pub target: Target,
}

impl PlanContext {
    pub fn load(conn: &Connection, plan_id: i64) -> Result<Self, PlanError> {
        let plan = db::get_plan(conn, plan_id)?;
        let location = db::get_location(conn, plan.location_id)?;
        let target = db::get_target(conn, plan.target_id)?;
        Ok(Self { plan, location, target })
    }

    /// Bounds checks on everything the run depends on.
    pub fn validate(&self) -> Result<(), PlanError> {
        let invalid = |msg: String| Err(PlanError::Validation(msg));
        let loc = &self.location;
        if !(-90.0..=90.0).contains(&loc.latitude) {
            return invalid(format!("latitude {} outside [-90, 90]", loc.latitude));
        }
        if !(-180.0..=180.0).contains(&loc.longitude) {
            return invalid(format!("longitude {} outside [-180, 180]", loc.longitude));
        }

        let t = &self.plan.thresholds;
        if !(0.0..=90.0).contains(&t.min_target_altitude) {
            return invalid(format!("min_target_altitude {} outside [0, 90]", t.min_target_altitude));
        }
        if t.max_cloud_cover > 100 {
            return invalid(format!("max_cloud_cover {} above 100", t.max_cloud_cover));
        }

        if self.target.target_type == TargetType::Dso {
            match (self.target.right_ascension, self.target.declination) {
                (Some(ra), Some(dec)) if (0.0..=360.0).contains(&ra) && (-90.0..=90.0).contains(&dec) => {}
                (Some(_), Some(_)) => return invalid(format!("target {} has RA/Dec out of range", self.target.id)),
                _ => return invalid(format!("DSO target {} needs RA and Dec", self.target.id)),
            }
        }

        open_meteo::validate_range(self.plan.date_from, self.plan.date_to)?;
        Ok(())
    }
}

/// Result of one run: every hour considered plus the windows now stored.
#[derive(Debug, Clone, Serialize)]
pub struct PlanRun {
    pub plan_id: i64,
    pub hours: Vec<HourScore>,
    pub windows: Vec<AstroWindow>,
}

/// Scores each cached hour with the geometry `sky_at` reports for it.
/// Hours are independent; output keeps input order.
pub fn evaluate_hours<F>(thresholds: &PlanThresholds, forecast: &[ForecastHour], mut sky_at: F) -> Vec<HourScore>
where
    F: FnMut(DateTime<Utc>) -> SkyGeometry,
{
    forecast
        .iter()
        .map(|fh| score_hour(thresholds, fh, &sky_at(fh.timestamp)))
        .collect()
}

/// Filters to good hours and merges them.
pub fn plan_windows(thresholds: &PlanThresholds, hours: &[HourScore]) -> Vec<AstroWindow> {
    let good: Vec<HourScore> = hours
        .iter()
        .filter(|h| is_good_hour(thresholds, h))
        .cloned()
        .collect();
    merge_windows(&good)
}

/// Fetches the forecast, scores every hour and replaces the plan's windows
/// and stored hour scores.
/// Either everything is written or nothing is.
pub async fn run_plan(conn: &mut Connection, client: &OpenMeteoClient, plan_id: i64) -> Result<PlanRun, PlanError> {
    let ctx = PlanContext::load(conn, plan_id)?;
    ctx.validate()?;

    let fetched = client
        .fetch_hourly(&ctx.location, ctx.plan.date_from, ctx.plan.date_to)
        .await?;
    apply_forecast(conn, &ctx, &fetched)
}

/// Database half of a run, in one immediate transaction so concurrent runs
/// of the same plan serialize on the write lock.
pub fn apply_forecast(conn: &mut Connection, ctx: &PlanContext, fetched: &[HourlyForecast]) -> Result<PlanRun, PlanError> {
    let plan = &ctx.plan;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(DbError::from)?;

    forecast_cache::store_hours(&tx, ctx.location.id, fetched)?;
    let forecast = forecast_cache::cached_range(&tx, ctx.location.id, plan.date_from, plan.date_to)?;

    let mut unresolved = 0usize;
    let hours = evaluate_hours(&plan.thresholds, &forecast, |instant| {
        let geometry = sky::compute(&ctx.location, &ctx.target, instant);
        if geometry.target_altitude == TargetAltitude::Unresolved {
            unresolved += 1;
        }
        geometry
    });
    if unresolved > 0 {
        warn!(
            plan_id = plan.id,
            target = %ctx.target.name,
            hours = unresolved,
            "Target position unresolved, scored at altitude 0"
        );
    }

    let windows = plan_windows(&plan.thresholds, &hours);
    db::replace_windows(&tx, plan.id, &windows)?;
    db::replace_hour_scores(&tx, plan.id, &hours)?;
    tx.commit().map_err(DbError::from)?;

    debug!(plan_id = plan.id, fetched = fetched.len(), "Stored provider hours");
    info!(plan_id = plan.id, hours = hours.len(), windows = windows.len(), "Plan run complete");

    Ok(PlanRun { plan_id: plan.id, hours, windows })
}
