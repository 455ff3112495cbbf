use crate::core::model::{ForecastHour, HourScore, PlanThresholds};
use crate::core::sky::SkyGeometry;

/// Sun altitude below which the sky counts as astronomically dark.
pub const ASTRONOMICAL_NIGHT_SUN_ALT: f64 = -18.0;
/// Minimum score for an hour to join a window, whatever the plan says.
pub const MIN_GOOD_SCORE: f64 = 60.0;

const BASE_SCORE: f64 = 100.0;
const CLOUD_PENALTY_PER_PERCENT: f64 = 0.8;
const PRECIPITATION_PENALTY: f64 = 15.0;
const DARK_BONUS: f64 = 10.0;
const TWILIGHT_PENALTY: f64 = 5.0;
const ALTITUDE_BONUS_PER_DEG: f64 = 0.7;
const ALTITUDE_BONUS_CAP: f64 = 20.0;
const LOW_TARGET_PENALTY: f64 = 30.0;
const MOON_PENALTY: f64 = 40.0;

/// Scores one hour on a 0..=100 scale. Deterministic and total: any numeric
/// input yields a clamped score.
pub fn score_hour(thresholds: &PlanThresholds, forecast: &ForecastHour, sky: &SkyGeometry) -> HourScore {
    let cloud = forecast.cloud_cover;
    let target_alt = sky.target_altitude.degrees_or_zero();
    let is_dark = sky.sun_altitude_deg < ASTRONOMICAL_NIGHT_SUN_ALT;

    let mut score = BASE_SCORE;
    score -= CLOUD_PENALTY_PER_PERCENT * f64::from(cloud);

    if forecast.precipitation > 0.0 {
        score -= PRECIPITATION_PENALTY;
    }

    if is_dark {
        score += DARK_BONUS;
    } else {
        score -= TWILIGHT_PENALTY;
    }

    // strictly above the minimum; sitting exactly on it is penalised
    if target_alt > thresholds.min_target_altitude {
        score += ALTITUDE_BONUS_CAP.min((target_alt - thresholds.min_target_altitude) * ALTITUDE_BONUS_PER_DEG);
    } else {
        score -= LOW_TARGET_PENALTY;
    }

    if thresholds.avoid_moon {
        let moon_factor = (sky.moon_altitude_deg / 90.0).max(0.0);
        score -= MOON_PENALTY * sky.moon_illumination * moon_factor;
    }

    HourScore {
        timestamp: forecast.timestamp,
        score: score.clamp(0.0, 100.0),
        cloud_cover: cloud,
        moon_illumination: sky.moon_illumination,
        target_alt,
        is_dark,
    }
}

/// Good hours meet the plan's cloud and altitude limits and score at least 60.
pub fn is_good_hour(thresholds: &PlanThresholds, hour: &HourScore) -> bool {
    hour.cloud_cover <= thresholds.max_cloud_cover
        && hour.target_alt >= thresholds.min_target_altitude
        && hour.score >= MIN_GOOD_SCORE
}
