use chrono::{DateTime, Duration, Utc};

use crate::core::model::{AstroWindow, HourScore};

/// Running aggregate of the window being built.
struct OpenRun {
    start: DateTime<Utc>,
    last: DateTime<Utc>,
    score_sum: f64,
    cloud_sum: f64,
    moon_sum: f64,
    count: usize,
    max_target_alt: f64,
    any_dark: bool,
}

impl OpenRun {
    fn begin(hour: &HourScore) -> Self {
        Self {
            start: hour.timestamp,
            last: hour.timestamp,
            score_sum: hour.score,
            cloud_sum: f64::from(hour.cloud_cover),
            moon_sum: hour.moon_illumination,
            count: 1,
            max_target_alt: hour.target_alt,
            any_dark: hour.is_dark,
        }
    }

    fn continues_with(&self, hour: &HourScore) -> bool {
        hour.timestamp == self.last + Duration::hours(1)
    }

    fn extend(&mut self, hour: &HourScore) {
        self.last = hour.timestamp;
        self.score_sum += hour.score;
        self.cloud_sum += f64::from(hour.cloud_cover);
        self.moon_sum += hour.moon_illumination;
        self.count += 1;
        self.max_target_alt = self.max_target_alt.max(hour.target_alt);
        self.any_dark |= hour.is_dark;
    }

    fn close(self) -> AstroWindow {
        let n = self.count as f64;
        AstroWindow {
            start_time: self.start,
            end_time: self.last + Duration::hours(1),
            score: self.score_sum / n,
            // half-to-even: a mean of 2.5 becomes 2
            avg_cloud_cover: (self.cloud_sum / n).round_ties_even().clamp(0.0, 100.0) as u8,
            moon_illumination: self.moon_sum / n,
            max_target_altitude: self.max_target_alt,
            is_astronomical_dark: self.any_dark,
        }
    }
}

/// Groups hours into maximal runs spaced exactly one hour apart and
/// aggregates each run. No filtering happens here.
pub fn merge_windows(hours: &[HourScore]) -> Vec<AstroWindow> {
    let mut sorted: Vec<&HourScore> = hours.iter().collect();
    sorted.sort_by_key(|h| h.timestamp);

    let mut windows = Vec::new();
    let mut current: Option<OpenRun> = None;

    for hour in sorted {
        current = match current.take() {
            Some(mut run) if run.continues_with(hour) => {
                run.extend(hour);
                Some(run)
            }
            Some(run) => {
                windows.push(run.close());
                Some(OpenRun::begin(hour))
            }
            None => Some(OpenRun::begin(hour)),
        };
    }

    if let Some(run) = current {
        windows.push(run.close());
    }

    windows
}
