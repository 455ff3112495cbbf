use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::ephemeris::{self, Body, Equatorial, Observer};
use crate::core::model::{Location, Target, TargetType};

/// Galactic centre (J2000), used as the Milky Way core's position.
pub const GALACTIC_CENTER: Equatorial = Equatorial { ra_deg: 266.4168, dec_deg: -29.0078 };

/// Target altitude, or the reason there is none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetAltitude {
    Resolved(f64),
    /// Planet name the ephemeris does not know, or a DSO without coordinates.
    Unresolved,
}

impl TargetAltitude {
    pub fn degrees_or_zero(self) -> f64 {
        match self {
            TargetAltitude::Resolved(deg) => deg,
            TargetAltitude::Unresolved => 0.0,
        }
    }
}

/// Sky state for one location and instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyGeometry {
    pub sun_altitude_deg: f64,
    pub moon_altitude_deg: f64,
    /// 0 = new, 1 = full; (1 - cos elongation) / 2.
    pub moon_illumination: f64,
    pub target_altitude: TargetAltitude,
}

/// Pure function of its inputs; callers may evaluate hours in any order.
pub fn compute(location: &Location, target: &Target, instant: DateTime<Utc>) -> SkyGeometry {
    let observer = Observer { lat_deg: location.latitude, lon_deg: location.longitude };

    let sun = ephemeris::sun_position(instant);
    let moon = ephemeris::moon_position(instant);
    let sun_altitude_deg = ephemeris::altitude_deg(sun, observer, instant);
    let moon_altitude_deg = ephemeris::moon_altitude_deg(&moon, observer, instant);
    let moon_illumination = illumination_from_elongation(ephemeris::angular_separation_deg(sun, moon.equatorial));

    let target_altitude = match target.target_type {
        TargetType::Dso => match (target.right_ascension, target.declination) {
            (Some(ra_deg), Some(dec_deg)) => {
                let pos = ephemeris::precess_from_j2000(Equatorial { ra_deg, dec_deg }, instant);
                TargetAltitude::Resolved(ephemeris::altitude_deg(pos, observer, instant))
            }
            _ => TargetAltitude::Unresolved,
        },
        TargetType::MilkyWay => {
            let pos = ephemeris::precess_from_j2000(GALACTIC_CENTER, instant);
            TargetAltitude::Resolved(ephemeris::altitude_deg(pos, observer, instant))
        }
        TargetType::Moon => TargetAltitude::Resolved(moon_altitude_deg),
        TargetType::Planet => match target.name.parse::<Body>() {
            Ok(Body::Moon) => TargetAltitude::Resolved(moon_altitude_deg),
            Ok(body) => TargetAltitude::Resolved(ephemeris::body_altitude_deg(body, observer, instant)),
            Err(e) => {
                debug!(error = %e, target_id = target.id, "Planet lookup failed");
                TargetAltitude::Unresolved
            }
        },
    };

    SkyGeometry { sun_altitude_deg, moon_altitude_deg, moon_illumination, target_altitude }
}

fn illumination_from_elongation(elongation_deg: f64) -> f64 {
    ((1.0 - elongation_deg.to_radians().cos()) / 2.0).clamp(0.0, 1.0)
}
