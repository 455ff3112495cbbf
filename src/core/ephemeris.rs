//! Low-precision analytic ephemerides for the Sun, Moon and major planets.
//!
//! Sun: Meeus ch. 25 (low accuracy). Moon: Meeus ch. 47 truncated series.
//! Planets: JPL approximate Keplerian elements (1800-2050). All results are
//! geocentric equatorial coordinates of date; altitudes are for a sea-level
//! observer without refraction. Errors stay well under a degree.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

const J2000_JD: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const EARTH_EQUATORIAL_RADIUS_KM: f64 = 6378.14;
const J2000_OBLIQUITY_DEG: f64 = 23.439_28;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equatorial {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planet {
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
    Uranus,
    Neptune,
}

/// A named solar-system body the planner can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    Sun,
    Moon,
    Planet(Planet),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown solar-system body {0:?}")]
pub struct UnknownBody(pub String);

impl FromStr for Body {
    type Err = UnknownBody;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sun" => Ok(Body::Sun),
            "moon" => Ok(Body::Moon),
            "mercury" => Ok(Body::Planet(Planet::Mercury)),
            "venus" => Ok(Body::Planet(Planet::Venus)),
            "mars" => Ok(Body::Planet(Planet::Mars)),
            "jupiter" => Ok(Body::Planet(Planet::Jupiter)),
            "saturn" => Ok(Body::Planet(Planet::Saturn)),
            "uranus" => Ok(Body::Planet(Planet::Uranus)),
            "neptune" => Ok(Body::Planet(Planet::Neptune)),
            _ => Err(UnknownBody(s.to_string())),
        }
    }
}

pub fn julian_date(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD
}

fn julian_century(t: DateTime<Utc>) -> f64 {
    (julian_date(t) - J2000_JD) / 36_525.0
}

fn normalize_degrees(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

/// Greenwich mean sidereal time in degrees.
pub fn gmst_deg(t: DateTime<Utc>) -> f64 {
    let days = julian_date(t) - J2000_JD;
    let c = days / 36_525.0;
    normalize_degrees(280.460_618_37 + 360.985_647_366_29 * days + 0.000_387_933 * c * c)
}

/// Altitude in degrees of an equatorial position of date.
pub fn altitude_deg(pos: Equatorial, observer: Observer, t: DateTime<Utc>) -> f64 {
    let lst = gmst_deg(t) + observer.lon_deg;
    let hour_angle = (lst - pos.ra_deg).to_radians();
    let lat = observer.lat_deg.to_radians();
    let dec = pos.dec_deg.to_radians();
    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos();
    sin_alt.clamp(-1.0, 1.0).asin().to_degrees()
}

/// Great-circle separation in degrees.
pub fn angular_separation_deg(a: Equatorial, b: Equatorial) -> f64 {
    let (ra1, dec1) = (a.ra_deg.to_radians(), a.dec_deg.to_radians());
    let (ra2, dec2) = (b.ra_deg.to_radians(), b.dec_deg.to_radians());
    let cos_sep = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * (ra1 - ra2).cos();
    cos_sep.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Rotates J2000 coordinates to the mean equator of date (Meeus 21.4).
pub fn precess_from_j2000(pos: Equatorial, t: DateTime<Utc>) -> Equatorial {
    let c = julian_century(t);
    let arcsec = |x: f64| (x / 3600.0).to_radians();
    let zeta = arcsec(2306.2181 * c + 0.30188 * c * c + 0.017998 * c * c * c);
    let z = arcsec(2306.2181 * c + 1.09468 * c * c + 0.018203 * c * c * c);
    let theta = arcsec(2004.3109 * c - 0.42665 * c * c - 0.041833 * c * c * c);

    let ra0 = pos.ra_deg.to_radians();
    let dec0 = pos.dec_deg.to_radians();
    let a = dec0.cos() * (ra0 + zeta).sin();
    let b = theta.cos() * dec0.cos() * (ra0 + zeta).cos() - theta.sin() * dec0.sin();
    let cc = theta.sin() * dec0.cos() * (ra0 + zeta).cos() + theta.cos() * dec0.sin();

    Equatorial {
        ra_deg: normalize_degrees((a.atan2(b) + z).to_degrees()),
        dec_deg: cc.clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

fn mean_obliquity_deg(c: f64) -> f64 {
    23.0 + (26.0 + (21.448 - c * (46.815 + c * (0.00059 - c * 0.001813))) / 60.0) / 60.0
}

fn apparent_obliquity_deg(c: f64) -> f64 {
    let omega = 125.04 - 1934.136 * c;
    mean_obliquity_deg(c) + 0.00256 * omega.to_radians().cos()
}

fn ecliptic_to_equatorial(lon_deg: f64, lat_deg: f64, obliquity_deg: f64) -> Equatorial {
    let (lon, lat, eps) = (lon_deg.to_radians(), lat_deg.to_radians(), obliquity_deg.to_radians());
    let ra = (lon.sin() * eps.cos() - lat.tan() * eps.sin()).atan2(lon.cos());
    let dec = (lat.sin() * eps.cos() + lat.cos() * eps.sin() * lon.sin()).asin();
    Equatorial {
        ra_deg: normalize_degrees(ra.to_degrees()),
        dec_deg: dec.to_degrees(),
    }
}

/// Apparent geocentric position of the Sun.
pub fn sun_position(t: DateTime<Utc>) -> Equatorial {
    let c = julian_century(t);
    let l0 = 280.46646 + c * (36_000.76983 + c * 0.0003032);
    let m = (357.52911 + c * (35_999.05029 - c * 0.0001537)).to_radians();
    let center = m.sin() * (1.914602 - c * (0.004817 + c * 0.000014))
        + (2.0 * m).sin() * (0.019993 - c * 0.000101)
        + (3.0 * m).sin() * 0.000289;
    let omega = (125.04 - 1934.136 * c).to_radians();
    let apparent_lon = l0 + center - 0.00569 - 0.00478 * omega.sin();
    ecliptic_to_equatorial(normalize_degrees(apparent_lon), 0.0, apparent_obliquity_deg(c))
}

// (D, M, M', F, sum_l [1e-6 deg], sum_r [1e-3 km])
const MOON_LR: [(f64, f64, f64, f64, f64, f64); 20] = [
    (0.0, 0.0, 1.0, 0.0, 6_288_774.0, -20_905_355.0),
    (2.0, 0.0, -1.0, 0.0, 1_274_027.0, -3_699_111.0),
    (2.0, 0.0, 0.0, 0.0, 658_314.0, -2_955_968.0),
    (0.0, 0.0, 2.0, 0.0, 213_618.0, -569_925.0),
    (0.0, 1.0, 0.0, 0.0, -185_116.0, 48_888.0),
    (0.0, 0.0, 0.0, 2.0, -114_332.0, -3_149.0),
    (2.0, 0.0, -2.0, 0.0, 58_793.0, 246_158.0),
    (2.0, -1.0, -1.0, 0.0, 57_066.0, -152_138.0),
    (2.0, 0.0, 1.0, 0.0, 53_322.0, -170_733.0),
    (2.0, -1.0, 0.0, 0.0, 45_758.0, -204_586.0),
    (0.0, 1.0, -1.0, 0.0, -40_923.0, -129_620.0),
    (1.0, 0.0, 0.0, 0.0, -34_720.0, 108_743.0),
    (0.0, 1.0, 1.0, 0.0, -30_383.0, 104_755.0),
    (2.0, 0.0, 0.0, -2.0, 15_327.0, 10_321.0),
    (0.0, 0.0, 1.0, 2.0, -12_528.0, 0.0),
    (0.0, 0.0, 1.0, -2.0, 10_980.0, 79_661.0),
    (4.0, 0.0, -1.0, 0.0, 10_675.0, -34_782.0),
    (0.0, 0.0, 3.0, 0.0, 10_034.0, -23_210.0),
    (4.0, 0.0, -2.0, 0.0, 8_548.0, -21_636.0),
    (2.0, 1.0, -1.0, 0.0, -7_888.0, 24_208.0),
];

// (D, M, M', F, sum_b [1e-6 deg])
const MOON_B: [(f64, f64, f64, f64, f64); 20] = [
    (0.0, 0.0, 0.0, 1.0, 5_128_122.0),
    (0.0, 0.0, 1.0, 1.0, 280_602.0),
    (0.0, 0.0, 1.0, -1.0, 277_693.0),
    (2.0, 0.0, 0.0, -1.0, 173_237.0),
    (2.0, 0.0, -1.0, 1.0, 55_413.0),
    (2.0, 0.0, -1.0, -1.0, 46_271.0),
    (2.0, 0.0, 0.0, 1.0, 32_573.0),
    (0.0, 0.0, 2.0, 1.0, 17_198.0),
    (2.0, 0.0, 1.0, -1.0, 9_266.0),
    (0.0, 0.0, 2.0, -1.0, 8_822.0),
    (2.0, -1.0, 0.0, -1.0, 8_216.0),
    (2.0, 0.0, -2.0, -1.0, 4_324.0),
    (2.0, 0.0, 1.0, 1.0, 4_200.0),
    (2.0, 1.0, 0.0, -1.0, -3_359.0),
    (2.0, -1.0, -1.0, 1.0, 2_463.0),
    (2.0, -1.0, 0.0, 1.0, 2_211.0),
    (2.0, -1.0, -1.0, -1.0, 2_065.0),
    (0.0, 1.0, -1.0, -1.0, -1_870.0),
    (4.0, 0.0, -1.0, -1.0, 1_828.0),
    (0.0, 1.0, 0.0, 1.0, -1_794.0),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoonPosition {
    pub equatorial: Equatorial,
    pub distance_km: f64,
}

/// Geocentric position of the Moon.
pub fn moon_position(t: DateTime<Utc>) -> MoonPosition {
    let c = julian_century(t);
    let (c2, c3, c4) = (c * c, c * c * c, c * c * c * c);

    let lp = normalize_degrees(218.316_447_7 + 481_267.881_234_21 * c - 0.001_578_6 * c2 + c3 / 538_841.0 - c4 / 65_194_000.0);
    let d = normalize_degrees(297.850_192_1 + 445_267.111_403_4 * c - 0.001_881_9 * c2 + c3 / 545_868.0 - c4 / 113_065_000.0);
    let m = normalize_degrees(357.529_109_2 + 35_999.050_290_9 * c - 0.000_153_6 * c2 + c3 / 24_490_000.0);
    let mp = normalize_degrees(134.963_396_4 + 477_198.867_505_5 * c + 0.008_741_4 * c2 + c3 / 69_699.0 - c4 / 14_712_000.0);
    let f = normalize_degrees(93.272_095_0 + 483_202.017_523_3 * c - 0.003_653_9 * c2 - c3 / 3_526_000.0 + c4 / 863_310_000.0);

    let e = 1.0 - 0.002_516 * c - 0.000_007_4 * c2;
    let e_factor = |tm: f64| match tm.abs() as i32 {
        1 => e,
        2 => e * e,
        _ => 1.0,
    };

    let (mut sum_l, mut sum_r, mut sum_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for &(td, tm, tmp, tf, cl, cr) in &MOON_LR {
        let arg = (td * d + tm * m + tmp * mp + tf * f).to_radians();
        sum_l += cl * e_factor(tm) * arg.sin();
        sum_r += cr * e_factor(tm) * arg.cos();
    }
    for &(td, tm, tmp, tf, cb) in &MOON_B {
        let arg = (td * d + tm * m + tmp * mp + tf * f).to_radians();
        sum_b += cb * e_factor(tm) * arg.sin();
    }

    let a1 = (119.75 + 131.849 * c).to_radians();
    let a2 = (53.09 + 479_264.290 * c).to_radians();
    let a3 = (313.45 + 481_266.484 * c).to_radians();
    let (lp_r, mp_r, f_r) = (lp.to_radians(), mp.to_radians(), f.to_radians());

    sum_l += 3958.0 * a1.sin() + 1962.0 * (lp_r - f_r).sin() + 318.0 * a2.sin();
    sum_b += -2235.0 * lp_r.sin()
        + 382.0 * a3.sin()
        + 175.0 * (a1 - f_r).sin()
        + 175.0 * (a1 + f_r).sin()
        + 127.0 * (lp_r - mp_r).sin()
        - 115.0 * (lp_r + mp_r).sin();

    let lon = normalize_degrees(lp + sum_l / 1_000_000.0);
    let lat = sum_b / 1_000_000.0;

    MoonPosition {
        equatorial: ecliptic_to_equatorial(lon, lat, apparent_obliquity_deg(c)),
        distance_km: 385_000.56 + sum_r / 1000.0,
    }
}

/// Topocentric lunar altitude: geocentric altitude less horizontal parallax.
pub fn moon_altitude_deg(moon: &MoonPosition, observer: Observer, t: DateTime<Utc>) -> f64 {
    let geocentric = altitude_deg(moon.equatorial, observer, t);
    let parallax = (EARTH_EQUATORIAL_RADIUS_KM / moon.distance_km).asin().to_degrees();
    geocentric - parallax * geocentric.to_radians().cos()
}

struct Orbit {
    a: [f64; 2],
    e: [f64; 2],
    incl: [f64; 2],
    mean_lon: [f64; 2],
    peri_lon: [f64; 2],
    node_lon: [f64; 2],
}

// J2000 value and rate per century.
const EARTH_MOON_BARYCENTER: Orbit = Orbit {
    a: [1.000_002_61, 0.000_005_62],
    e: [0.016_711_23, -0.000_043_92],
    incl: [-0.000_015_31, -0.012_946_68],
    mean_lon: [100.464_571_66, 35_999.372_449_81],
    peri_lon: [102.937_681_93, 0.323_273_64],
    node_lon: [0.0, 0.0],
};

fn planet_orbit(planet: Planet) -> Orbit {
    match planet {
        Planet::Mercury => Orbit {
            a: [0.387_099_27, 0.000_000_37],
            e: [0.205_635_93, 0.000_019_06],
            incl: [7.004_979_02, -0.005_947_49],
            mean_lon: [252.250_323_50, 149_472.674_111_75],
            peri_lon: [77.457_796_28, 0.160_476_89],
            node_lon: [48.330_765_93, -0.125_340_81],
        },
        Planet::Venus => Orbit {
            a: [0.723_335_66, 0.000_003_90],
            e: [0.006_776_72, -0.000_041_07],
            incl: [3.394_676_05, -0.000_788_90],
            mean_lon: [181.979_099_50, 58_517.815_387_29],
            peri_lon: [131.602_467_18, 0.002_683_29],
            node_lon: [76.679_842_55, -0.277_694_18],
        },
        Planet::Mars => Orbit {
            a: [1.523_710_34, 0.000_018_47],
            e: [0.093_394_10, 0.000_078_82],
            incl: [1.849_691_42, -0.008_131_31],
            mean_lon: [-4.553_432_05, 19_140.302_684_99],
            peri_lon: [-23.943_629_59, 0.444_410_88],
            node_lon: [49.559_538_91, -0.292_573_43],
        },
        Planet::Jupiter => Orbit {
            a: [5.202_887_00, -0.000_116_07],
            e: [0.048_386_24, -0.000_132_53],
            incl: [1.304_396_95, -0.001_837_14],
            mean_lon: [34.396_440_51, 3_034.746_127_75],
            peri_lon: [14.728_479_83, 0.212_526_68],
            node_lon: [100.473_909_09, 0.204_691_06],
        },
        Planet::Saturn => Orbit {
            a: [9.536_675_94, -0.001_250_60],
            e: [0.053_861_79, -0.000_509_91],
            incl: [2.485_991_87, 0.001_936_09],
            mean_lon: [49.954_244_23, 1_222.493_622_01],
            peri_lon: [92.598_878_31, -0.418_972_16],
            node_lon: [113.662_424_48, -0.288_677_94],
        },
        Planet::Uranus => Orbit {
            a: [19.189_164_64, -0.001_961_76],
            e: [0.047_257_44, -0.000_043_97],
            incl: [0.772_637_83, -0.002_429_39],
            mean_lon: [313.238_104_51, 428.482_027_85],
            peri_lon: [170.954_276_30, 0.408_052_81],
            node_lon: [74.016_925_03, 0.042_405_89],
        },
        Planet::Neptune => Orbit {
            a: [30.069_922_76, 0.000_262_91],
            e: [0.008_590_48, 0.000_051_05],
            incl: [1.770_043_47, 0.000_353_72],
            mean_lon: [-55.120_029_69, 218.459_453_25],
            peri_lon: [44.964_762_27, -0.322_414_64],
            node_lon: [131.784_225_74, -0.005_086_64],
        },
    }
}

/// Heliocentric J2000 ecliptic rectangular coordinates in AU.
fn heliocentric_ecliptic(orbit: &Orbit, c: f64) -> [f64; 3] {
    let at = |el: [f64; 2]| el[0] + el[1] * c;
    let a = at(orbit.a);
    let e = at(orbit.e);
    let incl = at(orbit.incl).to_radians();
    let node = at(orbit.node_lon);
    let peri = at(orbit.peri_lon);
    let arg_peri = (peri - node).to_radians();
    let node = node.to_radians();

    let mean_anomaly = (normalize_degrees(at(orbit.mean_lon) - peri + 180.0) - 180.0).to_radians();
    let ecc_anomaly = solve_kepler(mean_anomaly, e);

    let xp = a * (ecc_anomaly.cos() - e);
    let yp = a * (1.0 - e * e).sqrt() * ecc_anomaly.sin();

    let (sw, cw) = arg_peri.sin_cos();
    let (so, co) = node.sin_cos();
    let (si, ci) = incl.sin_cos();
    [
        (cw * co - sw * so * ci) * xp + (-sw * co - cw * so * ci) * yp,
        (cw * so + sw * co * ci) * xp + (-sw * so + cw * co * ci) * yp,
        (sw * si) * xp + (cw * si) * yp,
    ]
}

fn solve_kepler(mean_anomaly: f64, e: f64) -> f64 {
    let mut ecc = mean_anomaly + e * mean_anomaly.sin();
    for _ in 0..12 {
        let delta = (mean_anomaly - (ecc - e * ecc.sin())) / (1.0 - e * ecc.cos());
        ecc += delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }
    ecc
}

/// Geocentric position of a planet, precessed to date.
pub fn planet_position(planet: Planet, t: DateTime<Utc>) -> Equatorial {
    let orbit = planet_orbit(planet);
    let c = julian_century(t);
    let planet = heliocentric_ecliptic(&orbit, c);
    let earth = heliocentric_ecliptic(&EARTH_MOON_BARYCENTER, c);
    let (x, y, z) = (planet[0] - earth[0], planet[1] - earth[1], planet[2] - earth[2]);

    let eps = J2000_OBLIQUITY_DEG.to_radians();
    let xq = x;
    let yq = y * eps.cos() - z * eps.sin();
    let zq = y * eps.sin() + z * eps.cos();

    let j2000 = Equatorial {
        ra_deg: normalize_degrees(yq.atan2(xq).to_degrees()),
        dec_deg: zq.atan2((xq * xq + yq * yq).sqrt()).to_degrees(),
    };
    precess_from_j2000(j2000, t)
}

/// Altitude of any supported body, topocentric for the Moon.
pub fn body_altitude_deg(body: Body, observer: Observer, t: DateTime<Utc>) -> f64 {
    match body {
        Body::Sun => altitude_deg(sun_position(t), observer, t),
        Body::Moon => moon_altitude_deg(&moon_position(t), observer, t),
        Body::Planet(planet) => altitude_deg(planet_position(planet, t), observer, t),
    }
}
