//! Reference-frame conversions between inertial, earth-fixed and geodetic coordinates.
//!
//! Positions are in kilometres, angles in radians. The ellipsoid is WGS-84.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};

pub const EARTH_EQUATORIAL_RADIUS_KM: f64 = 6378.137;
pub const EARTH_POLAR_RADIUS_KM: f64 = 6356.7523142;

const SECONDS_PER_DAY: f64 = 86400.0;
const DAYS_PER_JULIAN_CENTURY: f64 = 36525.0;
const GMST_BASE_DEG: f64 = 280.46061837;
const GMST_ROTATION_PER_DAY: f64 = 360.98564736629;
const GMST_CORRECTION: f64 = 0.000387933;
const GEODETIC_ITERATIONS: usize = 20;

/// Earth-centred inertial position (TEME as produced by SGP4)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EciPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Earth-centred earth-fixed position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcfPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Geodetic coordinates (radians, height in km)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geodetic {
    pub latitude: f64,
    pub longitude: f64,
    pub height: f64,
}

/// Observer-relative direction to a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookAngles {
    pub azimuth: f64,
    pub elevation: f64,
    pub range_km: f64,
}

fn first_eccentricity_squared() -> f64 {
    let f = (EARTH_EQUATORIAL_RADIUS_KM - EARTH_POLAR_RADIUS_KM) / EARTH_EQUATORIAL_RADIUS_KM;
    2.0 * f - f * f
}

/// Greenwich mean sidereal time in radians, normalised to [0, 2π)
pub fn greenwich_mean_sidereal_time(at: DateTime<Utc>) -> f64 {
    let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).single().unwrap_or_default();
    let days_since_j2000 = (at - j2000).num_milliseconds() as f64 / (1000.0 * SECONDS_PER_DAY);
    let centuries = days_since_j2000 / DAYS_PER_JULIAN_CENTURY;
    let gmst_degrees = GMST_BASE_DEG
        + GMST_ROTATION_PER_DAY * days_since_j2000
        + GMST_CORRECTION * centuries * centuries
        - centuries * centuries * centuries / 38710000.0;
    gmst_degrees.rem_euclid(360.0).to_radians()
}

/// Wrap an angle in radians into (-π, π]
fn wrap_pi(mut angle: f64) -> f64 {
    while angle <= -PI {
        angle += 2.0 * PI;
    }
    while angle > PI {
        angle -= 2.0 * PI;
    }
    angle
}

pub fn eci_to_geodetic(eci: &EciPosition, gmst: f64) -> Geodetic {
    let a = EARTH_EQUATORIAL_RADIUS_KM;
    let e2 = first_eccentricity_squared();
    let r = (eci.x * eci.x + eci.y * eci.y).sqrt();

    let longitude = wrap_pi(eci.y.atan2(eci.x) - gmst);

    let mut latitude = eci.z.atan2(r);
    let mut c = 1.0;
    for _ in 0..GEODETIC_ITERATIONS {
        let sin_lat = latitude.sin();
        c = 1.0 / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        latitude = (eci.z + a * c * e2 * sin_lat).atan2(r);
    }
    let height = r / latitude.cos() - a * c;

    Geodetic {
        latitude,
        longitude,
        height,
    }
}

pub fn eci_to_ecf(eci: &EciPosition, gmst: f64) -> EcfPosition {
    let (sin_g, cos_g) = gmst.sin_cos();
    EcfPosition {
        x: eci.x * cos_g + eci.y * sin_g,
        y: -eci.x * sin_g + eci.y * cos_g,
        z: eci.z,
    }
}

pub fn geodetic_to_ecf(geodetic: &Geodetic) -> EcfPosition {
    let a = EARTH_EQUATORIAL_RADIUS_KM;
    let e2 = first_eccentricity_squared();
    let (sin_lat, cos_lat) = geodetic.latitude.sin_cos();
    let (sin_lon, cos_lon) = geodetic.longitude.sin_cos();
    let normal = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    EcfPosition {
        x: (normal + geodetic.height) * cos_lat * cos_lon,
        y: (normal + geodetic.height) * cos_lat * sin_lon,
        z: (normal * (1.0 - e2) + geodetic.height) * sin_lat,
    }
}

/// Look angles from `observer` to a target at `target` (earth-fixed)
pub fn look_angles(observer: &Geodetic, target: &EcfPosition) -> Result<LookAngles> {
    let origin = geodetic_to_ecf(observer);
    let rx = target.x - origin.x;
    let ry = target.y - origin.y;
    let rz = target.z - origin.z;

    let (sin_lat, cos_lat) = observer.latitude.sin_cos();
    let (sin_lon, cos_lon) = observer.longitude.sin_cos();

    // South-east-zenith topocentric frame
    let south = sin_lat * cos_lon * rx + sin_lat * sin_lon * ry - cos_lat * rz;
    let east = -sin_lon * rx + cos_lon * ry;
    let zenith = cos_lat * cos_lon * rx + cos_lat * sin_lon * ry + sin_lat * rz;

    let range_km = (south * south + east * east + zenith * zenith).sqrt();
    if !range_km.is_finite() || range_km < 1e-9 {
        return Err(Error::internal(format!(
            "degenerate look angle geometry (range {} km)",
            range_km
        )));
    }

    Ok(LookAngles {
        azimuth: (-east).atan2(south) + PI,
        elevation: (zenith / range_km).asin(),
        range_km,
    })
}
