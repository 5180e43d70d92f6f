//! Orbital propagation collaborator
//!
//! The feed never does orbital mechanics itself: it asks a [`Propagator`] for an inertial
//! position at an instant and converts frames through it. [`Sgp4Propagator`] is the
//! production implementation backed by the `sgp4` crate.

pub mod geo;

use chrono::{DateTime, Utc};

use crate::catalog::ElementRecord;
use crate::error::{Error, Result};

pub use geo::{EcfPosition, EciPosition, Geodetic, LookAngles};

/// Orbital propagation and frame conversion
///
/// Only `propagate` and `sidereal_time` are required; the frame conversions default to
/// the WGS-84 routines in [`geo`].
pub trait Propagator: Send + Sync {
    /// Inertial position of `record` at `at`
    fn propagate(&self, record: &ElementRecord, at: DateTime<Utc>) -> Result<EciPosition>;

    /// Sidereal angle (radians) used to rotate between inertial and earth-fixed frames
    fn sidereal_time(&self, at: DateTime<Utc>) -> f64;

    fn eci_to_geodetic(&self, eci: &EciPosition, sidereal_time: f64) -> Geodetic {
        geo::eci_to_geodetic(eci, sidereal_time)
    }

    fn eci_to_ecf(&self, eci: &EciPosition, sidereal_time: f64) -> EcfPosition {
        geo::eci_to_ecf(eci, sidereal_time)
    }

    fn look_angles(&self, observer: &Geodetic, ecf: &EcfPosition) -> Result<LookAngles> {
        geo::look_angles(observer, ecf)
    }

    /// Get propagator name for logging
    fn name(&self) -> &str;
}

/// SGP4/SDP4 propagation of two-line element sets
#[derive(Debug, Default, Clone, Copy)]
pub struct Sgp4Propagator;

impl Sgp4Propagator {
    pub fn new() -> Self {
        Self
    }
}

impl Propagator for Sgp4Propagator {
    fn propagate(&self, record: &ElementRecord, at: DateTime<Utc>) -> Result<EciPosition> {
        let minutes_since_epoch = record.minutes_since_epoch(at);
        let prediction = record
            .constants()
            .propagate(sgp4::MinutesSinceEpoch(minutes_since_epoch))
            .map_err(|e| Error::propagation(record.name(), e.to_string()))?;

        let [x, y, z] = prediction.position;
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            return Err(Error::propagation(record.name(), "non-finite position"));
        }
        Ok(EciPosition { x, y, z })
    }

    fn sidereal_time(&self, at: DateTime<Utc>) -> f64 {
        geo::greenwich_mean_sidereal_time(at)
    }

    fn name(&self) -> &str {
        "sgp4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parser::parse_element_sets;

    const ISS: &str = "ISS (ZARYA)
1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927
2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537
";

    #[test]
    fn test_propagate_at_epoch_is_low_earth_orbit() {
        let catalog = parse_element_sets(ISS);
        let record = catalog.get("ISS (ZARYA)").unwrap();
        let propagator = Sgp4Propagator::new();

        let eci = propagator.propagate(record, record.epoch()).unwrap();
        let radius = (eci.x * eci.x + eci.y * eci.y + eci.z * eci.z).sqrt();
        assert!(radius > 6600.0 && radius < 6800.0, "radius {}", radius);

        let gmst = propagator.sidereal_time(record.epoch());
        let geodetic = propagator.eci_to_geodetic(&eci, gmst);
        assert!(geodetic.latitude.to_degrees().abs() <= 52.0);
        assert!(geodetic.height > 250.0 && geodetic.height < 450.0);
    }
}
