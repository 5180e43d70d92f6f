//! Snapshot payload pushed to clients every cycle

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::facilities::FacilityLocation;
use crate::markers::ObserverLocation;

/// The satellite the terminal is currently connected to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedSatellite {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

/// Any other satellite that passed the visibility filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatellitePosition {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// The active ground facility
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityMarker {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<FacilityLocation> for FacilityMarker {
    fn from(location: FacilityLocation) -> Self {
        Self {
            id: location.code,
            latitude: location.latitude,
            longitude: location.longitude,
        }
    }
}

/// One combined `satelliteUpdate` snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteUpdate {
    pub connected_satellite: Option<TrackedSatellite>,
    pub other_satellites: Vec<SatellitePosition>,
    pub current_pop: Option<FacilityMarker>,
    pub observer_location: Option<ObserverLocation>,
    pub timestamp: DateTime<Utc>,
}

impl SatelliteUpdate {
    /// Number of satellites carried, which drives the next delay
    pub fn satellite_count(&self) -> usize {
        self.other_satellites.len() + usize::from(self.connected_satellite.is_some())
    }

    /// Whether there is anything worth sending
    pub fn has_content(&self) -> bool {
        self.connected_satellite.is_some()
            || !self.other_satellites.is_empty()
            || self.current_pop.is_some()
    }
}
