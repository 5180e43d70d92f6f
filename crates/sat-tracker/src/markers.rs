//! Externally maintained marker files and the observer location descriptor
//!
//! Markers are single-line text files rewritten by another process: the name of the
//! satellite the terminal is connected to and the code of the active facility (POP).
//! They are re-read every cycle; absence simply means "none".

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::DataConfig;
use crate::propagation::Geodetic;

/// Reads the per-cycle marker files
#[derive(Debug, Clone)]
pub struct MarkerReader {
    satellite_marker: PathBuf,
    facility_marker: PathBuf,
}

impl MarkerReader {
    pub fn new(satellite_marker: impl Into<PathBuf>, facility_marker: impl Into<PathBuf>) -> Self {
        Self {
            satellite_marker: satellite_marker.into(),
            facility_marker: facility_marker.into(),
        }
    }

    pub fn from_config(data: &DataConfig) -> Self {
        Self::new(&data.satellite_marker, &data.facility_marker)
    }

    /// Name of the currently connected satellite, if any
    pub fn read_tracked_satellite_name(&self) -> Option<String> {
        read_marker(&self.satellite_marker)
    }

    /// Code of the currently active facility, if any
    pub fn read_active_facility_code(&self) -> Option<String> {
        read_marker(&self.facility_marker)
    }
}

fn read_marker(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            tracing::error!("Error reading marker file {}: {}", path.display(), e);
            None
        }
    }
}

/// Observer location as written in the descriptor (degrees, altitude in km)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Observer location plus its radian form for look-angle computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverState {
    location: ObserverLocation,
    coordinates: Geodetic,
}

impl ObserverState {
    pub fn from_location(location: ObserverLocation) -> Self {
        Self {
            location,
            coordinates: Geodetic {
                latitude: location.latitude.to_radians(),
                longitude: location.longitude.to_radians(),
                height: location.altitude,
            },
        }
    }

    /// Location in degrees, as echoed to clients
    pub fn location(&self) -> &ObserverLocation {
        &self.location
    }

    /// Geodetic coordinates in radians
    pub fn coordinates(&self) -> &Geodetic {
        &self.coordinates
    }
}

#[derive(Deserialize)]
struct RawObserverLocation {
    latitude: serde_json::Value,
    longitude: serde_json::Value,
    altitude: serde_json::Value,
}

/// Load the observer descriptor once at startup
///
/// A missing or invalid descriptor is logged and yields `None`; elevation filtering is then
/// unavailable for the lifetime of the process.
pub fn load_observer_location(path: &Path) -> Option<ObserverState> {
    tracing::info!("Attempting to load observer location from {}", path.display());

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(
                "Observer location file not found: {}. Cannot filter satellites by elevation.",
                path.display()
            );
            return None;
        }
        Err(e) => {
            tracing::error!("Error reading observer location file: {}", e);
            return None;
        }
    };

    match parse_observer_location(&contents) {
        Some(location) => {
            tracing::info!(
                "Observer location loaded: lat {:.4}, lon {:.4}, alt {:.3} km",
                location.latitude,
                location.longitude,
                location.altitude
            );
            Some(ObserverState::from_location(location))
        }
        None => {
            tracing::error!("Invalid format in observer location file {}", path.display());
            None
        }
    }
}

/// All three fields must be JSON numbers
fn parse_observer_location(contents: &str) -> Option<ObserverLocation> {
    let raw: RawObserverLocation = serde_json::from_str(contents).ok()?;
    Some(ObserverLocation {
        latitude: raw.latitude.as_f64()?,
        longitude: raw.longitude.as_f64()?,
        altitude: raw.altitude.as_f64()?,
    })
}
