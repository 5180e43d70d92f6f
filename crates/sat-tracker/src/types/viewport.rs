//! Client map viewport

use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Map bounds as reported by the client
///
/// `north_east.lng < south_west.lng` means the view crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    #[serde(rename = "_southWest")]
    pub south_west: LatLng,
    #[serde(rename = "_northEast")]
    pub north_east: LatLng,
}

impl ViewportBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Decode a client payload, rejecting missing fields, wrong types and non-finite values
    pub fn from_payload(payload: serde_json::Value) -> Option<Self> {
        let bounds: Self = serde_json::from_value(payload).ok()?;
        let finite = [
            bounds.south_west.lat,
            bounds.south_west.lng,
            bounds.north_east.lat,
            bounds.north_east.lng,
        ]
        .iter()
        .all(|v| v.is_finite());
        finite.then_some(bounds)
    }
}
