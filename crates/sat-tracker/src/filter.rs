//! Per-session visibility filter
//!
//! Rules are tried in order and the first applicable one decides:
//! 1. identity: the tracked satellite is always sent, flagged as tracked
//! 2. viewport: when the session has a viewport, containment in the expanded viewport
//! 3. elevation: without a viewport but with an observer, elevation above the minimum
//! 4. otherwise the satellite is hidden
//!
//! Viewport matches are not additionally gated by elevation.

use crate::config::FilterConfig;
use crate::error::Result;
use crate::propagation::{Geodetic, LookAngles};
use crate::types::ViewportBounds;

/// Outcome for one satellite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The tracked satellite
    Tracked,
    /// Included in the "others" set
    Visible,
    Hidden,
}

/// Wrap degrees into (-180, 180]
fn wrap_longitude(mut degrees: f64) -> f64 {
    while degrees > 180.0 {
        degrees -= 360.0;
    }
    while degrees <= -180.0 {
        degrees += 360.0;
    }
    degrees
}

/// Viewport expanded around its centre, ready for containment tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportWindow {
    center_lat: f64,
    center_lng: f64,
    half_lat: f64,
    half_lng: f64,
    min_lat: f64,
    max_lat: f64,
}

impl ViewportWindow {
    pub fn new(bounds: &ViewportBounds, expansion_factor: f64) -> Self {
        let mut lng_span = bounds.north_east.lng - bounds.south_west.lng;
        if lng_span < 0.0 {
            // Crosses the antimeridian
            lng_span += 360.0;
        }
        let lat_span = bounds.north_east.lat - bounds.south_west.lat;

        let center_lng = wrap_longitude(bounds.south_west.lng + lng_span / 2.0);
        let center_lat = (bounds.north_east.lat + bounds.south_west.lat) / 2.0;

        let half_lat = (lat_span / 2.0) * expansion_factor;
        let half_lng = (lng_span / 2.0) * expansion_factor;

        Self {
            center_lat,
            center_lng,
            half_lat,
            half_lng,
            min_lat: (center_lat - half_lat).max(-90.0),
            max_lat: (center_lat + half_lat).min(90.0),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_lat, self.center_lng)
    }

    /// Whether a point (degrees) falls inside the expanded window
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        let in_lat = latitude >= self.min_lat && latitude <= self.max_lat;
        let delta_lng = wrap_longitude(longitude - self.center_lng);
        in_lat && delta_lng.abs() <= self.half_lng
    }
}

/// Observer-elevation threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationGate {
    observer: Geodetic,
    min_elevation_deg: f64,
}

impl ElevationGate {
    pub fn new(observer: Geodetic, min_elevation_deg: f64) -> Self {
        Self {
            observer,
            min_elevation_deg,
        }
    }

    pub fn observer(&self) -> &Geodetic {
        &self.observer
    }

    /// Failed look-angle computations exclude the satellite
    pub fn admits(&self, look_angles: Result<LookAngles>) -> bool {
        match look_angles {
            Ok(angles) => angles.elevation.to_degrees() > self.min_elevation_deg,
            Err(_) => false,
        }
    }
}

/// Session-level rule applied to everything that is not the tracked satellite
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterPolicy {
    Viewport(ViewportWindow),
    Elevation(ElevationGate),
    None,
}

impl FilterPolicy {
    pub fn select(
        viewport: Option<&ViewportBounds>,
        observer: Option<&Geodetic>,
        config: &FilterConfig,
    ) -> Self {
        match (viewport, observer) {
            (Some(bounds), _) => {
                FilterPolicy::Viewport(ViewportWindow::new(bounds, config.viewport_expansion_factor))
            }
            (None, Some(observer)) => {
                FilterPolicy::Elevation(ElevationGate::new(*observer, config.min_elevation_deg))
            }
            (None, None) => FilterPolicy::None,
        }
    }
}

/// Visibility decision for one session in one cycle
#[derive(Debug, Clone)]
pub struct VisibilityFilter<'a> {
    tracked: Option<&'a str>,
    policy: FilterPolicy,
}

impl<'a> VisibilityFilter<'a> {
    pub fn new(tracked: Option<&'a str>, policy: FilterPolicy) -> Self {
        Self { tracked, policy }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Decide for a satellite at (`latitude`, `longitude`) degrees
    ///
    /// `look_angles` is only invoked under the elevation policy.
    pub fn evaluate<F>(&self, name: &str, latitude: f64, longitude: f64, look_angles: F) -> Verdict
    where
        F: FnOnce(&Geodetic) -> Result<LookAngles>,
    {
        if self.tracked == Some(name) {
            return Verdict::Tracked;
        }

        let visible = match &self.policy {
            FilterPolicy::Viewport(window) => window.contains(latitude, longitude),
            FilterPolicy::Elevation(gate) => gate.admits(look_angles(gate.observer())),
            FilterPolicy::None => false,
        };

        if visible {
            Verdict::Visible
        } else {
            Verdict::Hidden
        }
    }
}
