//! Wire types exchanged with push-channel clients

pub mod event;
pub mod update;
pub mod viewport;

pub use event::{ClientEvent, ServerEvent};
pub use update::{FacilityMarker, SatellitePosition, SatelliteUpdate, TrackedSatellite};
pub use viewport::{LatLng, ViewportBounds};
