//! sat-tracker: live satellite position feed
//!
//! Propagates a catalog of two-line element sets and pushes per-client snapshots over a
//! websocket. Each client sees the satellite its terminal is connected to, plus whatever
//! falls inside its map viewport (or above the observer's horizon when it has none), at a
//! cadence that slows down as the payload grows.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod facilities;
pub mod filter;
pub mod markers;
pub mod propagation;
pub mod server;
pub mod session;
pub mod types;

pub use config::TrackerConfig;
pub use engine::{CycleOutcome, FeedEngine};
pub use error::{Error, Result};
pub use server::TrackerServer;
pub use session::ShutdownOutcome;
pub use types::{ClientEvent, SatelliteUpdate, ViewportBounds};
