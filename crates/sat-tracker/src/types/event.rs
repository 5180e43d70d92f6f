//! Push-channel event envelopes
//!
//! Every websocket text frame is `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::update::SatelliteUpdate;
use super::viewport::ViewportBounds;

pub const SATELLITE_UPDATE: &str = "satelliteUpdate";
pub const VIEWPORT_UPDATE: &str = "viewportUpdate";

/// Server to client
#[derive(Debug, Serialize)]
pub struct ServerEvent<'a> {
    pub event: &'static str,
    pub data: &'a SatelliteUpdate,
}

impl<'a> ServerEvent<'a> {
    pub fn satellite_update(update: &'a SatelliteUpdate) -> Self {
        Self {
            event: SATELLITE_UPDATE,
            data: update,
        }
    }
}

/// Raw client frame before the payload is validated
#[derive(Debug, Deserialize)]
struct RawClientEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ViewportUpdate(ViewportBounds),
    Unknown(String),
}

impl ClientEvent {
    /// Decode a text frame
    ///
    /// Frames that are not envelopes, and `viewportUpdate` frames whose payload fails
    /// validation, are `Error::Malformed`.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawClientEvent = serde_json::from_str(text)
            .map_err(|e| Error::malformed(format!("not an event envelope: {}", e)))?;
        match raw.event.as_str() {
            VIEWPORT_UPDATE => ViewportBounds::from_payload(raw.data.clone())
                .map(ClientEvent::ViewportUpdate)
                .ok_or_else(|| Error::malformed(format!("invalid viewport data: {}", raw.data))),
            _ => Ok(ClientEvent::Unknown(raw.event)),
        }
    }
}
