//! Per-connection sessions
//!
//! Each connection gets a [`SessionRunner`] task that owns its viewport and timer, and a
//! cloneable [`SessionHandle`] the connection uses to feed it events. Live sessions are
//! tracked by the [`SessionRegistry`], which also drains them on shutdown.

mod registry;
mod runner;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::SatelliteUpdate;

pub use registry::{SessionRegistry, ShutdownOutcome};
pub use runner::{SessionCommand, SessionHandle, SessionRunner, SessionState, SessionStats};

/// Outbound side of a push channel
#[async_trait]
pub trait PushSink: Send + 'static {
    /// Deliver one snapshot; an error ends the session
    async fn push(&mut self, update: &SatelliteUpdate) -> Result<()>;

    /// Close the channel once the session has terminated
    async fn close(&mut self) {}
}
