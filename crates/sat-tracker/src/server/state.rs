//! Application state for the feed server

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::engine::FeedEngine;
use crate::error::Result;
use crate::facilities::{FacilityCache, FacilitySource, HttpFacilitySource};
use crate::markers::load_observer_location;
use crate::propagation::Sgp4Propagator;
use crate::session::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: TrackerConfig,
    /// Catalog, facilities, observer and propagation
    engine: Arc<FeedEngine>,
    /// Live push sessions
    sessions: Arc<SessionRegistry>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Create new application state
    ///
    /// Loads the observer descriptor and starts the facility fetch in the background. Neither
    /// is fatal: without them elevation filtering or facility markers are simply unavailable.
    pub async fn new(config: TrackerConfig) -> Result<Self> {
        tracing::info!("Initializing feed state (data under {})...", config.data.tle_dir.display());

        let source: Arc<dyn FacilitySource> = Arc::new(HttpFacilitySource::new(&config.facilities)?);
        let facilities = Arc::new(FacilityCache::new(source, config.facilities.facility_type.clone()));
        let period = (config.facilities.refresh_interval_secs > 0)
            .then(|| Duration::from_secs(config.facilities.refresh_interval_secs));
        spawn_facility_refresh(Arc::clone(&facilities), period);

        let observer = load_observer_location(&config.data.observer_file);
        let engine = FeedEngine::new(&config, Arc::new(Sgp4Propagator::new()), facilities, observer);

        let state = Self::with_engine(config, Arc::new(engine));
        state.set_ready(true);
        tracing::info!("Feed state initialized");
        Ok(state)
    }

    /// Assemble state around an existing engine; starts not ready
    pub fn with_engine(config: TrackerConfig, engine: Arc<FeedEngine>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                engine,
                sessions: Arc::new(SessionRegistry::new()),
                ready: RwLock::new(false),
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> Arc<FeedEngine> {
        Arc::clone(&self.inner.engine)
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.inner.sessions
    }

    /// Check if the server is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read() && self.inner.sessions.is_accepting()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}

/// Fetch the facility dataset in the background, then again every `period` if set
///
/// Failed fetches keep the previous index.
fn spawn_facility_refresh(facilities: Arc<FacilityCache>, period: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = facilities.refresh().await {
            tracing::error!("Error fetching facility locations: {}", e);
        }

        let Some(period) = period else {
            return;
        };
        tracing::info!("Facility locations refresh every {}s", period.as_secs());
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and the initial fetch already ran
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = facilities.refresh().await {
                tracing::warn!("Facility refresh failed, keeping {} cached: {}", facilities.len(), e);
            }
        }
    })
}
