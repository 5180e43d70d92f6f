//! Feed engine: one update cycle for one session
//!
//! The engine owns the shared read-mostly stores and turns "this session's viewport at this
//! instant" into a snapshot plus the delay before the next cycle. It knows nothing about
//! timers or sockets.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{CatalogManager, CatalogRefresh, CatalogSource, ElementCatalog};
use crate::config::{DelayTable, FilterConfig, TrackerConfig};
use crate::facilities::FacilityCache;
use crate::filter::{FilterPolicy, Verdict, VisibilityFilter};
use crate::markers::{MarkerReader, ObserverState};
use crate::propagation::Propagator;
use crate::types::{FacilityMarker, SatellitePosition, SatelliteUpdate, TrackedSatellite, ViewportBounds};

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Snapshot to push, `None` when there is nothing to send
    pub update: Option<SatelliteUpdate>,
    /// Satellites included (tracked + others)
    pub total: usize,
    /// Wait before the next cycle
    pub delay: Duration,
}

/// Shared stores and collaborators used by every session
pub struct FeedEngine {
    catalog: CatalogManager,
    facilities: Arc<FacilityCache>,
    markers: MarkerReader,
    observer: Option<ObserverState>,
    propagator: Arc<dyn Propagator>,
    filter: FilterConfig,
    delays: DelayTable,
}

impl FeedEngine {
    /// Create a new engine from configuration and its collaborators
    pub fn new(
        config: &TrackerConfig,
        propagator: Arc<dyn Propagator>,
        facilities: Arc<FacilityCache>,
        observer: Option<ObserverState>,
    ) -> Self {
        tracing::info!(
            "Feed engine using {} propagation, observer {}",
            propagator.name(),
            if observer.is_some() { "set" } else { "unset" }
        );
        Self {
            catalog: CatalogManager::new(CatalogSource::from_config(&config.data)),
            facilities,
            markers: MarkerReader::from_config(&config.data),
            observer,
            propagator,
            filter: config.filter.clone(),
            delays: config.scheduler.delay_table(),
        }
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn facilities(&self) -> &FacilityCache {
        &self.facilities
    }

    pub fn observer(&self) -> Option<&ObserverState> {
        self.observer.as_ref()
    }

    /// Run one cycle for a session whose current viewport is `viewport`
    ///
    /// Per-satellite failures only drop that satellite; the cycle itself cannot fail.
    pub fn run_cycle(&self, viewport: Option<&ViewportBounds>, now: DateTime<Utc>) -> CycleOutcome {
        let started = Instant::now();

        let tracked_name = self.markers.read_tracked_satellite_name();
        let current_pop = self
            .markers
            .read_active_facility_code()
            .and_then(|code| match self.facilities.lookup(&code) {
                Some(location) => Some(FacilityMarker::from(location)),
                None => {
                    tracing::debug!("Unknown facility code '{}'", code);
                    None
                }
            });

        // No source for today means nothing to propagate, even if an older catalog is cached
        let catalog = match self.catalog.ensure_fresh_on(now.date_naive()) {
            CatalogRefresh::Reloaded(count) => {
                tracing::debug!("Catalog reloaded with {} records", count);
                self.catalog.snapshot()
            }
            CatalogRefresh::Unchanged => self.catalog.snapshot(),
            CatalogRefresh::Unavailable => Arc::new(ElementCatalog::empty()),
        };

        let policy = FilterPolicy::select(
            viewport,
            self.observer.as_ref().map(ObserverState::coordinates),
            &self.filter,
        );
        let filter = VisibilityFilter::new(tracked_name.as_deref(), policy);

        let sidereal_time = self.propagator.sidereal_time(now);
        let mut connected_satellite = None;
        let mut other_satellites = Vec::new();
        let mut failures = 0usize;

        for record in catalog.records() {
            let eci = match self.propagator.propagate(record, now) {
                Ok(eci) => eci,
                Err(e) => {
                    failures += 1;
                    tracing::debug!("Skipping {}: {}", record.name(), e);
                    continue;
                }
            };

            let geodetic = self.propagator.eci_to_geodetic(&eci, sidereal_time);
            let latitude = geodetic.latitude.to_degrees();
            let longitude = geodetic.longitude.to_degrees();
            if !(latitude.is_finite() && longitude.is_finite()) {
                failures += 1;
                continue;
            }

            let verdict = filter.evaluate(record.name(), latitude, longitude, |observer| {
                let ecf = self.propagator.eci_to_ecf(&eci, sidereal_time);
                self.propagator.look_angles(observer, &ecf)
            });

            match verdict {
                Verdict::Tracked => {
                    connected_satellite = Some(TrackedSatellite {
                        id: record.name().to_string(),
                        latitude,
                        longitude,
                        timestamp: now,
                    });
                }
                Verdict::Visible => other_satellites.push(SatellitePosition {
                    id: record.name().to_string(),
                    latitude,
                    longitude,
                }),
                Verdict::Hidden => {}
            }
        }

        let update = SatelliteUpdate {
            connected_satellite,
            other_satellites,
            current_pop,
            observer_location: self.observer.map(|observer| *observer.location()),
            timestamp: now,
        };
        let total = update.satellite_count();
        let delay = self.delays.delay_for(total);

        tracing::debug!(
            "Cycle over {} records: {} included, {} failed, next in {}ms ({:.1}ms)",
            catalog.len(),
            total,
            failures,
            delay.as_millis(),
            started.elapsed().as_secs_f64() * 1000.0
        );

        CycleOutcome {
            update: update.has_content().then_some(update),
            total,
            delay,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::ElementRecord;
    use crate::config::DataConfig;
    use crate::error::{Error, Result};
    use crate::facilities::{FacilityRecord, FacilitySource};
    use crate::markers::ObserverLocation;
    use crate::propagation::EciPosition;
    use crate::types::LatLng;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    const LINE1: &str = "1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927";
    const LINE2: &str = "2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";
    const ORBIT_RADIUS_KM: f64 = 6928.137;

    /// Places satellites at fixed inertial positions with a zero sidereal angle
    pub(crate) struct FixedPropagator {
        positions: HashMap<String, EciPosition>,
    }

    impl FixedPropagator {
        pub(crate) fn new(positions: &[(&str, EciPosition)]) -> Self {
            Self {
                positions: positions
                    .iter()
                    .map(|(name, position)| (name.to_string(), *position))
                    .collect(),
            }
        }
    }

    impl Propagator for FixedPropagator {
        fn propagate(&self, record: &ElementRecord, _at: DateTime<Utc>) -> Result<EciPosition> {
            self.positions
                .get(record.name())
                .copied()
                .ok_or_else(|| Error::propagation(record.name(), "decayed"))
        }

        fn sidereal_time(&self, _at: DateTime<Utc>) -> f64 {
            0.0
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct NoFacilities;

    #[async_trait]
    impl FacilitySource for NoFacilities {
        async fn fetch(&self) -> Result<Vec<FacilityRecord>> {
            Ok(Vec::new())
        }

        fn describe(&self) -> String {
            "none".to_string()
        }
    }

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// Lay out a data directory with one element-set source holding `names`
    pub(crate) fn data_dir(root: &Path, names: &[&str]) -> TrackerConfig {
        data_dir_on(root, names, now().date_naive())
    }

    pub(crate) fn data_dir_on(root: &Path, names: &[&str], date: NaiveDate) -> TrackerConfig {
        let data = DataConfig::rooted_at(root);
        let day_dir = data.tle_dir.join(date.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir).unwrap();
        let text: String = names
            .iter()
            .map(|name| format!("{}\n{}\n{}\n", name, LINE1, LINE2))
            .collect();
        fs::write(day_dir.join("starlink-tle-0000.txt"), text).unwrap();

        TrackerConfig {
            data,
            ..TrackerConfig::default()
        }
    }

    /// A over lng 0, B over lng 90, C over lng 180, all on the equator
    pub(crate) fn fixed_propagator() -> FixedPropagator {
        FixedPropagator::new(&[
            ("A", EciPosition { x: ORBIT_RADIUS_KM, y: 0.0, z: 0.0 }),
            ("B", EciPosition { x: 0.0, y: ORBIT_RADIUS_KM, z: 0.0 }),
            ("C", EciPosition { x: -ORBIT_RADIUS_KM, y: 0.0, z: 0.0 }),
        ])
    }

    pub(crate) fn engine(config: &TrackerConfig, observer: Option<ObserverState>) -> FeedEngine {
        engine_with(config, Arc::new(fixed_propagator()), observer)
    }

    pub(crate) fn engine_with(
        config: &TrackerConfig,
        propagator: Arc<dyn Propagator>,
        observer: Option<ObserverState>,
    ) -> FeedEngine {
        let facilities = Arc::new(FacilityCache::new(Arc::new(NoFacilities), "netfac"));
        FeedEngine::new(config, propagator, facilities, observer)
    }

    fn equator_observer() -> ObserverState {
        ObserverState::from_location(ObserverLocation {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
        })
    }

    #[test]
    fn test_tracked_plus_elevation_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "B", "C"]);
        fs::write(&config.data.satellite_marker, "B\n").unwrap();
        let engine = engine(&config, Some(equator_observer()));

        let outcome = engine.run_cycle(None, now());
        let update = outcome.update.expect("snapshot expected");

        let connected = update.connected_satellite.as_ref().unwrap();
        assert_eq!(connected.id, "B");
        assert_eq!(connected.timestamp, now());
        assert!((connected.longitude - 90.0).abs() < 1e-6);

        assert_eq!(update.other_satellites.len(), 1);
        assert_eq!(update.other_satellites[0].id, "A");
        assert!(update.other_satellites[0].latitude.abs() < 1e-6);
        assert_eq!(update.observer_location.unwrap().altitude, 0.0);
        assert!(update.current_pop.is_none());

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.delay, Duration::from_millis(50));
    }

    #[test]
    fn test_viewport_replaces_elevation_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "B", "C"]);
        let engine = engine(&config, Some(equator_observer()));

        // Around lng 180: only C, which is below the observer's horizon
        let viewport = ViewportBounds::new(
            LatLng { lat: -10.0, lng: 170.0 },
            LatLng { lat: 10.0, lng: -170.0 },
        );
        let outcome = engine.run_cycle(Some(&viewport), now());
        let update = outcome.update.unwrap();

        assert!(update.connected_satellite.is_none());
        let ids: Vec<_> = update.other_satellites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["C"]);
    }

    #[test]
    fn test_failed_propagation_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "DECAYED", "C"]);
        let engine = engine(&config, Some(equator_observer()));

        let outcome = engine.run_cycle(None, now());
        let update = outcome.update.unwrap();
        assert_eq!(update.other_satellites.len(), 1);
        assert_eq!(update.other_satellites[0].id, "A");
    }

    #[test]
    fn test_nothing_to_send() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "B", "C"]);
        fs::write(&config.data.facility_marker, "unknownpop").unwrap();
        let engine = engine(&config, None);

        let outcome = engine.run_cycle(None, now());
        assert!(outcome.update.is_none());
        assert_eq!(outcome.total, 0);
        assert_eq!(outcome.delay, Duration::from_millis(50));
    }

    #[test]
    fn test_missing_catalog_degrades_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TrackerConfig {
            data: DataConfig::rooted_at(tmp.path()),
            ..TrackerConfig::default()
        };
        fs::write(&config.data.satellite_marker, "B").unwrap();
        let engine = engine(&config, Some(equator_observer()));

        let outcome = engine.run_cycle(None, now());
        assert!(outcome.update.is_none());
        assert!(engine.catalog().snapshot().is_empty());
    }

    #[test]
    fn test_stale_catalog_not_used_after_day_rollover() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "B", "C"]);
        fs::write(&config.data.satellite_marker, "B").unwrap();
        let engine = engine(&config, None);

        assert_eq!(engine.run_cycle(None, now()).total, 1);

        let next_day = now() + chrono::Duration::days(1);
        let outcome = engine.run_cycle(None, next_day);
        assert_eq!(outcome.total, 0);
        assert!(outcome.update.is_none());

        // The cached catalog is kept for when the day's source shows up
        assert_eq!(engine.catalog().snapshot().len(), 3);
    }

    #[test]
    fn test_catalog_parsed_once_across_cycles() {
        let tmp = tempfile::tempdir().unwrap();
        let config = data_dir(tmp.path(), &["A", "B", "C"]);
        let engine = engine(&config, None);

        engine.run_cycle(None, now());
        engine.run_cycle(None, now());
        assert_eq!(engine.catalog().reload_count(), 1);
    }
}
