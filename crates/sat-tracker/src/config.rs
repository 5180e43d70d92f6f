//! Configuration for the satellite feed

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[derive(Default)]
pub struct TrackerConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Filesystem inputs
    #[serde(default)]
    pub data: DataConfig,
    /// Facility (POP) dataset
    #[serde(default)]
    pub facilities: FacilityConfig,
    /// Visibility filter tuning
    #[serde(default)]
    pub filter: FilterConfig,
    /// Per-connection scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl TrackerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SAT_TRACKER_CONFIG` if set, then apply `PORT` / `DATA_DIR` overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SAT_TRACKER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid PORT '{}': {}", port, e)))?;
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            config.data = DataConfig::rooted_at(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.filter.viewport_expansion_factor.is_finite()
            || self.filter.viewport_expansion_factor <= 0.0
        {
            return Err(Error::Config(format!(
                "viewport_expansion_factor must be positive, got {}",
                self.filter.viewport_expansion_factor
            )));
        }
        if !self.filter.min_elevation_deg.is_finite() {
            return Err(Error::Config("min_elevation_deg must be finite".to_string()));
        }
        let ascending = self
            .scheduler
            .delay_steps
            .windows(2)
            .all(|pair| pair[0].below < pair[1].below);
        if !ascending {
            return Err(Error::Config(
                "scheduler.delay_steps thresholds must be strictly ascending".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Origins allowed by CORS (empty allows any)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: Vec::new(),
        }
    }
}

/// Filesystem locations written by external processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root of the dated element-set tree (`<tle_dir>/YYYY-MM-DD/`)
    pub tle_dir: PathBuf,
    /// Element-set file name prefix
    #[serde(default = "default_tle_file_prefix")]
    pub tle_file_prefix: String,
    /// Element-set file name suffix
    #[serde(default = "default_tle_file_suffix")]
    pub tle_file_suffix: String,
    /// Marker holding the currently connected satellite name
    pub satellite_marker: PathBuf,
    /// Marker holding the currently active facility code
    pub facility_marker: PathBuf,
    /// Observer location descriptor, read once at startup
    pub observer_file: PathBuf,
}

fn default_tle_file_prefix() -> String {
    "starlink-tle-".to_string()
}

fn default_tle_file_suffix() -> String {
    ".txt".to_string()
}

impl DataConfig {
    /// Standard layout under a single data directory
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            tle_dir: data_dir.join("TLE"),
            tle_file_prefix: default_tle_file_prefix(),
            tle_file_suffix: default_tle_file_suffix(),
            satellite_marker: data_dir.join("latest_connected_satellite.txt"),
            facility_marker: data_dir.join("latest_pop.txt"),
            observer_file: data_dir.join("observer_location.json"),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self::rooted_at("data")
    }
}

/// Facility (POP) dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityConfig {
    /// Dataset URL (JSON array)
    pub url: String,
    /// Only entries with this `type` are kept
    #[serde(default = "default_facility_type")]
    pub facility_type: String,
    /// Request timeout in seconds
    #[serde(default = "default_facility_timeout")]
    pub timeout_secs: u64,
    /// Re-fetch period in seconds; 0 fetches once at startup only
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

fn default_facility_type() -> String {
    "netfac".to_string()
}

fn default_facility_timeout() -> u64 {
    30
}

impl Default for FacilityConfig {
    fn default() -> Self {
        Self {
            url: "https://raw.githubusercontent.com/clarkzjw/starlink-geoip-data/refs/heads/master/map/pop.json"
                .to_string(),
            facility_type: default_facility_type(),
            timeout_secs: default_facility_timeout(),
            refresh_interval_secs: 0,
        }
    }
}

/// Visibility filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Viewport half-spans are multiplied by this to preload nearby satellites
    #[serde(default = "default_expansion_factor")]
    pub viewport_expansion_factor: f64,
    /// Minimum elevation (degrees) for the observer fallback
    #[serde(default)]
    pub min_elevation_deg: f64,
}

fn default_expansion_factor() -> f64 {
    1.5
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            viewport_expansion_factor: default_expansion_factor(),
            min_elevation_deg: 0.0,
        }
    }
}

/// One row of the delay table: totals below `below` wait `delay_ms`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelayStep {
    pub below: usize,
    pub delay_ms: u64,
}

/// Per-connection scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay before a new connection's first cycle
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Ascending payload-size thresholds
    #[serde(default = "default_delay_steps")]
    pub delay_steps: Vec<DelayStep>,
    /// Delay once every threshold is exceeded
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Grace period for draining sessions on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_initial_delay() -> u64 { 200 }
fn default_max_delay() -> u64 { 1000 }
fn default_shutdown_grace() -> u64 { 10 }

fn default_delay_steps() -> Vec<DelayStep> {
    vec![
        DelayStep { below: 100, delay_ms: 50 },
        DelayStep { below: 300, delay_ms: 100 },
        DelayStep { below: 600, delay_ms: 200 },
        DelayStep { below: 1000, delay_ms: 500 },
    ]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            delay_steps: default_delay_steps(),
            max_delay_ms: default_max_delay(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl SchedulerConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Build the payload-size to delay mapping
    pub fn delay_table(&self) -> DelayTable {
        DelayTable {
            steps: self.delay_steps.clone(),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Maps the number of satellites in a snapshot to the wait before the next one
#[derive(Debug, Clone)]
pub struct DelayTable {
    steps: Vec<DelayStep>,
    max_delay: Duration,
}

impl DelayTable {
    /// Delay for a cycle that produced `total` satellites
    pub fn delay_for(&self, total: usize) -> Duration {
        self.steps
            .iter()
            .find(|step| total < step.below)
            .map(|step| Duration::from_millis(step.delay_ms))
            .unwrap_or(self.max_delay)
    }
}

impl Default for DelayTable {
    fn default() -> Self {
        SchedulerConfig::default().delay_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_table_boundaries() {
        let table = DelayTable::default();
        let ms = |total| table.delay_for(total).as_millis();

        assert_eq!(ms(0), 50);
        assert_eq!(ms(99), 50);
        assert_eq!(ms(100), 100);
        assert_eq!(ms(299), 100);
        assert_eq!(ms(300), 200);
        assert_eq!(ms(599), 200);
        assert_eq!(ms(600), 500);
        assert_eq!(ms(999), 500);
        assert_eq!(ms(1000), 1000);
        assert_eq!(ms(25_000), 1000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = TrackerConfig::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 4000

            [filter]
            min_elevation_deg = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert!(config.server.allowed_origins.is_empty());
        assert_eq!(config.filter.min_elevation_deg, 10.0);
        assert_eq!(config.filter.viewport_expansion_factor, 1.5);
        assert_eq!(config.scheduler.initial_delay_ms, 200);
        assert_eq!(config.data.tle_dir, PathBuf::from("data").join("TLE"));
    }

    #[test]
    fn test_rejects_unordered_delay_steps() {
        let result = TrackerConfig::from_toml(
            r#"
            [scheduler]
            delay_steps = [
                { below = 300, delay_ms = 100 },
                { below = 100, delay_ms = 50 },
            ]
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rooted_data_layout() {
        let data = DataConfig::rooted_at("/srv/tracker");
        assert_eq!(data.tle_dir, PathBuf::from("/srv/tracker/TLE"));
        assert_eq!(data.facility_marker, PathBuf::from("/srv/tracker/latest_pop.txt"));
        assert_eq!(data.tle_file_prefix, "starlink-tle-");
    }
}
