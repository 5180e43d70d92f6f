//! Facility (POP) location cache
//!
//! The dataset is fetched from a remote JSON array, filtered down to visible facilities of
//! the configured type with usable coordinates, and indexed by code. A failed refresh leaves
//! the previous index in place.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FacilityConfig;
use crate::error::{Error, Result};

/// A ground facility with coordinates in degrees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityLocation {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One raw entry of the facility dataset
///
/// Coordinates are normally strings; numbers are accepted too.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacilityRecord {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub show: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub lat: Option<serde_json::Value>,
    #[serde(default)]
    pub lon: Option<serde_json::Value>,
}

/// Trait for fetching the raw facility dataset
#[async_trait]
pub trait FacilitySource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<FacilityRecord>>;

    /// Get source description for logging
    fn describe(&self) -> String;
}

/// Fetches the dataset over HTTP
pub struct HttpFacilitySource {
    client: reqwest::Client,
    url: String,
}

impl HttpFacilitySource {
    pub fn new(config: &FacilityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl FacilitySource for HttpFacilitySource {
    async fn fetch(&self) -> Result<Vec<FacilityRecord>> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::facility(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }
        Ok(response.json::<Vec<FacilityRecord>>().await?)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn parse_coordinate(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

/// Keep visible entries of `facility_type` with parseable coordinates, indexed by code
pub fn index_facilities(
    records: Vec<FacilityRecord>,
    facility_type: &str,
) -> HashMap<String, FacilityLocation> {
    let mut index = HashMap::new();
    for record in records {
        if record.show != Some(true) || record.kind.as_deref() != Some(facility_type) {
            continue;
        }
        let Some(code) = record.code.filter(|c| !c.is_empty()) else {
            continue;
        };
        let (Some(latitude), Some(longitude)) = (
            record.lat.as_ref().and_then(parse_coordinate),
            record.lon.as_ref().and_then(parse_coordinate),
        ) else {
            continue;
        };
        index.insert(
            code.clone(),
            FacilityLocation {
                code,
                latitude,
                longitude,
            },
        );
    }
    index
}

/// Shared, replace-wholesale facility index
pub struct FacilityCache {
    source: Arc<dyn FacilitySource>,
    facility_type: String,
    locations: RwLock<Arc<HashMap<String, FacilityLocation>>>,
}

impl FacilityCache {
    pub fn new(source: Arc<dyn FacilitySource>, facility_type: impl Into<String>) -> Self {
        Self {
            source,
            facility_type: facility_type.into(),
            locations: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Fetch the dataset and replace the index
    ///
    /// On failure the existing index is kept and the error is returned for logging.
    pub async fn refresh(&self) -> Result<usize> {
        tracing::info!("Fetching facility locations from {}", self.source.describe());
        let records = self.source.fetch().await?;
        let index = index_facilities(records, &self.facility_type);
        let count = index.len();
        *self.locations.write() = Arc::new(index);
        tracing::info!("Cached {} facility locations", count);
        Ok(count)
    }

    pub fn lookup(&self, code: &str) -> Option<FacilityLocation> {
        self.locations.read().get(code).cloned()
    }

    pub fn len(&self) -> usize {
        self.locations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Serves queued responses in order
    struct ScriptedSource {
        responses: Mutex<Vec<Result<Vec<FacilityRecord>>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<FacilityRecord>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl FacilitySource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<FacilityRecord>> {
            self.responses.lock().remove(0)
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn records(value: serde_json::Value) -> Vec<FacilityRecord> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_index_filters_entries() {
        let dataset = records(json!([
            {"code": "sttlwax1", "show": true, "type": "netfac", "lat": "47.61", "lon": "-122.33"},
            {"code": "hidden", "show": false, "type": "netfac", "lat": "1", "lon": "1"},
            {"code": "gateway", "show": true, "type": "gs", "lat": "1", "lon": "1"},
            {"code": "badlat", "show": true, "type": "netfac", "lat": "north", "lon": "1"},
            {"code": "", "show": true, "type": "netfac", "lat": "1", "lon": "1"},
            {"code": "numeric", "show": true, "type": "netfac", "lat": 10.5, "lon": 20.25},
            {"show": true, "type": "netfac", "lat": "1", "lon": "1"}
        ]));

        let index = index_facilities(dataset, "netfac");
        assert_eq!(index.len(), 2);
        assert_eq!(index["sttlwax1"].latitude, 47.61);
        assert_eq!(index["sttlwax1"].longitude, -122.33);
        assert_eq!(index["numeric"].longitude, 20.25);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_cache() {
        let first = records(json!([
            {"code": "sttlwax1", "show": true, "type": "netfac", "lat": "47.61", "lon": "-122.33"}
        ]));
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(first),
            Err(Error::facility("connection reset")),
        ]));
        let cache = FacilityCache::new(source, "netfac");

        assert_eq!(cache.refresh().await.unwrap(), 1);
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("sttlwax1").unwrap().latitude, 47.61);
        assert!(cache.lookup("unknown").is_none());
    }
}
