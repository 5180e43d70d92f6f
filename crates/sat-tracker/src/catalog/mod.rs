//! Element catalog: locating, parsing and caching the freshest element-set source
//!
//! Sources live in a dated tree (`<tle_dir>/YYYY-MM-DD/<prefix>*<suffix>`). The manager keeps
//! the last parsed catalog behind an `Arc` and swaps it wholesale, so readers holding an old
//! snapshot never observe a half-built one.

pub mod parser;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::DataConfig;
use crate::error::{Error, Result};

pub use parser::parse_element_sets;

/// Orbital element state for one satellite
pub struct ElementRecord {
    name: String,
    norad_id: u64,
    epoch: DateTime<Utc>,
    constants: sgp4::Constants,
}

impl ElementRecord {
    pub fn new(name: String, norad_id: u64, epoch: DateTime<Utc>, constants: sgp4::Constants) -> Self {
        Self {
            name,
            norad_id,
            epoch,
            constants,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn norad_id(&self) -> u64 {
        self.norad_id
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn constants(&self) -> &sgp4::Constants {
        &self.constants
    }

    /// Minutes elapsed between the element epoch and `at`
    pub fn minutes_since_epoch(&self, at: DateTime<Utc>) -> f64 {
        (at - self.epoch).num_milliseconds() as f64 / 60_000.0
    }
}

impl std::fmt::Debug for ElementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementRecord")
            .field("name", &self.name)
            .field("norad_id", &self.norad_id)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of one parsed source
#[derive(Debug, Default)]
pub struct ElementCatalog {
    source: Option<PathBuf>,
    records: HashMap<String, ElementRecord>,
}

impl ElementCatalog {
    pub fn new(source: PathBuf, records: HashMap<String, ElementRecord>) -> Self {
        Self {
            source: Some(source),
            records,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Path this catalog was parsed from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ElementRecord> {
        self.records.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &ElementRecord> {
        self.records.values()
    }
}

/// Where element-set files are looked for
#[derive(Debug, Clone)]
pub struct CatalogSource {
    base_dir: PathBuf,
    file_prefix: String,
    file_suffix: String,
}

impl CatalogSource {
    pub fn new(base_dir: impl Into<PathBuf>, file_prefix: impl Into<String>, file_suffix: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_prefix: file_prefix.into(),
            file_suffix: file_suffix.into(),
        }
    }

    pub fn from_config(data: &DataConfig) -> Self {
        Self::new(&data.tle_dir, &data.tle_file_prefix, &data.tle_file_suffix)
    }

    /// Directory holding the sources for `date`
    pub fn directory_for(&self, date: NaiveDate) -> PathBuf {
        self.base_dir.join(date.format("%Y-%m-%d").to_string())
    }

    /// Newest matching file (by modification time) in the directory for `date`
    ///
    /// Ties on modification time are broken by file name so the choice is deterministic.
    pub fn locate_latest(&self, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.directory_for(date);
        if !dir.is_dir() {
            return Err(Error::unavailable(format!(
                "element-set directory for {} not found: {}",
                date,
                dir.display()
            )));
        }

        let mut newest: Option<(SystemTime, String, PathBuf)> = None;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(&self.file_prefix) || !file_name.ends_with(&self.file_suffix) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;

            let is_newer = match &newest {
                Some((time, name, _)) => (modified, &file_name) > (*time, name),
                None => true,
            };
            if is_newer {
                newest = Some((modified, file_name, entry.path()));
            }
        }

        newest.map(|(_, _, path)| path).ok_or_else(|| {
            Error::unavailable(format!("no element-set files in {}", dir.display()))
        })
    }
}

/// Outcome of a freshness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRefresh {
    /// A new source was parsed; carries its record count
    Reloaded(usize),
    /// The cached catalog already matches the latest source
    Unchanged,
    /// No source exists for today
    Unavailable,
}

/// Owns the cached element catalog and reloads it when a newer source appears
pub struct CatalogManager {
    source: CatalogSource,
    current: RwLock<Arc<ElementCatalog>>,
    /// Serialises reloads so concurrent sessions parse a new source once
    reload_lock: Mutex<()>,
    reloads: AtomicUsize,
}

impl CatalogManager {
    pub fn new(source: CatalogSource) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(ElementCatalog::empty())),
            reload_lock: Mutex::new(()),
            reloads: AtomicUsize::new(0),
        }
    }

    /// Latest source for today's date (UTC)
    pub fn locate_latest_source(&self) -> Result<PathBuf> {
        self.source.locate_latest(Utc::now().date_naive())
    }

    /// Reload the catalog if today's latest source differs from the cached one
    pub fn ensure_fresh(&self) -> CatalogRefresh {
        self.ensure_fresh_on(Utc::now().date_naive())
    }

    pub fn ensure_fresh_on(&self, date: NaiveDate) -> CatalogRefresh {
        let latest = match self.source.locate_latest(date) {
            Ok(path) => path,
            Err(Error::Unavailable(msg)) => {
                tracing::debug!("{}", msg);
                return CatalogRefresh::Unavailable;
            }
            Err(e) => {
                tracing::error!("Error finding latest element-set file: {}", e);
                return CatalogRefresh::Unavailable;
            }
        };

        if self.is_current(&latest) {
            return CatalogRefresh::Unchanged;
        }

        let _guard = self.reload_lock.lock();
        // Another session may have finished the same reload while we waited
        if self.is_current(&latest) {
            return CatalogRefresh::Unchanged;
        }

        tracing::info!("Loading element sets from {}", latest.display());
        let text = match std::fs::read_to_string(&latest) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error reading element-set file {}: {}", latest.display(), e);
                return CatalogRefresh::Unavailable;
            }
        };

        let records = parse_element_sets(&text);
        let count = records.len();
        if count == 0 {
            tracing::warn!("No valid element sets parsed from {}", latest.display());
        } else {
            tracing::info!("Loaded {} element sets", count);
        }

        *self.current.write() = Arc::new(ElementCatalog::new(latest, records));
        self.reloads.fetch_add(1, Ordering::SeqCst);
        CatalogRefresh::Reloaded(count)
    }

    fn is_current(&self, path: &Path) -> bool {
        self.current.read().source() == Some(path)
    }

    /// Current catalog snapshot
    pub fn snapshot(&self) -> Arc<ElementCatalog> {
        Arc::clone(&self.current.read())
    }

    /// Number of times a source has been parsed
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}
