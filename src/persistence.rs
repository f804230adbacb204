//! ==============================================================================
//! persistence.rs - snapshot storage
//! ==============================================================================
//!
//! purpose:
//!     best-effort durability for the reading history and alert thresholds.
//!     the pipeline only sees the `SnapshotStore` trait; it decides WHEN to
//!     save, the store decides HOW.
//!
//! implementations:
//!     - JsonFileStore: two pretty-printed json files (data + alert config)
//!     - MemoryStore: in-process, for tests and `--no-persist` style setups
//!
//! file format (data file):
//!     {
//!       "last_updated": "2026-03-01T12:00:00.000000",
//!       "total_readings": 2,
//!       "data": [ {"temperature": 21.0, "humidity": 40.0, "timestamp": "..."}, ... ]
//!     }
//!
//! ==============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::alerts::{AlertThresholds, ThresholdUpdate};
use crate::domain::{now_timestamp, Reading};
use crate::error::PersistenceError;

/// storage boundary used by the pipeline
///
/// methods are blocking; the pipeline calls them from `spawn_blocking`.
pub trait SnapshotStore: Send + Sync {
    /// readings saved by the last snapshot, oldest first (empty if none)
    fn load_snapshot(&self) -> Result<Vec<Reading>, PersistenceError>;
    fn save_snapshot(&self, readings: &[Reading]) -> Result<(), PersistenceError>;

    /// `None` when nothing was saved yet
    fn load_thresholds(&self) -> Result<Option<AlertThresholds>, PersistenceError>;
    fn save_thresholds(&self, thresholds: &AlertThresholds) -> Result<(), PersistenceError>;
}

#[derive(Serialize)]
struct SnapshotFileOut<'a> {
    last_updated: String,
    total_readings: usize,
    data: &'a [Reading],
}

#[derive(Deserialize)]
struct SnapshotFileIn {
    #[serde(default)]
    data: Vec<Value>,
}

// ==============================================================================
// json file store
// ==============================================================================

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_file: PathBuf,
    alerts_file: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_file: impl Into<PathBuf>, alerts_file: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            alerts_file: alerts_file.into(),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// read a file, `None` if it does not exist
fn read_optional(path: &Path) -> Result<Option<String>, PersistenceError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// write through a sibling temp file so a crash never leaves half a snapshot
fn write_replace(path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

impl SnapshotStore for JsonFileStore {
    fn load_snapshot(&self) -> Result<Vec<Reading>, PersistenceError> {
        let Some(content) = read_optional(&self.data_file)? else {
            return Ok(Vec::new());
        };
        let file: SnapshotFileIn = serde_json::from_str(&content)?;

        let total = file.data.len();
        let readings: Vec<Reading> = file
            .data
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        if readings.len() < total {
            tracing::warn!(
                "skipped {} malformed entries in {}",
                total - readings.len(),
                self.data_file.display()
            );
        }
        Ok(readings)
    }

    fn save_snapshot(&self, readings: &[Reading]) -> Result<(), PersistenceError> {
        let file = SnapshotFileOut {
            last_updated: now_timestamp(),
            total_readings: readings.len(),
            data: readings,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_replace(&self.data_file, &json)
    }

    fn load_thresholds(&self) -> Result<Option<AlertThresholds>, PersistenceError> {
        let Some(content) = read_optional(&self.alerts_file)? else {
            return Ok(None);
        };
        let update: ThresholdUpdate = serde_json::from_str(&content)?;
        match update.validate() {
            Ok(thresholds) => Ok(Some(thresholds)),
            Err(e) => {
                tracing::warn!("ignoring {}: {}", self.alerts_file.display(), e);
                Ok(None)
            }
        }
    }

    fn save_thresholds(&self, thresholds: &AlertThresholds) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(thresholds)?;
        write_replace(&self.alerts_file, &json)
    }
}

// ==============================================================================
// in-memory store
// ==============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    thresholds: Mutex<Option<AlertThresholds>>,
    saves: Mutex<usize>,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// a store whose every save fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_readings(readings: Vec<Reading>) -> Self {
        Self {
            readings: Mutex::new(readings),
            ..Self::default()
        }
    }

    /// number of successful snapshot saves
    pub fn snapshot_saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn saved_readings(&self) -> Vec<Reading> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn saved_thresholds(&self) -> Option<AlertThresholds> {
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing {
            return Err(io_err(
                Path::new("memory"),
                std::io::Error::new(ErrorKind::Other, "store configured to fail"),
            ));
        }
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Vec<Reading>, PersistenceError> {
        Ok(self.saved_readings())
    }

    fn save_snapshot(&self, readings: &[Reading]) -> Result<(), PersistenceError> {
        self.check()?;
        *self.readings.lock().unwrap_or_else(PoisonError::into_inner) = readings.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn load_thresholds(&self) -> Result<Option<AlertThresholds>, PersistenceError> {
        Ok(self.saved_thresholds())
    }

    fn save_thresholds(&self, thresholds: &AlertThresholds) -> Result<(), PersistenceError> {
        self.check()?;
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner) = Some(*thresholds);
        Ok(())
    }
}
