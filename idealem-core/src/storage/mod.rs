//! Persistence boundary
//!
//! Samples come in through a [`SampleSource`]; compressed spans go out to a
//! [`CompressionStore`], one directory per device.

mod engine;
mod record;

pub use engine::{CompressionStore, RecordInfo};
pub use record::CompressedRecord;

use crate::{Result, Sample};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

/// Record store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding one directory per device
    pub root: PathBuf,
    /// fsync every record file before it becomes visible
    pub sync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            sync: true,
        }
    }
}

/// Supplies a device's complete, time-ordered series
pub trait SampleSource: Send + Sync {
    fn fetch(&self, device_id: &str) -> Result<Vec<Sample>>;
}

/// In-memory sample source
#[derive(Debug, Default)]
pub struct MemorySource {
    series: RwLock<HashMap<String, Vec<Sample>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the series of `device_id`
    pub fn insert(&self, device_id: &str, samples: Vec<Sample>) {
        self.series.write().insert(device_id.to_string(), samples);
    }

    /// Known devices, sorted
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.series.read().keys().cloned().collect();
        devices.sort();
        devices
    }
}

impl SampleSource for MemorySource {
    /// Unknown devices have an empty series
    fn fetch(&self, device_id: &str) -> Result<Vec<Sample>> {
        Ok(self
            .series
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default())
    }
}
