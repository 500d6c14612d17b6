//! On-disk record store

use super::{CompressedRecord, StoreConfig};
use crate::compression::CompressionMetadata;
use crate::{IdealemError, Result, TimeRange};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "rec";

/// Summary of a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub time_range: TimeRange,
    pub metadata: CompressionMetadata,
    path: PathBuf,
}

impl RecordInfo {
    fn of(record: &CompressedRecord, path: PathBuf) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            time_range: record.time_range,
            metadata: record.metadata.clone(),
            path,
        }
    }
}

/// Compression records, one directory per device and one file per record
pub struct CompressionStore {
    config: StoreConfig,
    /// Per device, ordered by creation time
    index: RwLock<HashMap<String, Vec<RecordInfo>>>,
}

impl CompressionStore {
    /// Open (or create) the store and index existing records
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;

        let store = Self {
            config,
            index: RwLock::new(HashMap::new()),
        };
        store.load_index()?;

        Ok(store)
    }

    /// Persist `record`
    pub fn save(&self, record: &CompressedRecord) -> Result<()> {
        validate_device_id(&record.device_id)?;
        let bytes = record.encode()?;

        let dir = self.config.root.join(&record.device_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!(
            "{:020}-{}.{}",
            record.created_at.timestamp_micros().max(0),
            record.id,
            RECORD_EXTENSION
        ));

        write_atomic(&path, &bytes, self.config.sync)?;

        let mut index = self.index.write();
        let records = index.entry(record.device_id.clone()).or_default();
        records.push(RecordInfo::of(record, path));
        records.sort_by_key(|info| (info.created_at, info.id));

        info!(
            "Stored record {} for {}: {} values, ratio {:.2}",
            record.id,
            record.device_id,
            record.metadata.original_length,
            record.metadata.compression_ratio
        );
        Ok(())
    }

    /// Load one record
    pub fn load(&self, device_id: &str, id: Uuid) -> Result<CompressedRecord> {
        let path = {
            let index = self.index.read();
            index
                .get(device_id)
                .and_then(|records| records.iter().find(|info| info.id == id))
                .map(|info| info.path.clone())
                .ok_or_else(|| IdealemError::RecordNotFound(format!("{}/{}", device_id, id)))?
        };

        let record = read_record(&path)?;
        if record.id != id || record.device_id != device_id {
            return Err(IdealemError::Corruption(format!(
                "{} holds record {}/{}",
                path.display(),
                record.device_id,
                record.id
            )));
        }
        Ok(record)
    }

    /// Most recently created record of a device
    pub fn latest(&self, device_id: &str) -> Result<CompressedRecord> {
        let id = self
            .index
            .read()
            .get(device_id)
            .and_then(|records| records.last())
            .map(|info| info.id)
            .ok_or_else(|| IdealemError::RecordNotFound(device_id.to_string()))?;
        self.load(device_id, id)
    }

    /// Records of a device, oldest first
    pub fn list(&self, device_id: &str) -> Vec<RecordInfo> {
        self.index
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Devices with at least one record, sorted
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .index
            .read()
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(device, _)| device.clone())
            .collect();
        devices.sort();
        devices
    }

    /// Delete every record of a device
    pub fn remove_device(&self, device_id: &str) -> Result<()> {
        validate_device_id(device_id)?;
        let mut index = self.index.write();

        if !index.contains_key(device_id) {
            return Err(IdealemError::RecordNotFound(device_id.to_string()));
        }

        // Index follows the disk, so a failed delete leaves both intact
        let dir = self.config.root.join(device_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        index.remove(device_id);

        info!("Removed records of {}", device_id);
        Ok(())
    }

    fn load_index(&self) -> Result<()> {
        let mut index = self.index.write();

        for entry in fs::read_dir(&self.config.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let device = entry.file_name().to_string_lossy().to_string();

            // Skip hidden directories
            if device.starts_with('.') {
                continue;
            }

            let mut records = Vec::new();
            for file in fs::read_dir(entry.path())? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                match read_record(&path) {
                    Ok(record) if record.device_id == device => {
                        records.push(RecordInfo::of(&record, path));
                    }
                    Ok(record) => {
                        warn!(
                            "Skipping {}: belongs to device {}",
                            path.display(),
                            record.device_id
                        );
                    }
                    Err(e) => {
                        warn!("Skipping unreadable record {}: {}", path.display(), e);
                    }
                }
            }

            if !records.is_empty() {
                records.sort_by_key(|info| (info.created_at, info.id));
                info!("Indexed {} records for {}", records.len(), device);
                index.insert(device, records);
            }
        }

        Ok(())
    }
}

/// Write under a temporary name so readers never see a partial record.
/// The temporary file is removed when any step fails.
fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            if sync {
                file.sync_all()?;
            }
            Ok(())
        })
        .and_then(|_| fs::rename(&tmp, path));

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn read_record(path: &Path) -> Result<CompressedRecord> {
    let data = fs::read(path)?;
    CompressedRecord::decode(&data)
}

/// Device ids become directory names
fn validate_device_id(device_id: &str) -> Result<()> {
    let valid = !device_id.is_empty()
        && !device_id.starts_with('.')
        && device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'));
    if valid {
        Ok(())
    } else {
        Err(IdealemError::InvalidInput(format!(
            "device id {:?} cannot name a directory",
            device_id
        )))
    }
}
