// Durable snapshots of the swap registry

use crate::data_structures::SwapRecord;
use crate::error::StorageError;
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// Trait defining the storage interface SwapRegistry expects
pub trait RegistryStorage: Send + Sync + fmt::Debug {
    // Records persisted by the last successful save, empty on first start
    fn load(&self) -> Result<Vec<SwapRecord>, StorageError>;

    // Replace the stored snapshot with the full set of records
    fn save(&self, records: &[SwapRecord]) -> Result<(), StorageError>;
}

// Nothing survives a restart
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage;

impl InMemoryStorage {
    pub fn new() -> Self {
        Default::default()
    }
}

impl RegistryStorage for InMemoryStorage {
    fn load(&self) -> Result<Vec<SwapRecord>, StorageError> {
        Ok(Vec::new())
    }

    fn save(&self, _records: &[SwapRecord]) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Whole-registry JSON snapshot. Writes go to a sibling temp file which is
/// then renamed over the snapshot, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RegistryStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<SwapRecord>, StorageError> {
        if !self.path.exists() {
            debug!("[Registry] No snapshot at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, records: &[SwapRecord]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        fs::write(&temp, serde_json::to_vec_pretty(records)?)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
