//! Durable storage for the device list.
//!
//! The whole list is written as one JSON array on every change. Only what
//! the user chose is kept: each device's address and label. Metrics are
//! live data and come back with the first probe. Writes go to a sibling
//! temp file first and are renamed into place so a crash mid-write leaves
//! the previous list intact.

use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DeviceStatus;

/// Storage key; the file name under the data directory.
pub const STORE_KEY: &str = "miner_devices";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("stored device list is corrupt: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage unavailable")]
    Unavailable,
}

/// One persisted device.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedDevice {
    address: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

impl From<&DeviceStatus> for SavedDevice {
    fn from(device: &DeviceStatus) -> Self {
        Self {
            address: device.address,
            display_name: device.display_name.clone(),
        }
    }
}

impl From<SavedDevice> for DeviceStatus {
    fn from(saved: SavedDevice) -> Self {
        Self {
            display_name: saved.display_name,
            ..DeviceStatus::inactive(saved.address)
        }
    }
}

/// Backing store for the registry.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Load the saved list as inactive records. A store that has never
    /// been written yields an empty list, not an error.
    async fn load(&self) -> Result<Vec<DeviceStatus>, StoreError>;

    /// Replace the saved list.
    async fn save(&self, devices: &[DeviceStatus]) -> Result<(), StoreError>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store at `<dir>/miner_devices.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{STORE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeviceStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<DeviceStatus>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let saved: Vec<SavedDevice> = serde_json::from_slice(&bytes)?;
        Ok(saved.into_iter().map(DeviceStatus::from).collect())
    }

    async fn save(&self, devices: &[DeviceStatus]) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let saved: Vec<SavedDevice> = devices.iter().map(SavedDevice::from).collect();
        let json = serde_json::to_vec_pretty(&saved)?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

/// In-memory store, for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<DeviceStatus>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn with_devices(devices: Vec<DeviceStatus>) -> Self {
        Self {
            devices: Mutex::new(devices),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Contents as last saved, metrics cleared.
    pub fn saved(&self) -> Vec<DeviceStatus> {
        self.devices.lock().clone()
    }

    /// Make subsequent saves fail, to exercise the degraded path.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn load(&self) -> Result<Vec<DeviceStatus>, StoreError> {
        Ok(self.devices.lock().clone())
    }

    async fn save(&self, devices: &[DeviceStatus]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        *self.devices.lock() = devices.iter().map(DeviceStatus::forget_metrics).collect();
        Ok(())
    }
}
