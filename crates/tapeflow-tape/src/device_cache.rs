//! On-disk cache of the last tape-device scan
//!
//! Device enumeration takes tens of seconds on some changers, so the last
//! scan result is kept as a small JSON blob and served until a rescan is
//! requested.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapeflow_core::{Result, TapeflowError};
use tracing::{debug, instrument};

/// One device found by the last scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDevice {
    pub device_path: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub loaded_tape_id: Option<String>,
}

/// The cached scan result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceScan {
    pub scanned_at: Option<DateTime<Utc>>,
    pub devices: Vec<CachedDevice>,
}

/// File-backed device scan cache
#[derive(Debug, Clone)]
pub struct DeviceScanCache {
    path: PathBuf,
}

impl DeviceScanCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the cached scan; a missing file is an empty scan
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self) -> Result<DeviceScan> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| TapeflowError::Deserialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceScan::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a fresh scan result
    #[instrument(level = "debug", skip(self, scan))]
    pub async fn store(&self, scan: &DeviceScan) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(scan)?;
        tokio::fs::write(&self.path, bytes).await?;
        debug!("✅ Cached device scan with {} device(s)", scan.devices.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_cache_is_empty() {
        let dir = tempdir().unwrap();
        let cache = DeviceScanCache::new(dir.path().join("devices.json"));

        let scan = cache.load().await.unwrap();
        assert!(scan.scanned_at.is_none());
        assert!(scan.devices.is_empty());
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempdir().unwrap();
        let cache = DeviceScanCache::new(dir.path().join("cache/devices.json"));

        let scan = DeviceScan {
            scanned_at: Some(Utc::now()),
            devices: vec![CachedDevice {
                device_path: "/dev/nst0".to_string(),
                vendor: Some("IBM".to_string()),
                model: Some("ULT3580-TD9".to_string()),
                serial_number: Some("10WT012345".to_string()),
                loaded_tape_id: None,
            }],
        };
        cache.store(&scan).await.unwrap();

        let loaded = cache.load().await.unwrap();
        assert_eq!(loaded.devices, scan.devices);
        assert!(loaded.scanned_at.is_some());
    }
}
