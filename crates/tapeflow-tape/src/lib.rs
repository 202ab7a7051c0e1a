//! TapeFlow Tape Subsystem Interface
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! The tape device (load/unload/format/MAM access) lives in an external
//! library; this crate defines the interface the backup pipeline talks to.
//! The tape mover stage enqueues archive moves here and receives the outcome
//! asynchronously. Device bookkeeping (cartridge `used_bytes`) is the tape
//! side's responsibility, never the pipeline's.

#![forbid(unsafe_code)]

pub mod device_cache;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tapeflow_core::{Result, TapeflowError};
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

/// One archive queued for a tape write
#[derive(Debug, Clone)]
pub struct TapeMoveRequest {
    /// Staged archive in `final/{set_id}/`
    pub archive_path: PathBuf,
    /// External set id, doubles as the staging directory name
    pub set_id: String,
    /// Numeric backup set id for bookkeeping callbacks
    pub backup_set_pk: i64,
    /// Target device from the backup template, if pinned
    pub tape_device: Option<String>,
    /// Archive index within the set, parsed from the file name
    pub chunk_number: Option<i32>,
}

/// Completion report delivered by the tape writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The archive is on tape at the given path
    Written { tape_path: String },
    /// The write failed; the archive remains staged
    Failed { error: String },
}

/// The tape writer the mover stage enqueues to. The device is a singleton
/// owned by the tape subsystem; callers never touch it directly.
#[async_trait]
pub trait TapeFileMover: Send + Sync {
    /// Queue an archive move. The returned receiver resolves once the tape
    /// writer has finished with the file.
    async fn enqueue(&self, request: TapeMoveRequest) -> Result<oneshot::Receiver<MoveOutcome>>;
}

/// Tape mover that drains archives onto a mounted LTFS volume. This is the
/// stand-in used when the external tape service is not deployed; it moves
/// files with the same queue discipline the real writer uses.
#[derive(Debug)]
pub struct LtfsVolumeMover {
    volume_root: PathBuf,
}

impl LtfsVolumeMover {
    /// Create a mover targeting a mounted volume root, e.g. `O:` or
    /// `/mnt/ltfs`.
    pub fn new(volume_root: impl Into<PathBuf>) -> Self {
        Self {
            volume_root: volume_root.into(),
        }
    }

    /// Conventional mount path for a drive letter
    pub fn for_drive_letter(letter: &str) -> Self {
        Self::new(PathBuf::from(format!("/mnt/ltfs/{}", letter)))
    }
}

#[async_trait]
impl TapeFileMover for LtfsVolumeMover {
    #[instrument(level = "debug", skip(self, request), fields(set_id = %request.set_id))]
    async fn enqueue(&self, request: TapeMoveRequest) -> Result<oneshot::Receiver<MoveOutcome>> {
        let (tx, rx) = oneshot::channel();
        let target_dir = self.volume_root.join(&request.set_id);
        let archive_path = request.archive_path.clone();

        tokio::spawn(async move {
            let outcome = match move_archive(&archive_path, &target_dir).await {
                Ok(tape_path) => {
                    info!("✅ Archive moved to tape volume: {}", tape_path);
                    MoveOutcome::Written { tape_path }
                }
                Err(e) => {
                    warn!("❌ Archive move failed for {:?}: {}", archive_path, e);
                    MoveOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            // receiver may be gone on shutdown
            let _ = tx.send(outcome);
        });

        Ok(rx)
    }
}

async fn move_archive(archive_path: &Path, target_dir: &Path) -> Result<String> {
    let file_name = archive_path
        .file_name()
        .ok_or_else(|| TapeflowError::Tape(format!("archive has no file name: {:?}", archive_path)))?;

    tokio::fs::create_dir_all(target_dir).await?;
    let target = target_dir.join(file_name);

    // rename within one filesystem, copy+remove across mounts
    match tokio::fs::rename(archive_path, &target).await {
        Ok(()) => {}
        Err(_) => {
            tokio::fs::copy(archive_path, &target).await?;
            tokio::fs::remove_file(archive_path).await?;
        }
    }

    Ok(target.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_volume_mover_moves_archive() {
        let staging = tempdir().unwrap();
        let volume = tempdir().unwrap();

        let archive = staging.path().join("backup_bs-1_20260101_000000_1.tar.gz");
        tokio::fs::write(&archive, b"archive bytes").await.unwrap();

        let mover = LtfsVolumeMover::new(volume.path());
        let rx = mover
            .enqueue(TapeMoveRequest {
                archive_path: archive.clone(),
                set_id: "bs-1".to_string(),
                backup_set_pk: 1,
                tape_device: None,
                chunk_number: Some(1),
            })
            .await
            .unwrap();

        match rx.await.unwrap() {
            MoveOutcome::Written { tape_path } => {
                assert!(tape_path.contains("bs-1"));
                assert!(!archive.exists());
                assert!(volume
                    .path()
                    .join("bs-1")
                    .join("backup_bs-1_20260101_000000_1.tar.gz")
                    .exists());
            }
            MoveOutcome::Failed { error } => panic!("move failed: {}", error),
        }
    }

    #[tokio::test]
    async fn test_volume_mover_reports_missing_archive() {
        let volume = tempdir().unwrap();
        let mover = LtfsVolumeMover::new(volume.path());

        let rx = mover
            .enqueue(TapeMoveRequest {
                archive_path: PathBuf::from("/nonexistent/archive.tar.gz"),
                set_id: "bs-2".to_string(),
                backup_set_pk: 2,
                tape_device: None,
                chunk_number: None,
            })
            .await
            .unwrap();

        assert!(matches!(rx.await.unwrap(), MoveOutcome::Failed { .. }));
    }
}
