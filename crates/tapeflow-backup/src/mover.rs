//! Tape-mover stage
//!
//! A background scanner over `{compress_dir}/final/{set_id}/`: every new
//! archive is enqueued to the tape writer exactly once per process
//! lifetime, keyed `"{set_id}/{file}"`. Outcomes arrive asynchronously from
//! the tape side; cartridge bookkeeping stays over there.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tapeflow_core::Result;
use tapeflow_tape::{MoveOutcome, TapeFileMover, TapeMoveRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::archive::parse_chunk_number;
use crate::store::PipelineStore;

const ARCHIVE_EXTENSIONS: [&str; 5] = [".7z", ".tar", ".gz", ".zst", ".tar.gz"];

fn is_archive_file(name: &str) -> bool {
    ARCHIVE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Scanner over the `final/` staging tree
pub struct TapeMoverWorker {
    store: Arc<dyn PipelineStore>,
    mover: Arc<dyn TapeFileMover>,
    final_root: PathBuf,
    processed: HashSet<String>,
}

impl TapeMoverWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        mover: Arc<dyn TapeFileMover>,
        final_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            mover,
            final_root: final_root.into(),
            processed: HashSet::new(),
        }
    }

    /// Run one scan pass; returns how many archives were newly enqueued
    #[instrument(level = "debug", skip(self))]
    pub async fn scan_once(&mut self) -> Result<usize> {
        let mut found: Vec<(String, PathBuf)> = Vec::new();

        let mut root = match tokio::fs::read_dir(&self.final_root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("final dir {:?} does not exist yet", self.final_root);
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = root.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let set_id = entry.file_name().to_string_lossy().into_owned();

            let mut set_dir = tokio::fs::read_dir(entry.path()).await?;
            while let Some(file) = set_dir.next_entry().await? {
                if !file.file_type().await?.is_file() {
                    continue;
                }
                let name = file.file_name().to_string_lossy().into_owned();
                if !is_archive_file(&name) {
                    continue;
                }
                let key = format!("{}/{}", set_id, name);
                if !self.processed.contains(&key) {
                    found.push((set_id.clone(), file.path()));
                }
            }
        }

        if found.is_empty() {
            return Ok(0);
        }
        // directory order is arbitrary; feed the writer in name (= chunk)
        // order
        found.sort_by(|a, b| a.1.cmp(&b.1));
        info!("🔍 Found {} new archive(s) awaiting tape move", found.len());

        let mut enqueued = 0;
        for (set_id, path) in found {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = format!("{}/{}", set_id, name);

            let backup_set = match self.store.set_by_set_id(&set_id).await {
                Ok(Some(set)) => set,
                Ok(None) => {
                    // unknown set directory: stop retrying it forever
                    warn!(
                        "⚠️ No backup set found for staged archive {:?}, skipping permanently",
                        path
                    );
                    self.processed.insert(key);
                    continue;
                }
                Err(e) => {
                    warn!("⚠️ Backup set lookup failed for {}: {}", set_id, e);
                    continue;
                }
            };

            let request = TapeMoveRequest {
                archive_path: path.clone(),
                set_id: set_id.clone(),
                backup_set_pk: backup_set.id,
                tape_device: None,
                chunk_number: parse_chunk_number(&name),
            };

            match self.mover.enqueue(request).await {
                Ok(outcome_rx) => {
                    self.processed.insert(key.clone());
                    enqueued += 1;
                    tokio::spawn(await_outcome(key, path, outcome_rx));
                }
                Err(e) => {
                    warn!("⚠️ Could not enqueue {:?} for tape move: {}", path, e);
                }
            }
        }

        Ok(enqueued)
    }
}

async fn await_outcome(
    key: String,
    path: PathBuf,
    outcome_rx: tokio::sync::oneshot::Receiver<MoveOutcome>,
) {
    match outcome_rx.await {
        Ok(MoveOutcome::Written { tape_path }) => {
            info!("✅ Archive {} written to tape: {}", key, tape_path);
        }
        Ok(MoveOutcome::Failed { error }) => {
            warn!("❌ Tape write failed for {} ({:?}): {}", key, path, error);
        }
        Err(_) => {
            warn!("⚠️ Tape writer dropped the outcome channel for {}", key);
        }
    }
}

/// Spawn the periodic scanner
pub fn spawn_mover(
    store: Arc<dyn PipelineStore>,
    mover: Arc<dyn TapeFileMover>,
    final_root: impl Into<PathBuf>,
    scan_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut worker = TapeMoverWorker::new(store, mover, final_root);

    tokio::spawn(async move {
        info!("🚀 Tape mover scanner started over {:?}", worker.final_root);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(scan_interval) => {}
            }
            if let Err(e) = worker.scan_once().await {
                warn!("⚠️ Tape mover scan failed: {}", e);
            }
        }
        info!("🛑 Tape mover scanner stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct RecordingMover {
        requests: Mutex<Vec<TapeMoveRequest>>,
    }

    impl RecordingMover {
        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn chunk_numbers(&self) -> Vec<Option<i32>> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.chunk_number)
                .collect()
        }
    }

    #[async_trait]
    impl TapeFileMover for RecordingMover {
        async fn enqueue(
            &self,
            request: TapeMoveRequest,
        ) -> tapeflow_core::Result<oneshot::Receiver<MoveOutcome>> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = oneshot::channel();
            tx.send(MoveOutcome::Written {
                tape_path: "tape://T001/file".to_string(),
            })
            .ok();
            Ok(rx)
        }
    }

    fn stage_archive(root: &Path, set_id: &str, name: &str) {
        let dir = root.join(set_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), b"archive").unwrap();
    }

    #[tokio::test]
    async fn test_scan_enqueues_each_archive_once() {
        let staging = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(Vec::new()));
        store.add_set("bs-1", 1);
        let mover = Arc::new(RecordingMover::default());

        stage_archive(staging.path(), "bs-1", "backup_bs-1_20260301_021530_1.tar.gz");
        stage_archive(staging.path(), "bs-1", "backup_bs-1_20260301_021545_2.tar.gz");
        // not an archive: ignored
        stage_archive(staging.path(), "bs-1", "manifest.json");

        let mut worker = TapeMoverWorker::new(store.clone(), mover.clone(), staging.path());

        assert_eq!(worker.scan_once().await.unwrap(), 2);
        assert_eq!(mover.request_count(), 2);
        assert_eq!(mover.chunk_numbers(), [Some(1), Some(2)]);

        // a second pass over the same tree enqueues nothing
        assert_eq!(worker.scan_once().await.unwrap(), 0);
        assert_eq!(mover.request_count(), 2);

        // a newly staged archive is picked up
        stage_archive(staging.path(), "bs-1", "backup_bs-1_20260301_021600_3.tar.gz");
        assert_eq!(worker.scan_once().await.unwrap(), 1);
        assert_eq!(mover.request_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_set_is_skipped_permanently() {
        let staging = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let mover = Arc::new(RecordingMover::default());

        stage_archive(staging.path(), "ghost-set", "backup_ghost-set_20260301_021530_1.tar.gz");

        let mut worker = TapeMoverWorker::new(store.clone(), mover.clone(), staging.path());

        assert_eq!(worker.scan_once().await.unwrap(), 0);
        assert_eq!(mover.request_count(), 0);
        // it does not come back on later scans either
        assert_eq!(worker.scan_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_final_dir_is_quiet() {
        let staging = tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let mover = Arc::new(RecordingMover::default());

        let mut worker = TapeMoverWorker::new(
            store,
            mover,
            staging.path().join("does-not-exist"),
        );
        assert_eq!(worker.scan_once().await.unwrap(), 0);
    }
}
