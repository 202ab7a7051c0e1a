//! Compressor stage
//!
//! Consumes file groups from the prefetcher, packs each into an archive in
//! the staging work dir, renames it into `final/` and marks the group's
//! files copied in one go. Chunk numbers are allocated monotonically in
//! consumption order. A group gets a bounded number of attempts; exhausting
//! them fails the whole pipeline run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tapeflow_core::{ArchiveCodec, Result, TapeflowError};
use tapeflow_db::models::FileRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::archive::{archive_file_name, write_archive, ArchiveRequest};
use crate::prefetcher::{FileBatch, PrefetcherHandle};
use crate::store::PipelineStore;

/// Compressor tuning knobs
#[derive(Debug, Clone)]
pub struct CompressorConfig {
    pub codec: ArchiveCodec,
    pub work_dir: PathBuf,
    pub final_dir: PathBuf,
    /// Attempts per group before the run is failed
    pub retries: u32,
    /// Sleep between attempts
    pub backoff: Duration,
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressStats {
    pub archives_written: u32,
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub bytes_compressed: u64,
}

/// Whether the stage drained the stream or was asked to stop early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressEnd {
    /// End-of-stream sentinel consumed; the set is complete
    Drained,
    /// Cancellation or producer shutdown before the sentinel
    Stopped,
}

/// The compressor worker for one backup execution
pub struct CompressorStage {
    store: Arc<dyn PipelineStore>,
    config: CompressorConfig,
    backup_set_pk: i64,
    backup_task_id: i64,
    next_chunk: u32,
}

impl CompressorStage {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        config: CompressorConfig,
        backup_set_pk: i64,
        backup_task_id: i64,
    ) -> Self {
        Self {
            store,
            config,
            backup_set_pk,
            backup_task_id,
            next_chunk: 1,
        }
    }

    /// Consume the prefetcher stream to completion, cancellation or failure
    #[instrument(level = "debug", skip(self, handle, cancel), fields(backup_set = self.backup_set_pk))]
    pub async fn run(
        &mut self,
        handle: &mut PrefetcherHandle,
        cancel: &CancellationToken,
        set_id: &str,
    ) -> Result<(CompressStats, CompressEnd)> {
        let mut stats = CompressStats::default();

        loop {
            if cancel.is_cancelled() {
                info!("🛑 Compressor stopping on cancellation (set {})", set_id);
                return Ok((stats, CompressEnd::Stopped));
            }

            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Compressor stopping on cancellation (set {})", set_id);
                    return Ok((stats, CompressEnd::Stopped));
                }
                batch = handle.recv() => batch,
            };

            match batch {
                None => {
                    debug!("Prefetcher closed the queue without a sentinel");
                    return Ok((stats, CompressEnd::Stopped));
                }
                Some(FileBatch::EndOfStream) => {
                    info!(
                        "✅ Compressor drained the stream for set {}: {} archive(s)",
                        set_id, stats.archives_written
                    );
                    return Ok((stats, CompressEnd::Drained));
                }
                Some(FileBatch::Groups { groups, .. }) => {
                    for group in groups {
                        // an in-progress archive always finishes; only the
                        // boundary between groups observes cancellation
                        self.compress_group(set_id, group, &mut stats, cancel).await?;
                        if cancel.is_cancelled() {
                            return Ok((stats, CompressEnd::Stopped));
                        }
                    }
                }
            }
        }
    }

    async fn compress_group(
        &mut self,
        set_id: &str,
        group: Vec<FileRecord>,
        stats: &mut CompressStats,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if group.is_empty() {
            return Ok(());
        }

        let chunk_number = self.next_chunk;
        self.next_chunk += 1;

        let group_bytes: i64 = group.iter().map(|f| f.file_size).sum();
        let paths: Vec<String> = group.iter().map(|f| f.file_path.clone()).collect();

        let mut attempt = 1;
        loop {
            let request = ArchiveRequest {
                work_dir: self.config.work_dir.clone(),
                final_dir: self.config.final_dir.clone(),
                file_name: archive_file_name(set_id, Utc::now(), chunk_number, self.config.codec),
                codec: self.config.codec,
            };

            let started = std::time::Instant::now();
            match write_archive(&request, &group).await {
                Ok(summary) => {
                    histogram!("backup.compress.archive.time", started.elapsed());
                    counter!("backup.compress.archives", 1);

                    self.store
                        .complete_group(
                            self.backup_set_pk,
                            self.backup_task_id,
                            &paths,
                            chunk_number as i32,
                            group_bytes,
                            summary.compressed_bytes as i64,
                        )
                        .await?;

                    stats.archives_written += 1;
                    stats.files_processed += group.len() as u64;
                    stats.bytes_processed += group_bytes.max(0) as u64;
                    stats.bytes_compressed += summary.compressed_bytes;

                    info!(
                        "✅ Chunk {} of set {}: {} file(s), {} -> {} bytes",
                        chunk_number,
                        set_id,
                        summary.file_count,
                        summary.uncompressed_bytes,
                        summary.compressed_bytes
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.config.retries => {
                    warn!(
                        "⚠️ Archive attempt {}/{} failed for chunk {} of set {}: {}",
                        attempt, self.config.retries, chunk_number, set_id, e
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(TapeflowError::Compression(format!(
                                "chunk {} cancelled during retry backoff",
                                chunk_number
                            )));
                        }
                        _ = tokio::time::sleep(self.config.backoff) => {}
                    }
                }
                Err(e) => {
                    counter!("backup.compress.failures", 1);
                    return Err(TapeflowError::Compression(format!(
                        "chunk {} of set {} failed after {} attempt(s): {}",
                        chunk_number, set_id, self.config.retries, e
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefetcher::{spawn_prefetcher, PrefetcherConfig};
    use crate::test_support::MemoryStore;
    use tapeflow_core::ScanStatus;
    use tempfile::tempdir;

    fn stage_config(staging: &std::path::Path) -> CompressorConfig {
        CompressorConfig {
            codec: ArchiveCodec::TarGz,
            work_dir: staging.join("work/bs-1"),
            final_dir: staging.join("final/bs-1"),
            retries: 3,
            backoff: Duration::from_millis(5),
        }
    }

    fn prefetch_config() -> PrefetcherConfig {
        PrefetcherConfig {
            max_group_bytes: 64,
            sweep_interval: Duration::ZERO,
            idle_wait: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            max_wait_retries: 0,
        }
    }

    fn write_source_files(dir: &std::path::Path, names: &[&str]) -> Vec<FileRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let path = dir.join(name);
                let content = format!("content of {}", name);
                std::fs::write(&path, &content).unwrap();
                MemoryStore::file((i + 1) as i64, path.to_str().unwrap(), content.len() as i64)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_end_to_end_compress_marks_and_counts() {
        let source = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let files = write_source_files(source.path(), &["a.txt", "b.txt", "c.txt"]);
        let total_bytes: i64 = files.iter().map(|f| f.file_size).sum();

        let store = Arc::new(MemoryStore::new(files));
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, prefetch_config(), cancel.clone());
        let mut compressor =
            CompressorStage::new(store.clone(), stage_config(staging.path()), 1, 1);

        let (stats, end) = compressor.run(&mut handle, &cancel, "bs-1").await.unwrap();
        assert_eq!(end, CompressEnd::Drained);
        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.bytes_processed as i64, total_bytes);
        assert!(stats.archives_written >= 1);
        assert!(stats.bytes_compressed > 0);

        // every file is marked copied with a chunk number
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.copied_paths().len(), 3);

        // progress counters match the stats
        let (files_done, bytes_done, compressed) = store.progress();
        assert_eq!(files_done, 3);
        assert_eq!(bytes_done, total_bytes);
        assert_eq!(compressed as u64, stats.bytes_compressed);

        // archives landed in final/, nothing left in work/
        let final_entries = std::fs::read_dir(staging.path().join("final/bs-1"))
            .unwrap()
            .count();
        assert_eq!(final_entries as u32, stats.archives_written);
        let work_entries = std::fs::read_dir(staging.path().join("work/bs-1"))
            .unwrap()
            .count();
        assert_eq!(work_entries, 0);

        handle.join().await;
    }

    #[tokio::test]
    async fn test_chunk_numbers_are_monotonic() {
        let source = tempdir().unwrap();
        let staging = tempdir().unwrap();
        // each file is big enough (vs the 64-byte budget) to become its own
        // group, so several chunks get written
        let files = write_source_files(
            source.path(),
            &["long-file-one.txt", "long-file-two.txt", "long-file-three.txt"],
        );
        let paths: Vec<String> = files.iter().map(|f| f.file_path.clone()).collect();

        let store = Arc::new(MemoryStore::new(files));
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut config = prefetch_config();
        config.max_group_bytes = 20;
        let mut handle = spawn_prefetcher(store.clone(), 1, 1, config, cancel.clone());
        let mut compressor =
            CompressorStage::new(store.clone(), stage_config(staging.path()), 1, 1);

        let (stats, end) = compressor.run(&mut handle, &cancel, "bs-1").await.unwrap();
        assert_eq!(end, CompressEnd::Drained);
        assert_eq!(stats.archives_written, 3);

        let chunks: Vec<i32> = paths
            .iter()
            .map(|p| store.chunk_of(p).unwrap())
            .collect();
        assert_eq!(chunks, [1, 2, 3]);

        handle.join().await;
    }

    #[tokio::test]
    async fn test_retry_then_succeed_leaves_no_half_marked_group() {
        let source = tempdir().unwrap();
        let staging = tempdir().unwrap();

        // one group of three files; the first member is missing on disk at
        // first, so attempt 1 fails before any row is marked
        let mut files = write_source_files(source.path(), &["x.txt", "y.txt"]);
        let ghost_path = source.path().join("ghost.txt");
        files.insert(
            0,
            MemoryStore::file(3, ghost_path.to_str().unwrap(), 10),
        );

        let store = Arc::new(MemoryStore::new(files));
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut config = prefetch_config();
        config.max_group_bytes = 1024;
        let mut handle = spawn_prefetcher(store.clone(), 1, 1, config, cancel.clone());

        let mut stage_cfg = stage_config(staging.path());
        stage_cfg.backoff = Duration::from_millis(30);
        let mut compressor = CompressorStage::new(store.clone(), stage_cfg, 1, 1);

        // materialize the missing file during the retry backoff
        let heal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            std::fs::write(&ghost_path, b"now i exist").unwrap();
        });

        let (stats, end) = compressor.run(&mut handle, &cancel, "bs-1").await.unwrap();
        heal.await.unwrap();

        assert_eq!(end, CompressEnd::Drained);
        assert_eq!(stats.archives_written, 1);
        // the first (failed) attempt marked nothing; after the successful
        // retry the whole group is marked exactly once
        assert_eq!(store.mark_calls(), 1);
        assert_eq!(store.pending_count(), 0);

        handle.join().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run() {
        let staging = tempdir().unwrap();

        let store = Arc::new(MemoryStore::new(vec![MemoryStore::file(
            1,
            "/nonexistent/never.txt",
            10,
        )]));
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, prefetch_config(), cancel.clone());
        let mut compressor =
            CompressorStage::new(store.clone(), stage_config(staging.path()), 1, 1);

        let err = compressor
            .run(&mut handle, &cancel, "bs-1")
            .await
            .unwrap_err();
        assert!(matches!(err, TapeflowError::Compression(_)));
        // files stay pending and retrievable
        assert_eq!(store.pending_count(), 1);

        cancel.cancel();
        handle.join().await;
    }
}
