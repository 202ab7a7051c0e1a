//! File-group prefetcher
//!
//! Produces a lazy, finite stream of grouped pending files so compression
//! throughput is decoupled from database latency. The hand-off queue is a
//! bounded channel of capacity 2: the group being compressed plus the next
//! one. End of stream is a dedicated sentinel pushed once the full sweep
//! finds nothing undelivered and the external file scanner reports
//! completion.
//!
//! The at-most-once delivery discipline lives here: every delivered file id
//! is remembered for the lifetime of the run, so cursor resets and the
//! defensive full sweep can never hand the compressor a file twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tapeflow_core::ScanStatus;
use tapeflow_db::backup_files::group_files_by_size;
use tapeflow_db::models::FileRecord;

use crate::store::PipelineStore;

/// Queue capacity: the group being compressed plus the prefetched one
pub const QUEUE_CAPACITY: usize = 2;

/// Element of the hand-off queue
#[derive(Debug, Clone)]
pub enum FileBatch {
    /// One fetch worth of size-budgeted groups
    Groups {
        groups: Vec<Vec<FileRecord>>,
        last_id: i64,
    },
    /// The stream is finite and drained
    EndOfStream,
}

/// Prefetcher tuning knobs
#[derive(Debug, Clone)]
pub struct PrefetcherConfig {
    /// Size budget per group in bytes
    pub max_group_bytes: i64,
    /// Minimum gap between defensive full sweeps; zero sweeps on every
    /// empty fetch
    pub sweep_interval: Duration,
    /// Sleep while the file scanner is still discovering files
    pub idle_wait: Duration,
    /// Sleep after a store error before retrying
    pub error_backoff: Duration,
    /// Empty fetches tolerated before small batches are delivered anyway
    pub max_wait_retries: u32,
}

impl Default for PrefetcherConfig {
    fn default() -> Self {
        Self {
            max_group_bytes: 8 * 1024 * 1024 * 1024,
            sweep_interval: Duration::ZERO,
            idle_wait: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            max_wait_retries: 6,
        }
    }
}

/// Counters reported when the producer loop ends
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefetchStats {
    pub loops: u64,
    pub prefetched_groups: u64,
    pub total_retrieval_time: Duration,
}

/// Consumer side of the hand-off queue
pub struct PrefetcherHandle {
    rx: mpsc::Receiver<FileBatch>,
    join: JoinHandle<PrefetchStats>,
}

impl PrefetcherHandle {
    /// Pop the next batch. `None` means the producer stopped without a
    /// sentinel (cancellation).
    pub async fn recv(&mut self) -> Option<FileBatch> {
        self.rx.recv().await
    }

    /// Pop with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<FileBatch> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait for the producer loop to finish and collect its counters
    pub async fn join(self) -> PrefetchStats {
        self.join.await.unwrap_or_default()
    }
}

/// Spawn the prefetcher producer for one backup set
#[instrument(level = "debug", skip(store, config, cancel))]
pub fn spawn_prefetcher(
    store: Arc<dyn PipelineStore>,
    backup_set_pk: i64,
    backup_task_id: i64,
    config: PrefetcherConfig,
    cancel: CancellationToken,
) -> PrefetcherHandle {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    let join = tokio::spawn(async move {
        info!(
            "🚀 Prefetch loop started: backup_set={}, backup_task={}",
            backup_set_pk, backup_task_id
        );
        let stats = prefetch_loop(store, backup_set_pk, backup_task_id, config, cancel, tx).await;
        info!(
            "🛑 Prefetch loop ended: {} loops, {} groups, {:?} retrieving",
            stats.loops, stats.prefetched_groups, stats.total_retrieval_time
        );
        stats
    });

    PrefetcherHandle { rx, join }
}

async fn prefetch_loop(
    store: Arc<dyn PipelineStore>,
    backup_set_pk: i64,
    backup_task_id: i64,
    config: PrefetcherConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<FileBatch>,
) -> PrefetchStats {
    let mut stats = PrefetchStats::default();
    let mut cursor: i64 = 0;
    let mut wait_retries: u32 = 0;
    let mut last_sweep: Option<Instant> = None;
    // every file id ever handed to the compressor in this run
    let mut delivered: HashSet<i64> = HashSet::new();

    while !cancel.is_cancelled() {
        stats.loops += 1;

        let started = Instant::now();
        let wait_if_small = wait_retries < config.max_wait_retries;
        let fetched = store
            .fetch_pending_groups(backup_set_pk, config.max_group_bytes, cursor, wait_if_small)
            .await;
        stats.total_retrieval_time += started.elapsed();

        let (groups, new_cursor) = match fetched {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "⚠️ Prefetch fetch failed for set {} (retrying in {:?}): {}",
                    backup_set_pk, config.error_backoff, e
                );
                if sleep_cancellable(&cancel, config.error_backoff).await {
                    break;
                }
                continue;
            }
        };

        // a zero cursor from the store while ours is positive means rows
        // exist at or below our cursor; restart from the beginning
        if new_cursor == 0 && cursor > 0 {
            warn!(
                "⚠️ Cursor anomaly for set {}: resetting {} -> 0",
                backup_set_pk, cursor
            );
            cursor = 0;
            continue;
        }

        // after a reset the fetch re-reads rows that are already with the
        // compressor; those must never go out twice
        let fresh: Vec<FileRecord> = groups
            .into_iter()
            .flatten()
            .filter(|f| !delivered.contains(&f.id))
            .collect();

        if !fresh.is_empty() {
            if new_cursor > cursor {
                debug!("🔧 Cursor advanced {} -> {}", cursor, new_cursor);
                cursor = new_cursor;
            }
            delivered.extend(fresh.iter().map(|f| f.id));
            let regrouped = group_files_by_size(fresh, config.max_group_bytes);
            stats.prefetched_groups += regrouped.len() as u64;
            wait_retries = 0;

            let batch = FileBatch::Groups {
                groups: regrouped,
                last_id: new_cursor,
            };
            // bounded send: parks here while two batches are in flight,
            // keeping the CPU idle under backpressure
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        debug!("Consumer dropped the queue, stopping prefetch");
                        break;
                    }
                }
            }
            continue;
        }

        // everything re-fetched was already in flight: move the cursor past
        // it and let the compressor catch up
        if new_cursor > cursor {
            cursor = new_cursor;
            if sleep_cancellable(&cancel, config.idle_wait).await {
                break;
            }
            continue;
        }

        wait_retries = wait_retries.saturating_add(1);

        // nothing beyond the cursor: run the defensive full sweep before
        // trusting the scan-status handshake
        let sweep_due = last_sweep
            .map(|at| at.elapsed() >= config.sweep_interval)
            .unwrap_or(true);
        if sweep_due {
            match store.sweep_pending(backup_set_pk).await {
                Ok(pending_ids) => {
                    last_sweep = Some(Instant::now());
                    let missed = pending_ids
                        .iter()
                        .filter(|id| !delivered.contains(id))
                        .count();
                    if missed > 0 {
                        warn!(
                            "⚠️ Full sweep found {} missed pending file(s) for set {}, resetting cursor",
                            missed, backup_set_pk
                        );
                        cursor = 0;
                        if sleep_cancellable(&cancel, Duration::from_secs(1)).await {
                            break;
                        }
                        continue;
                    }
                    if !pending_ids.is_empty() {
                        // only in-flight files remain; wait for the
                        // compressor to mark them
                        if sleep_cancellable(&cancel, config.idle_wait).await {
                            break;
                        }
                        continue;
                    }
                }
                Err(e) => {
                    error!("❌ Full sweep failed for set {}: {}", backup_set_pk, e);
                    if sleep_cancellable(&cancel, config.error_backoff).await {
                        break;
                    }
                    continue;
                }
            }
        }

        match store.scan_status(backup_task_id).await {
            Ok(ScanStatus::Completed) => {
                info!(
                    "✅ Scan complete and no pending files remain for set {}, ending stream",
                    backup_set_pk
                );
                let _ = tx.send(FileBatch::EndOfStream).await;
                break;
            }
            Ok(status) => {
                debug!(
                    "🔧 File scanner still {} for task {}, waiting {:?}",
                    status, backup_task_id, config.idle_wait
                );
                if sleep_cancellable(&cancel, config.idle_wait).await {
                    break;
                }
            }
            Err(e) => {
                warn!("⚠️ Scan status read failed for task {}: {}", backup_task_id, e);
                if sleep_cancellable(&cancel, config.error_backoff).await {
                    break;
                }
            }
        }
    }

    stats
}

/// Sleep unless cancelled first; returns `true` when cancelled
async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    fn quick_config(max_group_bytes: i64) -> PrefetcherConfig {
        PrefetcherConfig {
            max_group_bytes,
            sweep_interval: Duration::ZERO,
            idle_wait: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            max_wait_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_delivers_groups_then_sentinel() {
        let store = Arc::new(MemoryStore::new(vec![
            MemoryStore::file(1, "/data/a", 40),
            MemoryStore::file(2, "/data/b", 40),
            MemoryStore::file(3, "/data/c", 40),
        ]));
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        let batch = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        let delivered = match batch {
            FileBatch::Groups { groups, last_id } => {
                assert_eq!(last_id, 3);
                groups.into_iter().flatten().count()
            }
            FileBatch::EndOfStream => panic!("sentinel before data"),
        };
        assert_eq!(delivered, 3);

        // in-flight files never come out of the queue twice, and once they
        // are marked copied the sentinel follows
        for path in ["/data/a", "/data/b", "/data/c"] {
            store
                .mark_files_copied(1, &[path.to_string()], 1)
                .await
                .unwrap();
        }

        let batch = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(batch, FileBatch::EndOfStream));

        let stats = handle.join().await;
        assert_eq!(stats.prefetched_groups, 2);
    }

    #[tokio::test]
    async fn test_waits_for_scanner_before_sentinel() {
        let store = Arc::new(MemoryStore::new(Vec::new()));
        store.set_scan_status(ScanStatus::Scanning);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        // scanner still running: no sentinel yet
        assert!(handle.recv_timeout(Duration::from_millis(50)).await.is_none());

        store.set_scan_status(ScanStatus::Completed);
        let batch = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(batch, FileBatch::EndOfStream));
        handle.join().await;
    }

    #[tokio::test]
    async fn test_full_sweep_recovers_missed_files() {
        let store = Arc::new(MemoryStore::new(vec![MemoryStore::file(5, "/data/e", 60)]));
        store.set_scan_status(ScanStatus::Scanning);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        // first delivery moves the cursor to 5
        let first = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(first, FileBatch::Groups { last_id: 5, .. }));
        store
            .mark_files_copied(1, &["/data/e".to_string()], 1)
            .await
            .unwrap();

        // a racing scanner commits a row below the cursor; the sweep must
        // bring the cursor back and deliver exactly that file
        store.add_file(MemoryStore::file(2, "/data/late", 60));

        let recovered = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        match recovered {
            FileBatch::Groups { groups, .. } => {
                let paths: Vec<_> = groups
                    .into_iter()
                    .flatten()
                    .map(|f| f.file_path)
                    .collect();
                assert_eq!(paths, ["/data/late"]);
            }
            FileBatch::EndOfStream => panic!("missed file was never delivered"),
        }

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_in_flight_files_are_not_redelivered() {
        let store = Arc::new(MemoryStore::new(vec![
            MemoryStore::file(1, "/data/a", 60),
            MemoryStore::file(2, "/data/b", 60),
        ]));
        store.set_scan_status(ScanStatus::Scanning);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        let first = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        let first_count = match first {
            FileBatch::Groups { groups, .. } => groups.into_iter().flatten().count(),
            FileBatch::EndOfStream => panic!("sentinel before data"),
        };
        assert_eq!(first_count, 2);

        // nothing is marked copied yet; the producer keeps sweeping but the
        // in-flight rows must not reappear in the queue
        assert!(handle.recv_timeout(Duration::from_millis(100)).await.is_none());

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_store_errors_are_retried_until_cancel() {
        let store = Arc::new(MemoryStore::new(vec![MemoryStore::file(1, "/data/a", 60)]));
        store.fail_next_fetches(2);
        store.set_scan_status(ScanStatus::Completed);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        // the two injected failures are absorbed, the data still arrives
        let batch = handle.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(batch, FileBatch::Groups { .. }));

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_producer_without_sentinel() {
        let store = Arc::new(MemoryStore::new(Vec::new()));
        store.set_scan_status(ScanStatus::Pending);

        let cancel = CancellationToken::new();
        let mut handle =
            spawn_prefetcher(store.clone(), 1, 1, quick_config(100), cancel.clone());

        cancel.cancel();
        // channel closes with no sentinel
        assert!(handle.recv_timeout(Duration::from_secs(2)).await.is_none());
        handle.join().await;
    }
}
