//! In-memory pipeline store for stage tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tapeflow_core::{
    BackupSetStatus, BackupTaskType, FileKind, Result, ScanStatus, TapeflowError,
};
use tapeflow_db::backup_files::group_files_by_size;
use tapeflow_db::models::{BackupSet, FileRecord};

use crate::store::PipelineStore;

pub(crate) struct MemFile {
    pub record: FileRecord,
    pub copied: bool,
    pub chunk: Option<i32>,
}

#[derive(Default)]
struct MemoryInner {
    files: Vec<MemFile>,
    scan: Option<ScanStatus>,
    progress: (i64, i64, i64),
    sets: HashMap<String, BackupSet>,
    mark_calls: Vec<(Vec<String>, i32)>,
    fetch_failures: u32,
}

/// In-memory stand-in for the PostgreSQL store, mirroring its cursor and
/// wait-if-small semantics
pub(crate) struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new(files: Vec<FileRecord>) -> Self {
        let inner = MemoryInner {
            files: files
                .into_iter()
                .map(|record| MemFile {
                    record,
                    copied: false,
                    chunk: None,
                })
                .collect(),
            scan: Some(ScanStatus::Scanning),
            ..Default::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn file(id: i64, path: &str, size: i64) -> FileRecord {
        FileRecord {
            id,
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            directory_path: "/data".to_string(),
            file_type: FileKind::File,
            file_size: size,
            modified_time: None,
        }
    }

    pub fn set_scan_status(&self, status: ScanStatus) {
        self.inner.lock().unwrap().scan = Some(status);
    }

    pub fn add_set(&self, set_id: &str, pk: i64) {
        self.inner.lock().unwrap().sets.insert(
            set_id.to_string(),
            BackupSet {
                id: pk,
                set_id: set_id.to_string(),
                set_name: format!("set {}", set_id),
                backup_group: "2026-03".to_string(),
                status: BackupSetStatus::Active,
                backup_task_id: pk,
                tape_id: None,
                backup_type: BackupTaskType::Full,
                backup_time: Utc::now(),
                total_files: 0,
                total_bytes: 0,
                compressed_bytes: 0,
                compression_ratio: 0.0,
                retention_until: None,
                auto_delete: false,
                created_at: Utc::now(),
            },
        );
    }

    /// Re-insert a pending file below the current cursor, as a racing
    /// scanner would
    pub fn add_file(&self, record: FileRecord) {
        self.inner.lock().unwrap().files.push(MemFile {
            record,
            copied: false,
            chunk: None,
        });
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.inner.lock().unwrap().fetch_failures = count;
    }

    pub fn copied_paths(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .iter()
            .filter(|f| f.copied)
            .map(|f| f.record.file_path.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .files
            .iter()
            .filter(|f| !f.copied)
            .count()
    }

    pub fn chunk_of(&self, path: &str) -> Option<i32> {
        self.inner
            .lock()
            .unwrap()
            .files
            .iter()
            .find(|f| f.record.file_path == path)
            .and_then(|f| f.chunk)
    }

    pub fn progress(&self) -> (i64, i64, i64) {
        self.inner.lock().unwrap().progress
    }

    pub fn mark_calls(&self) -> usize {
        self.inner.lock().unwrap().mark_calls.len()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn fetch_pending_groups(
        &self,
        _backup_set_pk: i64,
        max_group_bytes: i64,
        start_from_id: i64,
        wait_if_small: bool,
    ) -> Result<(Vec<Vec<FileRecord>>, i64)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fetch_failures > 0 {
            inner.fetch_failures -= 1;
            return Err(TapeflowError::TransientStore("injected fetch failure".into()));
        }

        let mut beyond: Vec<FileRecord> = inner
            .files
            .iter()
            .filter(|f| !f.copied && f.record.id > start_from_id)
            .map(|f| f.record.clone())
            .collect();
        beyond.sort_by_key(|f| f.id);

        if beyond.is_empty() {
            if start_from_id > 0 {
                let missed = inner
                    .files
                    .iter()
                    .any(|f| !f.copied && f.record.id <= start_from_id);
                if missed {
                    return Ok((Vec::new(), 0));
                }
            }
            return Ok((Vec::new(), start_from_id));
        }

        let total: i64 = beyond.iter().map(|f| f.file_size).sum();
        if wait_if_small && total < max_group_bytes {
            return Ok((Vec::new(), start_from_id));
        }

        let cursor = beyond.iter().map(|f| f.id).max().unwrap_or(start_from_id);
        Ok((group_files_by_size(beyond, max_group_bytes), cursor))
    }

    async fn sweep_pending(&self, _backup_set_pk: i64) -> Result<Vec<i64>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<i64> = inner
            .files
            .iter()
            .filter(|f| !f.copied)
            .map(|f| f.record.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn scan_status(&self, _backup_task_id: i64) -> Result<ScanStatus> {
        let inner = self.inner.lock().unwrap();
        inner
            .scan
            .ok_or_else(|| TapeflowError::NotFound("backup task".into()))
    }

    async fn mark_files_copied(
        &self,
        _backup_set_pk: i64,
        file_paths: &[String],
        chunk_number: i32,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .mark_calls
            .push((file_paths.to_vec(), chunk_number));
        let mut marked = 0;
        for file in inner.files.iter_mut() {
            if !file.copied && file_paths.contains(&file.record.file_path) {
                file.copied = true;
                file.chunk = Some(chunk_number);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn complete_group(
        &self,
        backup_set_pk: i64,
        _backup_task_id: i64,
        file_paths: &[String],
        chunk_number: i32,
        group_bytes: i64,
        compressed_bytes: i64,
    ) -> Result<u64> {
        let marked = self
            .mark_files_copied(backup_set_pk, file_paths, chunk_number)
            .await?;
        let mut inner = self.inner.lock().unwrap();
        inner.progress.0 += file_paths.len() as i64;
        inner.progress.1 += group_bytes;
        inner.progress.2 += compressed_bytes;
        Ok(marked)
    }

    async fn set_by_set_id(&self, set_id: &str) -> Result<Option<BackupSet>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sets.get(set_id).cloned())
    }
}
