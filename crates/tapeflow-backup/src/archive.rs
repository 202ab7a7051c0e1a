//! Archive writing for the compressor stage
//!
//! Archives are named `backup_{set_id}_{YYYYMMDD_HHMMSS}_{chunk}.{ext}`,
//! written under `work/{set_id}/` and atomically renamed into
//! `final/{set_id}/` once fully flushed. The tar/codec work runs on the
//! blocking pool; an in-progress archive always finishes flushing even when
//! the pipeline is being cancelled.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tapeflow_core::{ArchiveCodec, Result, TapeflowError};
use tapeflow_db::models::FileRecord;
use tracing::{debug, instrument, warn};

/// Build the archive file name for one chunk
pub fn archive_file_name(
    set_id: &str,
    at: DateTime<Utc>,
    chunk_number: u32,
    codec: ArchiveCodec,
) -> String {
    format!(
        "backup_{}_{}_{}.{}",
        set_id,
        at.format("%Y%m%d_%H%M%S"),
        chunk_number,
        codec.extension()
    )
}

/// Parse the chunk number back out of an archive file name
pub fn parse_chunk_number(file_name: &str) -> Option<i32> {
    let stem = file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".tar.zst"))
        .or_else(|| file_name.strip_suffix(".tar"))
        .or_else(|| file_name.strip_suffix(".7z"))
        .or_else(|| file_name.strip_suffix(".gz"))
        .or_else(|| file_name.strip_suffix(".zst"))?;
    stem.rsplit('_').next()?.parse().ok()
}

/// Where one archive gets written
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub work_dir: PathBuf,
    pub final_dir: PathBuf,
    pub file_name: String,
    pub codec: ArchiveCodec,
}

/// Result of a successful archive write
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub final_path: PathBuf,
    pub file_count: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

/// Pack one file group into an archive. The partial work file is removed on
/// any failure; the final file only ever appears complete.
#[instrument(level = "debug", skip(request, files), fields(archive = %request.file_name))]
pub async fn write_archive(request: &ArchiveRequest, files: &[FileRecord]) -> Result<ArchiveSummary> {
    tokio::fs::create_dir_all(&request.work_dir).await?;
    tokio::fs::create_dir_all(&request.final_dir).await?;

    let work_path = request.work_dir.join(&request.file_name);
    let final_path = request.final_dir.join(&request.file_name);
    let codec = request.codec;
    let records: Vec<FileRecord> = files.to_vec();

    let build_path = work_path.clone();
    let build = tokio::task::spawn_blocking(move || build_archive(&build_path, codec, &records))
        .await
        .map_err(|e| TapeflowError::Internal(format!("archive task panicked: {}", e)))?;

    let (file_count, uncompressed_bytes) = match build {
        Ok(counts) => counts,
        Err(e) => {
            remove_partial(&work_path).await;
            return Err(e);
        }
    };

    let compressed_bytes = match tokio::fs::metadata(&work_path).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        Ok(_) => {
            remove_partial(&work_path).await;
            return Err(TapeflowError::Compression(format!(
                "archive {} flushed empty",
                request.file_name
            )));
        }
        Err(e) => {
            remove_partial(&work_path).await;
            return Err(e.into());
        }
    };

    if let Err(e) = tokio::fs::rename(&work_path, &final_path).await {
        remove_partial(&work_path).await;
        return Err(e.into());
    }

    debug!(
        "✅ Archive {} finalized: {} file(s), {} -> {} bytes",
        request.file_name, file_count, uncompressed_bytes, compressed_bytes
    );

    Ok(ArchiveSummary {
        final_path,
        file_count,
        uncompressed_bytes,
        compressed_bytes,
    })
}

fn build_archive(
    work_path: &Path,
    codec: ArchiveCodec,
    files: &[FileRecord],
) -> Result<(usize, u64)> {
    let file = File::create(work_path)?;
    let writer = BufWriter::new(file);

    let result = match codec {
        ArchiveCodec::TarGz => {
            let encoder = GzEncoder::new(writer, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let counts = append_files(&mut builder, files)?;
            let encoder = builder
                .into_inner()
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            let mut writer = encoder
                .finish()
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            writer.flush()?;
            counts
        }
        ArchiveCodec::TarZst => {
            let encoder = zstd::Encoder::new(writer, 0)
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            let mut builder = tar::Builder::new(encoder);
            let counts = append_files(&mut builder, files)?;
            let encoder = builder
                .into_inner()
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            let mut writer = encoder
                .finish()
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            writer.flush()?;
            counts
        }
        ArchiveCodec::Tar => {
            let mut builder = tar::Builder::new(writer);
            let counts = append_files(&mut builder, files)?;
            let mut writer = builder
                .into_inner()
                .map_err(|e| TapeflowError::Compression(e.to_string()))?;
            writer.flush()?;
            counts
        }
    };

    Ok(result)
}

fn append_files<W: Write>(builder: &mut tar::Builder<W>, files: &[FileRecord]) -> Result<(usize, u64)> {
    let mut count = 0;
    let mut bytes = 0u64;

    for record in files {
        let entry_name = record.file_path.trim_start_matches('/');
        builder
            .append_path_with_name(&record.file_path, entry_name)
            .map_err(|e| {
                TapeflowError::Compression(format!(
                    "failed to pack {}: {}",
                    record.file_path, e
                ))
            })?;
        count += 1;
        bytes += record.file_size.max(0) as u64;
    }

    Ok((count, bytes))
}

async fn remove_partial(work_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(work_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("⚠️ Could not remove partial archive {:?}: {}", work_path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tapeflow_core::FileKind;
    use tempfile::tempdir;

    fn record_for(path: &Path, size: i64) -> FileRecord {
        FileRecord {
            id: 1,
            file_path: path.to_string_lossy().into_owned(),
            file_name: path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            directory_path: path
                .parent()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            file_type: FileKind::File,
            file_size: size,
            modified_time: None,
        }
    }

    #[test]
    fn test_archive_file_name_format() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T02:15:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            archive_file_name("bs-12", at, 3, ArchiveCodec::TarGz),
            "backup_bs-12_20260301_021530_3.tar.gz"
        );
        assert_eq!(
            archive_file_name("bs-12", at, 1, ArchiveCodec::Tar),
            "backup_bs-12_20260301_021530_1.tar"
        );
    }

    #[test]
    fn test_parse_chunk_number() {
        assert_eq!(
            parse_chunk_number("backup_bs-12_20260301_021530_3.tar.gz"),
            Some(3)
        );
        assert_eq!(
            parse_chunk_number("backup_bs-12_20260301_021530_17.tar.zst"),
            Some(17)
        );
        assert_eq!(parse_chunk_number("backup_bs-12_20260301_021530_2.7z"), Some(2));
        assert_eq!(parse_chunk_number("not-an-archive.txt"), None);
    }

    #[tokio::test]
    async fn test_write_archive_round_trip() {
        let source = tempdir().unwrap();
        let staging = tempdir().unwrap();

        let mut files = Vec::new();
        for (name, content) in [("a.txt", "alpha"), ("b.txt", "bravo"), ("c.txt", "charlie")] {
            let path = source.path().join(name);
            std::fs::write(&path, content).unwrap();
            files.push(record_for(&path, content.len() as i64));
        }

        let request = ArchiveRequest {
            work_dir: staging.path().join("work/bs-1"),
            final_dir: staging.path().join("final/bs-1"),
            file_name: "backup_bs-1_20260301_021530_1.tar.gz".to_string(),
            codec: ArchiveCodec::TarGz,
        };

        let summary = write_archive(&request, &files).await.unwrap();
        assert_eq!(summary.file_count, 3);
        assert!(summary.compressed_bytes > 0);
        assert!(summary.final_path.exists());
        // nothing remains in the work dir
        assert!(!request.work_dir.join(&request.file_name).exists());

        // the archive actually contains the three files
        let reader = GzDecoder::new(File::open(&summary.final_path).unwrap());
        let mut tar = tar::Archive::new(reader);
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_missing_source_file_cleans_up_partial() {
        let staging = tempdir().unwrap();

        let files = vec![FileRecord {
            id: 1,
            file_path: "/nonexistent/ghost.txt".to_string(),
            file_name: "ghost.txt".to_string(),
            directory_path: "/nonexistent".to_string(),
            file_type: FileKind::File,
            file_size: 10,
            modified_time: None,
        }];

        let request = ArchiveRequest {
            work_dir: staging.path().join("work/bs-2"),
            final_dir: staging.path().join("final/bs-2"),
            file_name: "backup_bs-2_20260301_021530_1.tar.gz".to_string(),
            codec: ArchiveCodec::TarGz,
        };

        let err = write_archive(&request, &files).await.unwrap_err();
        assert!(matches!(err, TapeflowError::Compression(_)));
        assert!(!request.work_dir.join(&request.file_name).exists());
        assert!(!request.final_dir.join(&request.file_name).exists());
    }
}
