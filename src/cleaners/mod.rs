// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background sweeps, per spec.md §4.5: stale multipart uploads, orphaned
//! metadata records, and abandoned temp files. Each sweep is a plain
//! function a caller can invoke directly (used by tests and by the
//! interval-driven loops `spawn_all` starts); a single bucket/entry failing
//! never aborts the rest of the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FilesystemStorageConfig, MetadataMode};
use crate::multipart::upload;
use crate::storage::engine::StorageEngine;
use crate::storage::metadata;

/// Starts the three cleaner loops for every sweep enabled in `config`,
/// returning their join handles so the caller can await them on shutdown.
pub fn spawn_all(engine: Arc<StorageEngine>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();
    let config = engine.config();

    if config.multipart_upload_cleanup.enabled {
        handles.push(spawn_stale_multipart_cleaner(engine.clone()));
    }
    if config.metadata_cleanup.enabled {
        handles.push(spawn_orphan_metadata_cleaner(engine.clone()));
    }
    if config.temp_file_cleanup.enabled {
        handles.push(spawn_temp_file_cleaner(engine));
    }
    handles
}

fn spawn_stale_multipart_cleaner(engine: Arc<StorageEngine>) -> tokio::task::JoinHandle<()> {
    let interval_minutes = engine.config().multipart_upload_cleanup.interval_minutes;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        loop {
            ticker.tick().await;
            match sweep_stale_multipart_uploads(&engine).await {
                Ok(n) if n > 0 => tracing::info!(aborted = n, "stale multipart cleaner ran"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "stale multipart cleaner failed to enumerate uploads"),
            }
        }
    })
}

fn spawn_orphan_metadata_cleaner(engine: Arc<StorageEngine>) -> tokio::task::JoinHandle<()> {
    let interval_minutes = engine.config().metadata_cleanup.interval_minutes;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        loop {
            ticker.tick().await;
            match sweep_orphan_metadata(&engine).await {
                Ok(n) if n > 0 => tracing::info!(deleted = n, "orphan metadata cleaner ran"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "orphan metadata cleaner failed"),
            }
        }
    })
}

fn spawn_temp_file_cleaner(engine: Arc<StorageEngine>) -> tokio::task::JoinHandle<()> {
    let interval_minutes = engine.config().temp_file_cleanup.interval_minutes;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        loop {
            ticker.tick().await;
            match sweep_temp_files(&engine).await {
                Ok(n) if n > 0 => tracing::info!(deleted = n, "temp file cleaner ran"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "temp file cleaner failed"),
            }
        }
    })
}

/// Walks every multipart upload record and aborts any whose `Initiated` is
/// older than `MultipartUploadCleanup.TimeoutHours`. A single upload failing
/// to abort is logged and does not stop the rest of the sweep.
pub async fn sweep_stale_multipart_uploads(engine: &StorageEngine) -> Result<usize, crate::error::GatewayError> {
    let config = engine.config();
    let timeout = chrono::Duration::hours(config.multipart_upload_cleanup.timeout_hours as i64);
    let cutoff = chrono::Utc::now() - timeout;

    let records = upload::list_all_records(&config.filesystem_storage, None).await?;
    let mut aborted = 0;
    for record in records {
        if record.initiated > cutoff {
            continue;
        }
        match upload::abort(engine, &record.bucket_name, &record.key, &record.upload_id).await {
            Ok(()) => aborted += 1,
            Err(e) => tracing::warn!(
                upload_id = %record.upload_id,
                bucket = %record.bucket_name,
                key = %record.key,
                error = %e,
                "failed to abort stale multipart upload"
            ),
        }
    }
    Ok(aborted)
}

/// Enumerates every persisted metadata entry this storage engine's mode
/// knows how to find and deletes those with no corresponding data file.
/// `Xattr` mode stores metadata on the data file itself, so it has no
/// separate entries to orphan and this is a no-op.
pub async fn sweep_orphan_metadata(engine: &StorageEngine) -> Result<usize, crate::error::GatewayError> {
    let config = &engine.config().filesystem_storage;
    let batch_size = engine.config().metadata_cleanup.batch_size;

    let entries = enumerate_metadata_entries(config).await?;
    let mut deleted = 0;
    for (bucket, key) in entries {
        if deleted >= batch_size {
            break;
        }
        let data_path = metadata::data_path(config, &bucket, &key);
        if tokio::fs::metadata(&data_path).await.is_ok() {
            continue;
        }
        match metadata::delete_persisted(config, &bucket, &key, &data_path).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(bucket = %bucket, key = %key, error = %e, "failed to delete orphan metadata"),
        }
    }
    Ok(deleted)
}

/// Lists every `(bucket, key)` pair with a persisted metadata entry, per the
/// configured metadata mode. The multipart registry's own JSON records live
/// under a reserved `_multipart_uploads` subtree and are skipped — they are
/// not object metadata.
async fn enumerate_metadata_entries(
    config: &FilesystemStorageConfig,
) -> Result<Vec<(String, String)>, crate::error::GatewayError> {
    match config.metadata_mode {
        MetadataMode::Xattr => Ok(Vec::new()),
        MetadataMode::SeparateDirectory => {
            let root = &config.metadata_directory;
            let mut entries = Vec::new();
            let mut buckets = match tokio::fs::read_dir(root).await {
                Ok(r) => r,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(crate::error::GatewayError::Io(e)),
            };
            while let Some(bucket_entry) = read_next(&mut buckets).await? {
                let bucket = bucket_entry.file_name().to_string_lossy().to_string();
                if bucket == "_multipart_uploads" {
                    continue;
                }
                let bucket_dir = root.join(&bucket);
                for rel in walk_json_files(&bucket_dir).await? {
                    let key = strip_json_suffix(&rel);
                    entries.push((bucket.clone(), key));
                }
            }
            Ok(entries)
        }
        MetadataMode::Inline => {
            let root = &config.data_directory;
            let mut entries = Vec::new();
            let mut buckets = match tokio::fs::read_dir(root).await {
                Ok(r) => r,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(crate::error::GatewayError::Io(e)),
            };
            while let Some(bucket_entry) = read_next(&mut buckets).await? {
                let bucket = bucket_entry.file_name().to_string_lossy().to_string();
                if bucket == config.inline_metadata_directory_name {
                    // The flat multipart root, not a bucket.
                    continue;
                }
                let inline_dir = root.join(&bucket).join(&config.inline_metadata_directory_name);
                for rel in walk_json_files(&inline_dir).await? {
                    let key = strip_json_suffix(&rel);
                    entries.push((bucket.clone(), key));
                }
            }
            Ok(entries)
        }
    }
}

fn strip_json_suffix(rel: &str) -> String {
    rel.strip_suffix(".json").unwrap_or(rel).to_string()
}

async fn read_next(
    entries: &mut tokio::fs::ReadDir,
) -> Result<Option<tokio::fs::DirEntry>, crate::error::GatewayError> {
    entries.next_entry().await.map_err(crate::error::GatewayError::Io)
}

/// Recursively lists every `*.json` file under `root`, relative to `root`,
/// using `/` separators regardless of platform. Missing `root` yields no
/// entries rather than an error — most buckets won't use inline metadata.
async fn walk_json_files(root: &Path) -> Result<Vec<String>, crate::error::GatewayError> {
    let mut files = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(relative) = stack.pop() {
        let dir = root.join(&relative);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(dir = ?dir, error = %e, "skipping unreadable directory during metadata sweep");
                continue;
            }
        };
        while let Some(entry) = read_next(&mut entries).await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let child_relative = relative.join(&name);
            let file_type = entry.file_type().await.map_err(crate::error::GatewayError::Io)?;
            if file_type.is_dir() {
                stack.push(child_relative);
            } else if name.ends_with(".json") {
                files.push(child_relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(files)
}

/// Deletes every file under `DataDirectory`/`MetadataDirectory` whose name
/// starts with `TempFileCleanup`'s configured prefix and whose mtime is
/// older than `TempFileAgeMinutes`, up to `BatchSize` per run.
pub async fn sweep_temp_files(engine: &StorageEngine) -> Result<usize, crate::error::GatewayError> {
    let config = &engine.config().filesystem_storage;
    let cleanup = &engine.config().temp_file_cleanup;
    let max_age = Duration::from_secs(cleanup.temp_file_age_minutes * 60);
    let now = std::time::SystemTime::now();

    let mut deleted = 0;
    let mut roots = vec![config.data_directory.clone()];
    if config.metadata_directory != config.data_directory {
        roots.push(config.metadata_directory.clone());
    }

    for root in roots {
        if deleted >= cleanup.batch_size {
            break;
        }
        deleted += sweep_temp_files_under(&root, config, max_age, now, cleanup.batch_size - deleted).await;
    }
    Ok(deleted)
}

async fn sweep_temp_files_under(
    root: &Path,
    config: &FilesystemStorageConfig,
    max_age: Duration,
    now: std::time::SystemTime,
    limit: usize,
) -> usize {
    let mut deleted = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if deleted >= limit {
            break;
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(dir = ?dir, error = %e, "skipping unreadable directory during temp file sweep");
                continue;
            }
        };
        loop {
            if deleted >= limit {
                break;
            }
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(dir = ?dir, error = %e, "error reading directory during temp file sweep");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(entry.path());
                continue;
            }
            if !name.starts_with(&config.temp_file_prefix) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age < max_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(path = ?entry.path(), error = %e, "failed to remove stale temp file"),
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::FilesystemStorageConfig as FsConfig;
    use crate::config::MultipartUploadCleanupConfig;

    fn engine(dir: &std::path::Path) -> StorageEngine {
        let mut config = Config::default();
        config.filesystem_storage = FsConfig {
            data_directory: dir.join("data"),
            metadata_directory: dir.join("meta"),
            ..FsConfig::default()
        };
        config.multipart_upload_cleanup = MultipartUploadCleanupConfig {
            enabled: true,
            interval_minutes: 15,
            timeout_hours: 24,
        };
        StorageEngine::new(config)
    }

    #[tokio::test]
    async fn stale_upload_is_aborted_and_complete_then_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b4").await.unwrap();

        let record = upload::initiate(&engine, "b4", "obj.bin", "application/octet-stream".into(), Default::default())
            .await
            .unwrap();
        upload::upload_part(&engine, "b4", "obj.bin", &record.upload_id, 1, std::io::Cursor::new(b"x".to_vec()))
            .await
            .unwrap();

        let record_path =
            crate::multipart::upload::upload_record_path(&engine.config().filesystem_storage, &record.upload_id);
        let mut stored: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&record_path).await.unwrap()).unwrap();
        let stale = chrono::Utc::now() - chrono::Duration::hours(25);
        stored["Initiated"] = serde_json::Value::String(crate::s3::utils::to_iso8601utc(stale));
        tokio::fs::write(&record_path, serde_json::to_vec_pretty(&stored).unwrap())
            .await
            .unwrap();

        let aborted = sweep_stale_multipart_uploads(&engine).await.unwrap();
        assert_eq!(aborted, 1);

        let result = upload::complete(&engine, "b4", "obj.bin", &record.upload_id, &[(1, "whatever".into())]).await;
        assert!(matches!(result, Err(crate::error::GatewayError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn fresh_upload_survives_the_sweep() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b4").await.unwrap();
        let record = upload::initiate(&engine, "b4", "obj.bin", "application/octet-stream".into(), Default::default())
            .await
            .unwrap();

        let aborted = sweep_stale_multipart_uploads(&engine).await.unwrap();
        assert_eq!(aborted, 0);

        let parts = upload::list_parts(&engine, "b4", "obj.bin", &record.upload_id).await.unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn orphan_metadata_is_deleted_when_data_file_is_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b5").await.unwrap();
        engine
            .put_object_bytes("b5", "a.txt", b"hi there, this has custom metadata", Some("text/plain".into()), {
                let mut m = std::collections::HashMap::new();
                m.insert("x".into(), "y".into());
                m
            })
            .await
            .unwrap();

        let data_path = metadata::data_path(&engine.config().filesystem_storage, "b5", "a.txt");
        tokio::fs::remove_file(&data_path).await.unwrap();

        let meta_path = metadata::metadata_path(&engine.config().filesystem_storage, "b5", "a.txt").unwrap();
        assert!(tokio::fs::metadata(&meta_path).await.is_ok());

        let deleted = sweep_orphan_metadata(&engine).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(tokio::fs::metadata(&meta_path).await.is_err());
    }

    #[tokio::test]
    async fn temp_file_cleaner_removes_only_old_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b6").await.unwrap();

        let data_dir = engine.config().filesystem_storage.data_directory.join("b6");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        let old_temp = data_dir.join(format!(
            "{}leftover",
            engine.config().filesystem_storage.temp_file_prefix
        ));
        tokio::fs::write(&old_temp, b"partial").await.unwrap();
        let old_mtime = filetime::FileTime::from_system_time(
            std::time::SystemTime::now() - std::time::Duration::from_secs(3600 * 2),
        );
        filetime::set_file_mtime(&old_temp, old_mtime).unwrap();

        let fresh_temp = data_dir.join(format!(
            "{}fresh",
            engine.config().filesystem_storage.temp_file_prefix
        ));
        tokio::fs::write(&fresh_temp, b"partial").await.unwrap();

        let deleted = sweep_temp_files(&engine).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(tokio::fs::metadata(&old_temp).await.is_err());
        assert!(tokio::fs::metadata(&fresh_temp).await.is_ok());
    }
}
