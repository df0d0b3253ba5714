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

//! Part registry, ordered assembly, and abort, per spec.md §4.4.
//!
//! Multipart state lives under a reserved directory sibling to the object
//! metadata tree (`_multipart_uploads/<uploadId>/`), regardless of
//! object-metadata mode — `SeparateDirectory` keeps it under
//! `MetadataDirectory`, the other two modes keep it under the data
//! directory's inline-metadata subtree, per spec.md §4.3.1.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::config::{FilesystemStorageConfig, MetadataMode};
use crate::error::GatewayError;
use crate::storage::engine::{atomic_write, PutOutcome, StorageEngine, TempFile};
use crate::storage::lock::WriteGuard;
use crate::types::{Checksums, MultipartUpload, PartMetadata};

fn multipart_root(config: &FilesystemStorageConfig) -> PathBuf {
    match config.metadata_mode {
        MetadataMode::SeparateDirectory => config.metadata_directory.join("_multipart_uploads"),
        MetadataMode::Inline | MetadataMode::Xattr => config
            .data_directory
            .join(&config.inline_metadata_directory_name)
            .join("_multipart_uploads"),
    }
}

fn upload_dir(config: &FilesystemStorageConfig, upload_id: &str) -> PathBuf {
    multipart_root(config).join(upload_id)
}

fn record_path(config: &FilesystemStorageConfig, upload_id: &str) -> PathBuf {
    upload_dir(config, upload_id).join("upload.metadata.json")
}

fn part_path(config: &FilesystemStorageConfig, upload_id: &str, part_number: u16) -> PathBuf {
    upload_dir(config, upload_id).join(format!("part-{part_number:05}"))
}

async fn load_record(
    config: &FilesystemStorageConfig,
    upload_id: &str,
) -> Result<Option<MultipartUpload>, GatewayError> {
    let path = record_path(config, upload_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::Internal(format!("corrupt multipart record at {path:?}: {e}"))
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GatewayError::Io(e)),
    }
}

async fn save_record(config: &FilesystemStorageConfig, record: &MultipartUpload) -> Result<(), GatewayError> {
    let path = record_path(config, &record.upload_id);
    let body = serde_json::to_vec_pretty(record)
        .map_err(|e| GatewayError::Internal(format!("failed to serialize multipart record: {e}")))?;
    atomic_write(&path, &body, &config.temp_file_prefix).await
}

async fn require_matching_record(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<MultipartUpload, GatewayError> {
    match load_record(config, upload_id).await? {
        Some(record) if record.bucket_name == bucket && record.key == key => Ok(record),
        _ => Err(GatewayError::NoSuchUpload(upload_id.to_string())),
    }
}

/// Starts a new multipart upload, persisting an empty-parts record.
pub async fn initiate(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    content_type: String,
    user_metadata: HashMap<String, String>,
) -> Result<MultipartUpload, GatewayError> {
    if !engine.bucket_exists(bucket).await {
        return Err(GatewayError::NoSuchBucket(bucket.to_string()));
    }
    let upload_id = uuid::Uuid::new_v4().simple().to_string();
    let record = MultipartUpload {
        upload_id,
        bucket_name: bucket.to_string(),
        key: key.to_string(),
        initiated: chrono::Utc::now(),
        content_type,
        metadata: user_metadata,
        parts: Default::default(),
    };
    save_record(&engine.config().filesystem_storage, &record).await?;
    Ok(record)
}

/// Acquires the write lock on a part's file and opens a temp file for it,
/// for callers that want to stream bytes in directly (the HTTP `UploadPart`
/// handler) rather than hand over an already-buffered `AsyncRead`.
pub async fn begin_part_write(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u16,
) -> Result<(WriteGuard, PathBuf, TempFile), GatewayError> {
    if !(1..=10000).contains(&part_number) {
        return Err(GatewayError::InvalidArgument(format!(
            "partNumber {part_number} out of range [1, 10000]"
        )));
    }
    let config = &engine.config().filesystem_storage;
    require_matching_record(config, bucket, key, upload_id).await?;

    let path = part_path(config, upload_id, part_number);
    let dir = path.parent().unwrap().to_path_buf();
    let guard = engine.locks().write(&path).await;
    let temp = TempFile::create(&dir, &config.temp_file_prefix).await?;
    Ok((guard, path, temp))
}

/// Finalizes a part write begun with `begin_part_write`: renames the temp
/// file onto the part path, then updates the upload's parts map
/// (read-modify-write serialized by a lock on the record path, so
/// concurrent distinct part numbers don't race each other's map update).
/// Overwriting an existing part number replaces it.
#[allow(clippy::too_many_arguments)]
pub async fn commit_part_write(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u16,
    guard: WriteGuard,
    path: PathBuf,
    temp: TempFile,
    etag: String,
    size: u64,
    checksums: Checksums,
) -> Result<PartMetadata, GatewayError> {
    temp.finish(&path).await?;
    let last_modified = tokio::fs::metadata(&path)
        .await
        .map_err(GatewayError::Io)?
        .modified()
        .map_err(GatewayError::Io)?
        .into();
    let part = PartMetadata {
        size,
        etag,
        last_modified,
        checksums,
    };

    let config = &engine.config().filesystem_storage;
    let record_lock_path = record_path(config, upload_id);
    let _record_guard = engine.locks().write(&record_lock_path).await;
    let mut record = require_matching_record(config, bucket, key, upload_id).await?;
    record.parts.insert(part_number, part.clone());
    save_record(config, &record).await?;
    drop(guard);

    Ok(part)
}

/// Streams `reader`'s already-decoded bytes into a part file, then updates
/// the upload's parts map (read-modify-write serialized by a lock on the
/// record path, so concurrent distinct part numbers don't race each other's
/// map update). Overwriting an existing part number replaces it. A
/// convenience wrapper over `begin_part_write`/`commit_part_write` for
/// callers that already hold the part's bytes as an `AsyncRead` (tests, the
/// background cleaners) rather than streaming from a live socket.
pub async fn upload_part<R>(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: u16,
    mut reader: R,
) -> Result<PartMetadata, GatewayError>
where
    R: AsyncRead + Unpin,
{
    let (guard, path, mut temp) = begin_part_write(engine, bucket, key, upload_id, part_number).await?;

    let mut hasher = sha1::Sha1::new();
    use sha1::Digest;
    let mut total = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                temp.abort().await;
                return Err(GatewayError::Io(e));
            }
        };
        hasher.update(&buf[..n]);
        total += n as u64;
        if let Err(e) = temp.write_all(&buf[..n]).await {
            temp.abort().await;
            return Err(GatewayError::Io(e));
        }
    }

    let etag = hex::encode(hasher.finalize());
    commit_part_write(
        engine,
        bucket,
        key,
        upload_id,
        part_number,
        guard,
        path,
        temp,
        etag,
        total,
        Checksums::default(),
    )
    .await
}

/// Validates the requested part list against the upload's recorded parts —
/// every part present with a matching ETag, part numbers strictly
/// increasing — then streams the parts in order into a new object.
pub async fn complete(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    upload_id: &str,
    requested_parts: &[(u16, String)],
) -> Result<PutOutcome, GatewayError> {
    let config = &engine.config().filesystem_storage;
    let record = require_matching_record(config, bucket, key, upload_id).await?;

    if requested_parts.is_empty() {
        return Err(GatewayError::InvalidArgument(
            "CompleteMultipartUpload requires at least one part".into(),
        ));
    }
    let mut previous_part_number = 0u16;
    for (part_number, claimed_etag) in requested_parts {
        if *part_number <= previous_part_number {
            return Err(GatewayError::InvalidArgument(
                "part numbers must strictly increase".into(),
            ));
        }
        previous_part_number = *part_number;
        let recorded = record.parts.get(part_number).ok_or_else(|| {
            GatewayError::InvalidArgument(format!("part {part_number} was not uploaded"))
        })?;
        if &recorded.etag != claimed_etag {
            return Err(GatewayError::InvalidArgument(format!(
                "part {part_number} ETag mismatch"
            )));
        }
    }

    let part_paths: Vec<PathBuf> = requested_parts
        .iter()
        .map(|(n, _)| part_path(config, upload_id, *n))
        .collect();

    let outcome = engine
        .put_object_from_parts(bucket, key, &part_paths, Some(record.content_type.clone()), record.metadata.clone())
        .await?;

    let _ = tokio::fs::remove_dir_all(upload_dir(config, upload_id)).await;

    Ok(outcome)
}

/// Removes every part file and the upload record.
pub async fn abort(engine: &StorageEngine, bucket: &str, key: &str, upload_id: &str) -> Result<(), GatewayError> {
    let config = &engine.config().filesystem_storage;
    require_matching_record(config, bucket, key, upload_id).await?;
    match tokio::fs::remove_dir_all(upload_dir(config, upload_id)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GatewayError::Io(e)),
    }
}

pub async fn list_parts(
    engine: &StorageEngine,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> Result<Vec<(u16, PartMetadata)>, GatewayError> {
    let config = &engine.config().filesystem_storage;
    let record = require_matching_record(config, bucket, key, upload_id).await?;
    Ok(record.parts.into_iter().collect())
}

/// Lists in-progress uploads for `bucket`, skipping any record that fails
/// to parse (a half-written or concurrently-aborted upload).
pub async fn list_uploads(engine: &StorageEngine, bucket: &str) -> Result<Vec<MultipartUpload>, GatewayError> {
    let config = &engine.config().filesystem_storage;
    list_all_records(config, Some(bucket)).await
}

/// Walks every recorded upload, filtering by bucket when given; used both by
/// `list_uploads` and by the stale-upload cleaner.
pub(crate) async fn list_all_records(
    config: &FilesystemStorageConfig,
    bucket_filter: Option<&str>,
) -> Result<Vec<MultipartUpload>, GatewayError> {
    let root = multipart_root(config);
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GatewayError::Io(e)),
    };
    let mut uploads = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(GatewayError::Io)? {
        let upload_id = entry.file_name().to_string_lossy().to_string();
        let Ok(Some(record)) = load_record(config, &upload_id).await else {
            continue;
        };
        if bucket_filter.is_none_or(|b| record.bucket_name == b) {
            uploads.push(record);
        }
    }
    uploads.sort_by(|a, b| a.initiated.cmp(&b.initiated));
    Ok(uploads)
}

pub(crate) fn upload_record_path(config: &FilesystemStorageConfig, upload_id: &str) -> PathBuf {
    record_path(config, upload_id)
}

pub(crate) fn upload_directory(config: &FilesystemStorageConfig, upload_id: &str) -> PathBuf {
    upload_dir(config, upload_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemStorageConfig as FsConfig;
    use crate::config::Config as LaminaConfig;
    use std::io::Cursor;

    fn engine(dir: &std::path::Path) -> StorageEngine {
        let mut config = LaminaConfig::default();
        config.filesystem_storage = FsConfig {
            data_directory: dir.join("data"),
            metadata_directory: dir.join("meta"),
            ..FsConfig::default()
        };
        StorageEngine::new(config)
    }

    #[tokio::test]
    async fn full_multipart_lifecycle_assembles_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b3").await.unwrap();

        let record = initiate(&engine, "b3", "obj.bin", "application/octet-stream".into(), Default::default())
            .await
            .unwrap();

        let p1 = upload_part(&engine, "b3", "obj.bin", &record.upload_id, 1, Cursor::new(b"Part 1 ".to_vec()))
            .await
            .unwrap();
        let p2 = upload_part(&engine, "b3", "obj.bin", &record.upload_id, 2, Cursor::new(b"Part 2".to_vec()))
            .await
            .unwrap();

        let outcome = complete(
            &engine,
            "b3",
            "obj.bin",
            &record.upload_id,
            &[(1, p1.etag.clone()), (2, p2.etag.clone())],
        )
        .await
        .unwrap();

        assert_eq!(outcome.size, 13);
        let (meta, mut file) = engine.get_object("b3", "obj.bin").await.unwrap().unwrap();
        assert_eq!(meta.etag, outcome.etag);
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"Part 1 Part 2");

        assert!(load_record(&engine.config().filesystem_storage, &record.upload_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn complete_rejects_out_of_order_parts() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b3").await.unwrap();
        let record = initiate(&engine, "b3", "obj.bin", "application/octet-stream".into(), Default::default())
            .await
            .unwrap();
        let p1 = upload_part(&engine, "b3", "obj.bin", &record.upload_id, 1, Cursor::new(b"a".to_vec()))
            .await
            .unwrap();

        let result = complete(&engine, "b3", "obj.bin", &record.upload_id, &[(1, p1.etag), (1, "x".into())]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn abort_removes_parts_and_record() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b3").await.unwrap();
        let record = initiate(&engine, "b3", "obj.bin", "application/octet-stream".into(), Default::default())
            .await
            .unwrap();
        upload_part(&engine, "b3", "obj.bin", &record.upload_id, 1, Cursor::new(b"a".to_vec()))
            .await
            .unwrap();

        abort(&engine, "b3", "obj.bin", &record.upload_id).await.unwrap();

        let result = complete(&engine, "b3", "obj.bin", &record.upload_id, &[(1, "whatever".into())]).await;
        assert!(matches!(result, Err(GatewayError::NoSuchUpload(_))));
    }
}
