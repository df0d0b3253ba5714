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

//! The filesystem storage engine: atomic writes (§4.3.2), bucket and
//! object CRUD, tying together the lock manager, metadata repair, and the
//! metadata cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::config::Config;
use crate::error::GatewayError;
use crate::s3::utils::sha1_hash_hex;
use crate::storage::cache::MetadataCache;
use crate::storage::lock::{LockManager, WriteGuard};
use crate::storage::{listing, metadata, retry};
use crate::types::{Bucket, BucketKind, Checksums, ObjectMetadata};

pub struct StorageEngine {
    config: Config,
    locks: LockManager,
    cache: MetadataCache,
}

/// An open temp file created with `O_CREAT|O_EXCL|O_WRONLY` in the same
/// directory as its eventual final path, so the final `rename` is atomic on
/// that filesystem (invariant S1).
pub struct TempFile {
    path: PathBuf,
    file: tokio::fs::File,
}

impl TempFile {
    pub async fn create(dir: &Path, prefix: &str) -> Result<Self, GatewayError> {
        tokio::fs::create_dir_all(dir).await.map_err(GatewayError::Io)?;
        for _ in 0..8 {
            let candidate = dir.join(format!("{prefix}{}", uuid::Uuid::new_v4()));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => return Ok(Self { path: candidate, file }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(GatewayError::Io(e)),
            }
        }
        Err(GatewayError::Internal(
            "could not allocate a unique temp file name".into(),
        ))
    }

    /// fsyncs the temp file, renames it to `final_path`, then fsyncs the
    /// containing directory where the platform supports it.
    pub async fn finish(mut self, final_path: &Path) -> Result<(), GatewayError> {
        use tokio::io::AsyncWriteExt;
        self.file.flush().await.map_err(GatewayError::Io)?;
        self.file.sync_all().await.map_err(GatewayError::Io)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(GatewayError::Io)?;
        }
        tokio::fs::rename(&self.path, final_path)
            .await
            .map_err(GatewayError::Io)?;
        if let Some(parent) = final_path.parent() {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
        Ok(())
    }

    /// Deletes the temp file without promoting it — used on any failure or
    /// cancellation during the write.
    pub async fn abort(self) {
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

impl AsyncWrite for TempFile {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}

/// Writes `bytes` to `path` using the atomic protocol — used for the small
/// JSON metadata/upload records, where the whole body is already in memory.
pub async fn atomic_write(path: &Path, bytes: &[u8], temp_prefix: &str) -> Result<(), GatewayError> {
    let dir = path.parent().ok_or_else(|| {
        GatewayError::Internal(format!("{path:?} has no parent directory"))
    })?;
    let mut temp = TempFile::create(dir, temp_prefix).await?;
    use tokio::io::AsyncWriteExt;
    if let Err(e) = temp.file.write_all(bytes).await {
        temp.abort().await;
        return Err(GatewayError::Io(e));
    }
    temp.finish(path).await
}

pub struct PutOutcome {
    pub etag: String,
    pub size: u64,
    pub checksums: Checksums,
}

impl StorageEngine {
    pub fn new(config: Config) -> Self {
        let cache = MetadataCache::new(config.metadata_cache.clone());
        Self {
            config,
            locks: LockManager::new(),
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.config.filesystem_storage.data_directory.join(bucket)
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<(), GatewayError> {
        crate::s3::utils::check_bucket_name(bucket)?;
        let dir = self.bucket_dir(bucket);
        if tokio::fs::metadata(&dir).await.is_ok() {
            return Err(GatewayError::BucketAlreadyExists(bucket.to_string()));
        }
        retry::with_retry(
            self.config.filesystem_storage.retry_count,
            std::time::Duration::from_millis(self.config.filesystem_storage.retry_delay_ms),
            || tokio::fs::create_dir_all(&dir),
        )
        .await
        .map_err(GatewayError::Io)
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        tokio::fs::metadata(self.bucket_dir(bucket)).await.is_ok()
    }

    /// Deletes an empty bucket. When `force` is set, non-empty buckets are
    /// removed recursively instead of failing with `BucketNotEmpty`
    /// (mirrors the `.force(true)` escape hatch the teacher's own
    /// `s3tables` client exposes for stale-metadata deletes).
    pub async fn delete_bucket(&self, bucket: &str, force: bool) -> Result<(), GatewayError> {
        let dir = self.bucket_dir(bucket);
        if tokio::fs::metadata(&dir).await.is_err() {
            return Err(GatewayError::NoSuchBucket(bucket.to_string()));
        }
        if force {
            return tokio::fs::remove_dir_all(&dir).await.or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(GatewayError::Io(e))
                }
            });
        }
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.raw_os_error() == Some(39) /* ENOTEMPTY */ => {
                Err(GatewayError::BucketNotEmpty(bucket.to_string()))
            }
            Err(e) => Err(GatewayError::Io(e)),
        }
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>, GatewayError> {
        let root = &self.config.filesystem_storage.data_directory;
        tokio::fs::create_dir_all(root).await.map_err(GatewayError::Io)?;
        let mut entries = tokio::fs::read_dir(root).await.map_err(GatewayError::Io)?;
        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(GatewayError::Io)? {
            if entry.file_type().await.map_err(GatewayError::Io)?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                let meta = entry.metadata().await.map_err(GatewayError::Io)?;
                let created = meta.created().unwrap_or(std::time::SystemTime::now()).into();
                let kind = BucketKind::from_bucket_name(&name);
                buckets.push(Bucket { name, created, kind });
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    /// Acquires the write lock for `(bucket, key)` and opens a temp file
    /// ready to receive the object's bytes. The caller streams into the
    /// returned `TempFile` (it implements `AsyncWrite`) and must eventually
    /// call either `commit_write` or `TempFile::abort` — holding onto the
    /// `WriteGuard` for the whole span keeps invariant S1 (no reader ever
    /// observes a half-written final path).
    pub async fn begin_write(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(WriteGuard, PathBuf, TempFile), GatewayError> {
        let data_path = metadata::data_path(&self.config.filesystem_storage, bucket, key);
        let dir = data_path.parent().unwrap().to_path_buf();
        let guard = self.locks.write(&data_path).await;
        let temp = TempFile::create(&dir, &self.config.filesystem_storage.temp_file_prefix).await?;
        Ok((guard, data_path, temp))
    }

    /// Finalizes a write begun with `begin_write`: renames the temp file
    /// onto `data_path`, derives `LastModified` from the data file's own
    /// mtime (never wall-clock, per §4.3.5), and persists metadata. Drops
    /// `guard` only after metadata is written, so the write lock covers the
    /// full atomic-write-then-metadata-write sequence spec.md §5 requires.
    pub async fn commit_write(
        &self,
        guard: WriteGuard,
        bucket: &str,
        key: &str,
        data_path: &Path,
        temp: TempFile,
        etag: String,
        size: u64,
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
        checksums: Checksums,
    ) -> Result<PutOutcome, GatewayError> {
        temp.finish(data_path).await?;

        let content_type = content_type.unwrap_or_else(|| crate::s3::utils::detect_content_type(key).to_string());
        let last_modified = tokio::fs::metadata(data_path)
            .await
            .map_err(GatewayError::Io)?
            .modified()
            .map_err(GatewayError::Io)?
            .into();

        let meta = ObjectMetadata {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: etag.clone(),
            size,
            last_modified,
            content_type,
            user_metadata,
            checksums: checksums.clone(),
        };
        metadata::write_metadata(&self.config.filesystem_storage, &meta).await?;
        self.cache.invalidate(bucket, key);
        drop(guard);

        Ok(PutOutcome { etag, size, checksums })
    }

    /// Writes an object from a whole in-memory body (no chunked framing) —
    /// a convenience wrapper over `begin_write`/`commit_write` for callers
    /// (tests, the background cleaners) that already hold the full object
    /// in memory rather than streaming it from a socket.
    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
    ) -> Result<PutOutcome, GatewayError> {
        let (guard, data_path, mut temp) = self.begin_write(bucket, key).await?;
        use tokio::io::AsyncWriteExt;
        if let Err(e) = temp.write_all(bytes).await {
            temp.abort().await;
            return Err(GatewayError::Io(e));
        }
        let etag = sha1_hash_hex(bytes);
        self.commit_write(
            guard,
            bucket,
            key,
            &data_path,
            temp,
            etag,
            bytes.len() as u64,
            content_type,
            user_metadata,
            Checksums::default(),
        )
        .await
    }

    /// Assembles a completed multipart upload into a single object by
    /// streaming `part_paths` in order into the final data file, per
    /// spec.md §4.4/P8. The ETag is SHA-1 of the full concatenation, matching
    /// the single-PUT convention rather than Amazon's ETag-of-ETags.
    pub async fn put_object_from_parts(
        &self,
        bucket: &str,
        key: &str,
        part_paths: &[PathBuf],
        content_type: Option<String>,
        user_metadata: HashMap<String, String>,
    ) -> Result<PutOutcome, GatewayError> {
        use sha1::Digest;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (guard, data_path, mut temp) = self.begin_write(bucket, key).await?;
        let mut hasher = sha1::Sha1::new();
        let mut total = 0u64;
        let mut buf = vec![0u8; 64 * 1024];

        for part_path in part_paths {
            let mut part_file = match tokio::fs::File::open(part_path).await {
                Ok(f) => f,
                Err(e) => {
                    temp.abort().await;
                    return Err(GatewayError::Io(e));
                }
            };
            loop {
                let n = match part_file.read(&mut buf).await {
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
        }

        let etag = hex::encode(hasher.finalize());
        self.commit_write(
            guard,
            bucket,
            key,
            &data_path,
            temp,
            etag,
            total,
            content_type,
            user_metadata,
            Checksums::default(),
        )
        .await
    }

    /// Returns metadata plus an open handle to the data file, or `None` if
    /// the object doesn't exist (P1).
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<(ObjectMetadata, tokio::fs::File)>, GatewayError> {
        let data_path = metadata::data_path(&self.config.filesystem_storage, bucket, key);
        let _guard = self.locks.read(&data_path).await;

        let meta = self.read_metadata_cached(bucket, key, &data_path).await?;
        let Some(meta) = meta else { return Ok(None) };

        match tokio::fs::File::open(&data_path).await {
            Ok(file) => Ok(Some((meta, file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::Io(e)),
        }
    }

    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, GatewayError> {
        let data_path = metadata::data_path(&self.config.filesystem_storage, bucket, key);
        let _guard = self.locks.read(&data_path).await;
        self.read_metadata_cached(bucket, key, &data_path).await
    }

    async fn read_metadata_cached(
        &self,
        bucket: &str,
        key: &str,
        data_path: &Path,
    ) -> Result<Option<ObjectMetadata>, GatewayError> {
        let metadata_path = metadata::metadata_path(&self.config.filesystem_storage, bucket, key);
        let current_mtime = match &metadata_path {
            Some(p) => tokio::fs::metadata(p).await.ok().and_then(|m| m.modified().ok()),
            None => tokio::fs::metadata(data_path).await.ok().and_then(|m| m.modified().ok()),
        };

        if self.cache.enabled() {
            if let Some(hit) = self.cache.get(bucket, key, current_mtime) {
                return Ok(Some(hit));
            }
        }

        let result = metadata::read_metadata(&self.config.filesystem_storage, bucket, key).await?;
        if let Some(meta) = &result {
            self.cache.put(meta.clone(), current_mtime);
        }
        Ok(result)
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let data_path = metadata::data_path(&self.config.filesystem_storage, bucket, key);
        let _guard = self.locks.write(&data_path).await;

        match tokio::fs::remove_file(&data_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GatewayError::Io(e)),
        }
        metadata::delete_persisted(&self.config.filesystem_storage, bucket, key, &data_path).await?;
        self.cache.invalidate(bucket, key);
        Ok(())
    }

    pub async fn list_bucket(
        &self,
        bucket: &str,
        kind: BucketKind,
        input: listing::ListingInput<'_>,
    ) -> Result<listing::ListingOutput, GatewayError> {
        if !self.bucket_exists(bucket).await {
            return Err(GatewayError::NoSuchBucket(bucket.to_string()));
        }
        listing::list_bucket(&self.config.filesystem_storage, bucket, kind, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemStorageConfig;

    fn engine(dir: &Path) -> StorageEngine {
        let mut config = Config::default();
        config.filesystem_storage = FilesystemStorageConfig {
            data_directory: dir.join("data"),
            metadata_directory: dir.join("meta"),
            ..FilesystemStorageConfig::default()
        };
        StorageEngine::new(config)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_matches_known_etag() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b1").await.unwrap();
        let outcome = engine
            .put_object_bytes("b1", "hello.txt", b"Hello", None, Default::default())
            .await
            .unwrap();
        assert_eq!(outcome.etag, "f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0");

        let (meta, _file) = engine.get_object("b1", "hello.txt").await.unwrap().unwrap();
        assert_eq!(meta.etag, "f7ff9e8b7bb2e09b70935a5d785e0cc5d9d0abf0");
        assert_eq!(meta.content_type, "text/plain");
    }

    #[tokio::test]
    async fn stale_metadata_is_repaired_on_read() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b1").await.unwrap();
        engine
            .put_object_bytes("b1", "hello.txt", b"Hello", None, Default::default())
            .await
            .unwrap();

        let data_path = metadata::data_path(&engine.config.filesystem_storage, "b1", "hello.txt");
        tokio::fs::write(&data_path, b"World").await.unwrap();
        let future_mtime = filetime::FileTime::from_system_time(
            std::time::SystemTime::now() + std::time::Duration::from_secs(2),
        );
        filetime::set_file_mtime(&data_path, future_mtime).unwrap();

        let (meta, _file) = engine.get_object("b1", "hello.txt").await.unwrap().unwrap();
        assert_eq!(meta.etag, "70c07ec18ef89c5309bbb0937f3a6342411e1fdd");
    }

    #[tokio::test]
    async fn missing_data_file_yields_none_and_sweeps_orphan_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b1").await.unwrap();
        engine
            .put_object_bytes("b1", "hello.txt", b"Hello", None, Default::default())
            .await
            .unwrap();
        let data_path = metadata::data_path(&engine.config.filesystem_storage, "b1", "hello.txt");
        tokio::fs::remove_file(&data_path).await.unwrap();

        assert!(engine.get_object("b1", "hello.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_non_empty_bucket_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_bucket("b1").await.unwrap();
        engine
            .put_object_bytes("b1", "hello.txt", b"Hello", None, Default::default())
            .await
            .unwrap();
        let result = engine.delete_bucket("b1", false).await;
        assert!(matches!(result, Err(GatewayError::BucketNotEmpty(_))));
    }
}
