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

//! Metadata read/write/repair, per spec.md §4.3.1 and §4.3.5.
//!
//! Three storage modes share one `ObjectMetadata` shape: `SeparateDirectory`
//! (a sibling `.json` tree under `MetadataDirectory`), `Inline` (a `.json`
//! tree nested under the data directory), and `Xattr` (the same fields
//! stored as extended attributes on the data file itself).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::io::AsyncReadExt;

use crate::config::{FilesystemStorageConfig, MetadataMode};
use crate::error::GatewayError;
use crate::s3::utils::{detect_content_type, sha1_hash_hex, to_iso8601utc};
use crate::types::{Checksums, ObjectMetadata, PersistedMetadata};

/// Staleness tolerance, per the glossary's "Stale metadata" definition.
const STALENESS_TOLERANCE: std::time::Duration = std::time::Duration::from_secs(1);

pub fn data_path(config: &FilesystemStorageConfig, bucket: &str, key: &str) -> PathBuf {
    config.data_directory.join(bucket).join(key)
}

pub fn metadata_path(config: &FilesystemStorageConfig, bucket: &str, key: &str) -> Option<PathBuf> {
    match config.metadata_mode {
        MetadataMode::SeparateDirectory => Some(
            config
                .metadata_directory
                .join(bucket)
                .join(format!("{key}.json")),
        ),
        MetadataMode::Inline => Some(
            config
                .data_directory
                .join(bucket)
                .join(&config.inline_metadata_directory_name)
                .join(format!("{key}.json")),
        ),
        MetadataMode::Xattr => None,
    }
}

fn is_default(meta: &ObjectMetadata) -> bool {
    meta.content_type == "application/octet-stream"
        && meta.user_metadata.is_empty()
        && meta.checksums.is_empty()
}

async fn file_size_and_mtime(path: &Path) -> std::io::Result<(u64, SystemTime)> {
    let meta = tokio::fs::metadata(path).await?;
    Ok((meta.len(), meta.modified()?))
}

async fn read_persisted(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
    data: &Path,
) -> Result<Option<PersistedMetadata>, GatewayError> {
    match config.metadata_mode {
        MetadataMode::Xattr => read_xattr(config, bucket, key, data).await,
        MetadataMode::SeparateDirectory | MetadataMode::Inline => {
            let path = metadata_path(config, bucket, key).expect("non-xattr mode has a path");
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                    GatewayError::Internal(format!("corrupt metadata at {path:?}: {e}"))
                })?)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(GatewayError::Io(e)),
            }
        }
    }
}

async fn write_persisted(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
    data: &Path,
    persisted: &PersistedMetadata,
) -> Result<(), GatewayError> {
    match config.metadata_mode {
        MetadataMode::Xattr => write_xattr(config, data, persisted).await,
        MetadataMode::SeparateDirectory | MetadataMode::Inline => {
            let path = metadata_path(config, bucket, key).expect("non-xattr mode has a path");
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(GatewayError::Io)?;
            }
            let body = serde_json::to_vec_pretty(persisted)
                .map_err(|e| GatewayError::Internal(format!("failed to serialize metadata: {e}")))?;
            super::engine::atomic_write(&path, &body, &config.temp_file_prefix).await
        }
    }
}

pub async fn delete_persisted(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
    data: &Path,
) -> Result<(), GatewayError> {
    match config.metadata_mode {
        MetadataMode::Xattr => clear_xattr(config, data).await,
        MetadataMode::SeparateDirectory | MetadataMode::Inline => {
            if let Some(path) = metadata_path(config, bucket, key) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(GatewayError::Io(e)),
                }
            } else {
                Ok(())
            }
        }
    }
}

const XATTR_FIELDS: &[&str] = &[
    "etag",
    "size",
    "lastmodified",
    "contenttype",
    "checksum_crc32",
    "checksum_crc32c",
    "checksum_crc64nvme",
    "checksum_sha1",
    "checksum_sha256",
];

async fn read_xattr(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
    data: &Path,
) -> Result<Option<PersistedMetadata>, GatewayError> {
    let prefix = config.xattr_prefix.clone();
    let data = data.to_path_buf();
    let bucket = bucket.to_string();
    let key = key.to_string();
    tokio::task::spawn_blocking(move || -> Result<Option<PersistedMetadata>, GatewayError> {
        let get = |field: &str| -> Result<Option<String>, GatewayError> {
            match xattr::get(&data, format!("{prefix}{field}")) {
                Ok(Some(bytes)) => Ok(Some(
                    String::from_utf8(bytes)
                        .map_err(|e| GatewayError::Internal(format!("invalid xattr utf-8: {e}")))?,
                )),
                Ok(None) => Ok(None),
                Err(e) => Err(GatewayError::Io(e)),
            }
        };
        let Some(etag) = get("etag")? else {
            return Ok(None);
        };
        let size: u64 = get("size")?
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let last_modified = get("lastmodified")?
            .and_then(|s| crate::s3::utils::from_iso8601utc(&s).ok())
            .unwrap_or_else(chrono::Utc::now);
        let content_type = get("contenttype")?.unwrap_or_else(|| "application/octet-stream".into());
        let checksums = Checksums {
            crc32: get("checksum_crc32")?,
            crc32c: get("checksum_crc32c")?,
            crc64nvme: get("checksum_crc64nvme")?,
            sha1: get("checksum_sha1")?,
            sha256: get("checksum_sha256")?,
        };
        Ok(Some(PersistedMetadata {
            bucket_name: bucket,
            key,
            etag,
            size,
            last_modified,
            content_type,
            metadata: HashMap::new(),
            checksums,
        }))
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("xattr read task panicked: {e}")))?
}

async fn write_xattr(
    config: &FilesystemStorageConfig,
    data: &Path,
    persisted: &PersistedMetadata,
) -> Result<(), GatewayError> {
    let prefix = config.xattr_prefix.clone();
    let data = data.to_path_buf();
    let persisted = persisted.clone();
    tokio::task::spawn_blocking(move || -> Result<(), GatewayError> {
        let set = |field: &str, value: &str| -> Result<(), GatewayError> {
            xattr::set(&data, format!("{prefix}{field}"), value.as_bytes())
                .map_err(GatewayError::Io)
        };
        set("etag", &persisted.etag)?;
        set("size", &persisted.size.to_string())?;
        set("lastmodified", &to_iso8601utc(persisted.last_modified))?;
        set("contenttype", &persisted.content_type)?;
        if let Some(v) = &persisted.checksums.crc32 {
            set("checksum_crc32", v)?;
        }
        if let Some(v) = &persisted.checksums.crc32c {
            set("checksum_crc32c", v)?;
        }
        if let Some(v) = &persisted.checksums.crc64nvme {
            set("checksum_crc64nvme", v)?;
        }
        if let Some(v) = &persisted.checksums.sha1 {
            set("checksum_sha1", v)?;
        }
        if let Some(v) = &persisted.checksums.sha256 {
            set("checksum_sha256", v)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("xattr write task panicked: {e}")))?
}

async fn clear_xattr(config: &FilesystemStorageConfig, data: &Path) -> Result<(), GatewayError> {
    let prefix = config.xattr_prefix.clone();
    let data = data.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), GatewayError> {
        for field in XATTR_FIELDS {
            let _ = xattr::remove(&data, format!("{prefix}{field}"));
        }
        Ok(())
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("xattr clear task panicked: {e}")))?
}

async fn sha1_of_file(path: &Path) -> Result<String, GatewayError> {
    let mut file = tokio::fs::File::open(path).await.map_err(GatewayError::Io)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.map_err(GatewayError::Io)?;
    Ok(sha1_hash_hex(&buf))
}

/// Reads an object's metadata, synthesizing or repairing it per spec.md
/// §4.3.5. Returns `Ok(None)` when the data file does not exist, deleting
/// any orphaned metadata record found along the way (P4).
pub async fn read_metadata(
    config: &FilesystemStorageConfig,
    bucket: &str,
    key: &str,
) -> Result<Option<ObjectMetadata>, GatewayError> {
    let data = data_path(config, bucket, key);
    let (size, mtime) = match file_size_and_mtime(&data).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            delete_persisted(config, bucket, key, &data).await?;
            return Ok(None);
        }
        Err(e) => return Err(GatewayError::Io(e)),
    };
    let last_modified: chrono::DateTime<chrono::Utc> = mtime.into();

    let persisted = read_persisted(config, bucket, key, &data).await?;
    let persisted = match persisted {
        Some(p) => p,
        None => PersistedMetadata {
            bucket_name: bucket.to_string(),
            key: key.to_string(),
            etag: sha1_of_file(&data).await?,
            size,
            last_modified,
            content_type: detect_content_type(key).to_string(),
            metadata: HashMap::new(),
            checksums: Checksums::default(),
        },
    };

    let diff_ms = if persisted.last_modified > last_modified {
        persisted.last_modified - last_modified
    } else {
        last_modified - persisted.last_modified
    }
    .num_milliseconds()
    .unsigned_abs();
    let stale = persisted.size != size || diff_ms > STALENESS_TOLERANCE.as_millis() as u64;

    if !stale {
        return Ok(Some(ObjectMetadata::from_persisted(persisted)));
    }

    let etag = sha1_of_file(&data).await?;
    let checksums = if persisted.checksums.is_empty() {
        Checksums::default()
    } else {
        recompute_checksums(&data, &persisted.checksums).await?
    };
    Ok(Some(ObjectMetadata::from_persisted(PersistedMetadata {
        etag,
        size,
        last_modified,
        checksums,
        ..persisted
    })))
}

async fn recompute_checksums(path: &Path, previous: &Checksums) -> Result<Checksums, GatewayError> {
    let mut file = tokio::fs::File::open(path).await.map_err(GatewayError::Io)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await.map_err(GatewayError::Io)?;
    Ok(Checksums {
        crc32: previous.crc32.as_ref().map(|_| crate::storage::checksum::crc32(&bytes)),
        crc32c: previous.crc32c.as_ref().map(|_| crate::storage::checksum::crc32c(&bytes)),
        crc64nvme: previous
            .crc64nvme
            .as_ref()
            .map(|_| crate::storage::checksum::crc64nvme(&bytes)),
        sha1: previous.sha1.as_ref().map(|_| crate::storage::checksum::sha1(&bytes)),
        sha256: previous.sha256.as_ref().map(|_| crate::storage::checksum::sha256(&bytes)),
    })
}

/// Persists `meta`'s metadata only if it differs from the all-defaults
/// shape, per spec.md §4.3.5.
pub async fn write_metadata(
    config: &FilesystemStorageConfig,
    meta: &ObjectMetadata,
) -> Result<(), GatewayError> {
    if is_default(meta) {
        return Ok(());
    }
    let data = data_path(config, &meta.bucket, &meta.key);
    let persisted = meta.clone().into_persisted();
    write_persisted(config, &meta.bucket, &meta.key, &data, &persisted).await
}
