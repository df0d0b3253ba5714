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

//! Core data model: buckets, objects, and multipart uploads, per spec.md §3.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::s3::utils::{iso8601, ChecksumAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    GeneralPurpose,
    Directory,
}

impl BucketKind {
    /// Directory buckets follow AWS's own naming convention: a
    /// `--x-s3` (or availability-zone-qualified `--<az>--x-s3`) suffix.
    /// There is no separate marker file; the name itself carries the type.
    pub fn from_bucket_name(name: &str) -> Self {
        if name.ends_with("--x-s3") {
            BucketKind::Directory
        } else {
            BucketKind::GeneralPurpose
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub created: chrono::DateTime<chrono::Utc>,
    pub kind: BucketKind,
}

/// Checksum values, base64-encoded per the AWS `x-amz-checksum-*` convention
/// (distinct from the hex encoding `ETag` uses).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checksums {
    #[serde(rename = "ChecksumCRC32", skip_serializing_if = "Option::is_none")]
    pub crc32: Option<String>,
    #[serde(rename = "ChecksumCRC32C", skip_serializing_if = "Option::is_none")]
    pub crc32c: Option<String>,
    #[serde(rename = "ChecksumCRC64NVME", skip_serializing_if = "Option::is_none")]
    pub crc64nvme: Option<String>,
    #[serde(rename = "ChecksumSHA1", skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(rename = "ChecksumSHA256", skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl Checksums {
    pub fn is_empty(&self) -> bool {
        self.crc32.is_none()
            && self.crc32c.is_none()
            && self.crc64nvme.is_none()
            && self.sha1.is_none()
            && self.sha256.is_none()
    }

    pub fn set(&mut self, algorithm: ChecksumAlgorithm, value: String) {
        match algorithm {
            ChecksumAlgorithm::Crc32 => self.crc32 = Some(value),
            ChecksumAlgorithm::Crc32c => self.crc32c = Some(value),
            ChecksumAlgorithm::Crc64Nvme => self.crc64nvme = Some(value),
            ChecksumAlgorithm::Sha1 => self.sha1 = Some(value),
            ChecksumAlgorithm::Sha256 => self.sha256 = Some(value),
        }
    }

    pub fn from_map(map: HashMap<ChecksumAlgorithm, String>) -> Self {
        let mut checksums = Self::default();
        for (algorithm, value) in map {
            checksums.set(algorithm, value);
        }
        checksums
    }
}

/// The persisted JSON shape for object metadata, per spec.md §6. Field
/// names follow the `PascalCase` the original system writes to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMetadata {
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "LastModified", with = "iso8601")]
    pub last_modified: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "ContentType")]
    pub content_type: String,
    #[serde(rename = "Metadata", default)]
    pub metadata: HashMap<String, String>,
    #[serde(flatten)]
    pub checksums: Checksums,
}

/// In-memory view of an object handed back to the HTTP layer; always
/// derived from a `PersistedMetadata` plus the data file's own size/mtime.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub content_type: String,
    pub user_metadata: HashMap<String, String>,
    pub checksums: Checksums,
}

impl ObjectMetadata {
    pub fn into_persisted(self) -> PersistedMetadata {
        PersistedMetadata {
            bucket_name: self.bucket,
            key: self.key,
            etag: self.etag,
            size: self.size,
            last_modified: self.last_modified,
            content_type: self.content_type,
            metadata: self.user_metadata,
            checksums: self.checksums,
        }
    }

    pub fn from_persisted(p: PersistedMetadata) -> Self {
        Self {
            bucket: p.bucket_name,
            key: p.key,
            etag: p.etag,
            size: p.size,
            last_modified: p.last_modified,
            content_type: p.content_type,
            user_metadata: p.metadata,
            checksums: p.checksums,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartMetadata {
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "LastModified", with = "iso8601")]
    pub last_modified: chrono::DateTime<chrono::Utc>,
    #[serde(flatten, default)]
    pub checksums: Checksums,
}

/// The persisted JSON shape for a multipart upload record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUpload {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Initiated", with = "iso8601")]
    pub initiated: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "ContentType")]
    pub content_type: String,
    #[serde(rename = "Metadata", default)]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "Parts", default)]
    pub parts: BTreeMap<u16, PartMetadata>,
}
