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

//! Layered configuration: compiled defaults → optional TOML file → `LAMINA_*`
//! environment variables. Key set is the exhaustive one from the external
//! interfaces section: `StorageType`, `LockManager`, `FilesystemStorage.*`,
//! `MetadataCache.*`, the three cleaner sections, and `Authentication.*`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum StorageType {
    #[default]
    Filesystem,
    InMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum LockManagerKind {
    #[default]
    InMemory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MetadataMode {
    #[default]
    SeparateDirectory,
    Inline,
    Xattr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilesystemStorageConfig {
    pub data_directory: PathBuf,
    pub metadata_directory: PathBuf,
    #[serde(default)]
    pub metadata_mode: MetadataMode,
    #[serde(default = "default_inline_dir")]
    pub inline_metadata_directory_name: String,
    #[serde(default = "default_xattr_prefix")]
    pub xattr_prefix: String,
    #[serde(default = "default_temp_prefix")]
    pub temp_file_prefix: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_inline_dir() -> String {
    ".lamina-meta".to_string()
}
fn default_xattr_prefix() -> String {
    "user.lamina.".to_string()
}
fn default_temp_prefix() -> String {
    ".lamina-tmp-".to_string()
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for FilesystemStorageConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("./data"),
            metadata_directory: PathBuf::from("./metadata"),
            metadata_mode: MetadataMode::default(),
            inline_metadata_directory_name: default_inline_dir(),
            xattr_prefix: default_xattr_prefix(),
            temp_file_prefix: default_temp_prefix(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    pub absolute_expiration_minutes: Option<u64>,
    pub sliding_expiration_minutes: Option<u64>,
    #[serde(default = "default_cache_capacity_bytes")]
    pub capacity_bytes: u64,
}

fn default_cache_capacity_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            absolute_expiration_minutes: None,
            sliding_expiration_minutes: Some(30),
            capacity_bytes: default_cache_capacity_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MultipartUploadCleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_upload_timeout_hours")]
    pub timeout_hours: u64,
}

fn default_upload_timeout_hours() -> u64 {
    24
}

impl Default for MultipartUploadCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            timeout_hours: default_upload_timeout_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataCleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for MetadataCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TempFileCleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_temp_file_age_minutes")]
    pub temp_file_age_minutes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_temp_file_age_minutes() -> u64 {
    60
}

impl Default for TempFileCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            temp_file_age_minutes: default_temp_file_age_minutes(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_interval_minutes() -> u64 {
    15
}
fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketPermission {
    pub bucket_name: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bucket_permissions: Vec<BucketPermission>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(default)]
    pub storage_type: StorageType,
    #[serde(default)]
    pub lock_manager: LockManagerKind,
    #[serde(default)]
    pub filesystem_storage: FilesystemStorageConfig,
    #[serde(default)]
    pub metadata_cache: MetadataCacheConfig,
    #[serde(default)]
    pub multipart_upload_cleanup: MultipartUploadCleanupConfig,
    #[serde(default)]
    pub metadata_cleanup: MetadataCleanupConfig,
    #[serde(default)]
    pub temp_file_cleanup: TempFileCleanupConfig,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_port() -> u16 {
    9000
}
fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_type: StorageType::default(),
            lock_manager: LockManagerKind::default(),
            filesystem_storage: FilesystemStorageConfig::default(),
            metadata_cache: MetadataCacheConfig::default(),
            multipart_upload_cleanup: MultipartUploadCleanupConfig::default(),
            metadata_cleanup: MetadataCleanupConfig::default(),
            temp_file_cleanup: TempFileCleanupConfig::default(),
            authentication: AuthenticationConfig::default(),
            port: default_port(),
            region: default_region(),
        }
    }
}

impl Config {
    /// Loads defaults, then an optional TOML file, then `LAMINA_*` environment
    /// overrides (double-underscore separated, e.g. `LAMINA_FILESYSTEMSTORAGE__DATADIRECTORY`).
    pub fn load(file: Option<&std::path::Path>) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("Port", defaults.port as i64)?
            .set_default("Region", defaults.region.clone())?;
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("LAMINA")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    /// Looks up a configured user by access key, returning its permissions too.
    pub fn user(&self, access_key: &str) -> Option<&UserConfig> {
        self.authentication
            .users
            .iter()
            .find(|u| u.access_key_id == access_key)
    }

    /// Secret lookup as a flat map, the shape the signer wants.
    pub fn secrets(&self) -> HashMap<String, String> {
        self.authentication
            .users
            .iter()
            .map(|u| (u.access_key_id.clone(), u.secret_access_key.clone()))
            .collect()
    }
}
