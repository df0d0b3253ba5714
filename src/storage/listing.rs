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

//! Bucket listing, per spec.md §4.3.6.

use std::path::{Path, PathBuf};

use crate::config::FilesystemStorageConfig;
use crate::error::GatewayError;
use crate::types::BucketKind;

pub struct ListingInput<'a> {
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub max_keys: usize,
}

pub struct ListingOutput {
    pub keys: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    pub next_continuation_token: Option<String>,
}

pub(crate) fn is_reserved_segment(segment: &str, config: &FilesystemStorageConfig) -> bool {
    segment.starts_with(&config.inline_metadata_directory_name)
        || segment.starts_with(".lamina-meta")
        || segment.starts_with(&config.temp_file_prefix)
}

/// Walks `DataDirectory/<bucket>` and returns every candidate key, skipping
/// reserved metadata/temp-file path segments. Order is left as filesystem
/// enumeration order; the caller sorts for `GeneralPurpose` buckets.
async fn enumerate_keys(
    root: &Path,
    config: &FilesystemStorageConfig,
) -> Result<Vec<String>, GatewayError> {
    let mut keys = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(relative) = stack.pop() {
        let dir = root.join(&relative);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(GatewayError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(GatewayError::Io)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_reserved_segment(&name, config) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(GatewayError::Io)?;
            let child_relative = relative.join(&name);
            if file_type.is_dir() {
                stack.push(child_relative);
            } else {
                let key = child_relative.to_string_lossy().replace('\\', "/");
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

/// Runs the full listing algorithm of spec.md §4.3.6 against the bucket
/// rooted at `DataDirectory/<bucket>`.
pub async fn list_bucket(
    config: &FilesystemStorageConfig,
    bucket: &str,
    kind: BucketKind,
    input: ListingInput<'_>,
) -> Result<ListingOutput, GatewayError> {
    let root = config.data_directory.join(bucket);
    let mut keys = enumerate_keys(&root, config).await?;

    if kind == BucketKind::GeneralPurpose {
        keys.sort();
    }

    keys.retain(|k| k.starts_with(input.prefix));
    if let Some(after) = input.start_after {
        keys.retain(|k| k.as_str() > after);
    }

    let mut result_keys = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut truncated = false;
    let mut last_consumed: Option<String> = None;

    for key in keys {
        if result_keys.len() + common_prefixes.len() >= input.max_keys {
            truncated = true;
            break;
        }

        if let Some(delim) = input.delimiter.filter(|d| !d.is_empty()) {
            let suffix = &key[input.prefix.len()..];
            if let Some(pos) = suffix.find(delim) {
                let common_prefix = format!("{}{}", input.prefix, &suffix[..pos + delim.len()]);
                if !common_prefixes.contains(&common_prefix) {
                    common_prefixes.push(common_prefix);
                }
                last_consumed = Some(key);
                continue;
            }
        }

        result_keys.push(key.clone());
        last_consumed = Some(key);
    }

    common_prefixes.sort();

    Ok(ListingOutput {
        keys: result_keys,
        common_prefixes,
        truncated,
        next_continuation_token: if truncated { last_consumed } else { None },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetadataMode;

    fn config(dir: &Path) -> FilesystemStorageConfig {
        FilesystemStorageConfig {
            data_directory: dir.to_path_buf(),
            metadata_directory: dir.join("meta"),
            metadata_mode: MetadataMode::SeparateDirectory,
            inline_metadata_directory_name: ".lamina-meta".into(),
            xattr_prefix: "user.lamina.".into(),
            temp_file_prefix: ".lamina-tmp-".into(),
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }

    #[tokio::test]
    async fn delimiter_listing_groups_common_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path());
        let bucket_root = tmp.path().join("b2").join("photos");
        for p in [
            "2021/jan/pic.jpg",
            "2021/feb/pic.jpg",
            "2022/mar/pic.jpg",
        ] {
            let full = bucket_root.join(p);
            tokio::fs::create_dir_all(full.parent().unwrap()).await.unwrap();
            tokio::fs::write(&full, b"x").await.unwrap();
        }
        let readme = tmp.path().join("b2").join("photos").join("readme.txt");
        tokio::fs::write(&readme, b"x").await.unwrap();

        let output = list_bucket(
            &cfg,
            "b2",
            BucketKind::GeneralPurpose,
            ListingInput {
                prefix: "photos/",
                delimiter: Some("/"),
                start_after: None,
                max_keys: 1000,
            },
        )
        .await
        .unwrap();

        assert_eq!(output.keys, vec!["photos/readme.txt".to_string()]);
        assert_eq!(
            output.common_prefixes,
            vec!["photos/2021/".to_string(), "photos/2022/".to_string()]
        );
    }
}
