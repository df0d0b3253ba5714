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

//! Bounded in-process metadata cache, per spec.md §4.3.7.
//!
//! Keyed by `(bucket, key)`; each entry remembers the data- and metadata-file
//! mtimes observed at cache time so a read can detect that the underlying
//! metadata file moved on without the cache hearing about it (e.g. a
//! concurrent write through a second process). Approximate byte accounting
//! only — the config's capacity is a soft cap, not an exact one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use crate::config::MetadataCacheConfig;
use crate::types::ObjectMetadata;

struct Entry {
    value: ObjectMetadata,
    metadata_mtime: Option<SystemTime>,
    inserted_at: Instant,
    last_touched: Instant,
    approx_bytes: u64,
}

pub struct MetadataCache {
    config: MetadataCacheConfig,
    entries: Mutex<HashMap<(String, String), Entry>>,
    approx_total_bytes: Mutex<u64>,
}

fn approx_size(meta: &ObjectMetadata) -> u64 {
    (meta.bucket.len() + meta.key.len() + meta.etag.len() + meta.content_type.len() + 64) as u64
}

impl MetadataCache {
    pub fn new(config: MetadataCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            approx_total_bytes: Mutex::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the cached value, provided it hasn't expired and the
    /// metadata file's mtime still matches what was cached. `current_mtime`
    /// is `None` when the metadata file no longer exists.
    pub fn get(&self, bucket: &str, key: &str, current_mtime: Option<SystemTime>) -> Option<ObjectMetadata> {
        if !self.config.enabled {
            return None;
        }
        let key_tuple = (bucket.to_string(), key.to_string());
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let entry = entries.get_mut(&key_tuple)?;

        if entry.metadata_mtime != current_mtime {
            let bytes = entry.approx_bytes;
            entries.remove(&key_tuple);
            let mut total = self.approx_total_bytes.lock().unwrap();
            *total -= bytes.min(*total);
            return None;
        }
        if let Some(minutes) = self.config.absolute_expiration_minutes {
            if entry.inserted_at.elapsed() > Duration::from_secs(minutes * 60) {
                entries.remove(&key_tuple);
                return None;
            }
        }
        if let Some(minutes) = self.config.sliding_expiration_minutes {
            if entry.last_touched.elapsed() > Duration::from_secs(minutes * 60) {
                entries.remove(&key_tuple);
                return None;
            }
        }
        entry.last_touched = Instant::now();
        Some(entry.value.clone())
    }

    pub fn put(&self, meta: ObjectMetadata, metadata_mtime: Option<SystemTime>) {
        if !self.config.enabled {
            return;
        }
        let bytes = approx_size(&meta);
        let key_tuple = (meta.bucket.clone(), meta.key.clone());
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let mut total = self.approx_total_bytes.lock().unwrap();

        if let Some(old) = entries.remove(&key_tuple) {
            *total -= old.approx_bytes.min(*total);
        }
        while *total + bytes > self.config.capacity_bytes {
            let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_touched)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(evicted) = entries.remove(&oldest_key) {
                *total -= evicted.approx_bytes.min(*total);
            }
        }
        let now = Instant::now();
        entries.insert(
            key_tuple,
            Entry {
                value: meta,
                metadata_mtime,
                inserted_at: now,
                last_touched: now,
                approx_bytes: bytes,
            },
        );
        *total += bytes;
    }

    pub fn invalidate(&self, bucket: &str, key: &str) {
        let key_tuple = (bucket.to_string(), key.to_string());
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        if let Some(removed) = entries.remove(&key_tuple) {
            let mut total = self.approx_total_bytes.lock().unwrap();
            *total -= removed.approx_bytes.min(*total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Checksums;

    fn sample(bucket: &str, key: &str) -> ObjectMetadata {
        ObjectMetadata {
            bucket: bucket.into(),
            key: key.into(),
            etag: "abc".into(),
            size: 5,
            last_modified: chrono::Utc::now(),
            content_type: "text/plain".into(),
            user_metadata: Default::default(),
            checksums: Checksums::default(),
        }
    }

    #[test]
    fn put_then_get_with_matching_mtime_hits() {
        let cache = MetadataCache::new(MetadataCacheConfig {
            enabled: true,
            absolute_expiration_minutes: None,
            sliding_expiration_minutes: None,
            capacity_bytes: 1024 * 1024,
        });
        let mtime = SystemTime::now();
        cache.put(sample("b", "k"), Some(mtime));
        assert!(cache.get("b", "k", Some(mtime)).is_some());
    }

    #[test]
    fn mismatched_mtime_is_a_miss_and_evicts() {
        let cache = MetadataCache::new(MetadataCacheConfig {
            enabled: true,
            absolute_expiration_minutes: None,
            sliding_expiration_minutes: None,
            capacity_bytes: 1024 * 1024,
        });
        let t1 = SystemTime::now();
        let t2 = t1 + Duration::from_secs(5);
        cache.put(sample("b", "k"), Some(t1));
        assert!(cache.get("b", "k", Some(t2)).is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = MetadataCache::new(MetadataCacheConfig {
            enabled: true,
            absolute_expiration_minutes: None,
            sliding_expiration_minutes: None,
            capacity_bytes: 1024 * 1024,
        });
        cache.put(sample("b", "k"), None);
        cache.invalidate("b", "k");
        assert!(cache.get("b", "k", None).is_none());
    }
}
