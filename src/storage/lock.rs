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

//! Per-path reader-writer lock manager, per spec.md §4.3.4 / §5.
//!
//! Keys on the canonicalized absolute path. Entries are reference-counted
//! and removed once the last holder drops its guard, so the map doesn't
//! grow unboundedly across the process lifetime. The slow path
//! (create/destroy an entry) takes the map's own short critical section;
//! the fast path (an existing entry) only touches the per-path `RwLock`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

struct Entry {
    lock: Arc<RwLock<()>>,
    ref_count: usize,
}

/// Holds a read or write guard alongside the bookkeeping needed to drop
/// the entry's reference count when the guard is released.
pub struct ReadGuard {
    _guard: OwnedRwLockReadGuard<()>,
    manager: LockManager,
    key: String,
}

pub struct WriteGuard {
    _guard: OwnedRwLockWriteGuard<()>,
    manager: LockManager,
    key: String,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

#[derive(Clone, Default)]
pub struct LockManager {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

fn normalize_key(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.to_lowercase()
    } else {
        s.to_string()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, path: &Path) -> (String, Arc<RwLock<()>>) {
        let key = normalize_key(path);
        let mut entries = self.entries.lock().expect("lock manager mutex poisoned");
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            ref_count: 0,
        });
        entry.ref_count += 1;
        (key, entry.lock.clone())
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock().expect("lock manager mutex poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                entries.remove(key);
            }
        }
    }

    pub async fn read(&self, path: &Path) -> ReadGuard {
        let (key, lock) = self.acquire(path);
        let guard = lock.read_owned().await;
        ReadGuard {
            _guard: guard,
            manager: self.clone(),
            key,
        }
    }

    pub async fn write(&self, path: &Path) -> WriteGuard {
        let (key, lock) = self.acquire(path);
        let guard = lock.write_owned().await;
        WriteGuard {
            _guard: guard,
            manager: self.clone(),
            key,
        }
    }
}

/// Convenience: acquires a write lock on `path`'s parent-relative final
/// path, runs `op`, and releases regardless of outcome — the shape every
/// call site in the storage engine uses.
pub async fn with_write_lock<F, Fut, T>(manager: &LockManager, path: &Path, op: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let _guard = manager.write(path).await;
    op().await
}

pub async fn with_read_lock<F, Fut, T>(manager: &LockManager, path: &Path, op: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let _guard = manager.read(path).await;
    op().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_readers_do_not_block_each_other() {
        let manager = LockManager::new();
        let path = PathBuf::from("/tmp/lamina-test/obj");
        let g1 = manager.read(&path).await;
        let g2 = tokio::time::timeout(Duration::from_millis(50), manager.read(&path)).await;
        assert!(g2.is_ok());
        drop(g1);
    }

    #[tokio::test]
    async fn writer_excludes_other_writers() {
        let manager = LockManager::new();
        let path = PathBuf::from("/tmp/lamina-test/obj2");
        let g1 = manager.write(&path).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), manager.write(&path)).await;
        assert!(blocked.is_err());
        drop(g1);
        let now_ok = tokio::time::timeout(Duration::from_millis(50), manager.write(&path)).await;
        assert!(now_ok.is_ok());
    }

    #[tokio::test]
    async fn entry_is_removed_after_last_release() {
        let manager = LockManager::new();
        let path = PathBuf::from("/tmp/lamina-test/obj3");
        {
            let _g = manager.write(&path).await;
            assert_eq!(manager.entries.lock().unwrap().len(), 1);
        }
        assert_eq!(manager.entries.lock().unwrap().len(), 0);
    }
}
