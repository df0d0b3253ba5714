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

//! Classifies filesystem errors that are transient on network mounts
//! (CIFS/NFS) and retries the operations that hit them, per spec.md §4.3.3.

use std::future::Future;
use std::io;
use std::time::Duration;

const TRANSIENT_MESSAGES: &[&str] = &[
    "process cannot access the file",
    "network path was not found",
    "access is denied",
    "sharing violation",
    "network name is no longer available",
    "directory is not empty",
    "stale nfs file handle",
    "input/output error",
];

/// True when `err` looks like a transient network-filesystem condition
/// rather than a persistent failure (e.g. disk quota exceeded).
pub fn is_transient(err: &io::Error) -> bool {
    if err.raw_os_error() == Some(libc_estale()) {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|m| msg.contains(m))
}

#[cfg(target_os = "linux")]
fn libc_estale() -> i32 {
    libc::ESTALE
}

#[cfg(not(target_os = "linux"))]
fn libc_estale() -> i32 {
    -1
}

/// Retries `op` up to `retry_count` additional times (so `retry_count + 1`
/// attempts total) with a fixed `retry_delay` backoff, only for transient
/// errors. Non-transient errors and retry exhaustion both propagate.
pub async fn with_retry<F, Fut, T>(
    retry_count: u32,
    retry_delay: Duration,
    mut op: F,
) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < retry_count && is_transient(&e) => {
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_transient_messages() {
        let err = io::Error::other("Stale NFS file handle");
        assert!(is_transient(&err));
    }

    #[test]
    fn does_not_classify_quota_errors_as_transient() {
        let err = io::Error::other("Disk quota exceeded");
        assert!(!is_transient(&err));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let mut attempts = 0;
        let result = with_retry(3, Duration::from_millis(1), || {
            attempts += 1;
            async move {
                if attempts < 3 {
                    Err(io::Error::other("network path was not found"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn does_not_retry_fatal_errors() {
        let mut attempts = 0;
        let result: io::Result<()> = with_retry(3, Duration::from_millis(1), || {
            attempts += 1;
            async move { Err(io::Error::other("Disk quota exceeded")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
