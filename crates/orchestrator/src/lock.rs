//! Process-wide advisory lock (§4.6): a single file path whose exclusive
//! lock serializes `genUpdatePlan`, `execUpdatePlan` and `selfUpdate` across
//! invocations on the same host. Acquire logs a progress message once it has
//! waited a full second; release happens on every exit path via RAII.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::info;

use crate::error::{InternalError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_AFTER: Duration = Duration::from_secs(1);

/// Guards one mutating top-level operation. Dropping it releases the lock
/// unconditionally, even on an early return via `?`.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release advisory lock");
        }
    }
}

/// Acquires the exclusive advisory lock at `path`, blocking other writers on
/// the same host. Creates the file (and its parent directory) if absent.
pub async fn acquire(path: impl AsRef<Path>) -> Result<LockGuard> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(InternalError::Io)?;
    }

    let file = OpenOptions::new().create(true).write(true).open(&path).map_err(InternalError::Io)?;

    let started = Instant::now();
    let mut progress_logged = false;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file, path }),
            Err(_) => {
                if !progress_logged && started.elapsed() >= PROGRESS_AFTER {
                    info!(path = %path.display(), "waiting to acquire advisory lock");
                    progress_logged = true;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.lock");

        let guard = acquire(&path).await.unwrap();
        drop(guard);

        // A second acquire must not block once the first guard is dropped.
        let second = tokio::time::timeout(Duration::from_secs(2), acquire(&path)).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn concurrent_acquire_blocks_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.lock");

        let first = acquire(&path).await.unwrap();

        let path_clone = path.clone();
        let waiter = tokio::spawn(async move { acquire(&path_clone).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap();
        assert!(second.is_ok());
    }
}
