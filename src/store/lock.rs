//! Store-wide publish lock
//!
//! An exclusive advisory lock on `<root>/.lock`. The OS drops the lock if
//! the holder dies, so a crashed process never wedges the store.

use crate::error::{LfxError, LfxResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff schedule for lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// First retry delay
    pub initial_delay: Duration,
    /// Upper bound for a single retry delay
    pub max_delay: Duration,
    /// Total time to wait before giving up
    pub timeout: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(8),
            max_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

impl LockPolicy {
    /// Default backoff with a different total timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Held publish lock; released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock at `path`, retrying with exponential backoff
    pub async fn acquire(path: &Path, policy: &LockPolicy) -> LfxResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LfxError::io(format!("opening lock {}", path.display()), e))?;

        let start = Instant::now();
        let mut delay = policy.initial_delay;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(LfxError::io(format!("locking {}", path.display()), e));
                }
            }

            let waited = start.elapsed();
            if waited >= policy.timeout {
                return Err(LfxError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: waited.as_millis(),
                });
            }
            debug!("Lock {} busy, retrying in {:?}", path.display(), delay);
            tokio::time::sleep(delay.min(policy.timeout - waited)).await;
            delay = (delay * 2).min(policy.max_delay);
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released lock {}", self.path.display());
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
