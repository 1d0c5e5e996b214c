//! Named advisory file locks.
//!
//! Every lock name maps to a lockfile under a dedicated directory. Locks are
//! taken with `flock`-style advisory locking, so they are observed across
//! processes and, because each acquisition opens its own file handle, across
//! tasks of the same process as well.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use sha2::{Digest, Sha256};

use crate::error::{Result, TrdlError};
use crate::fs::create_dir_all;

/// Default time to wait for a lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between attempts while waiting for a held lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest sanitized name kept as-is before it gets shortened with a digest.
const MAX_LOCK_NAME_LEN: usize = 128;

/// How a lock is to be acquired.
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub shared: bool,
    pub non_blocking: bool,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl AcquireOptions {
    pub fn exclusive(timeout: Duration) -> Self {
        Self {
            shared: false,
            non_blocking: false,
            timeout: Some(timeout),
        }
    }

    pub fn shared(timeout: Duration) -> Self {
        Self {
            shared: true,
            non_blocking: false,
            timeout: Some(timeout),
        }
    }

    /// Fail with [`TrdlError::WouldBlock`] instead of waiting.
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::exclusive(DEFAULT_LOCK_TIMEOUT)
    }
}

/// Held lock. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    file: Option<File>,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock explicitly, reporting unlock failures.
    pub fn release(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                FileExt::unlock(&file)?;
                tracing::trace!(lock = %self.name, "Lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // Closing the handle releases the lock even if unlock fails.
            let _ = FileExt::unlock(&file);
            tracing::trace!(lock = %self.name, "Lock released");
        }
    }
}

/// Lock manager rooted at a locks directory.
#[derive(Debug, Clone)]
pub struct FileLocker {
    dir: PathBuf,
}

impl FileLocker {
    /// Create a locker, creating the locks directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir).map_err(|e| {
            TrdlError::Io(io::Error::new(
                e.kind(),
                format!("failed to create locks dir {}: {}", dir.display(), e),
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Acquire the named lock.
    pub async fn acquire(&self, name: &str, opts: AcquireOptions) -> Result<LockGuard> {
        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = opts.timeout.map(|t| Instant::now() + t);
        let mut waited = false;

        loop {
            let attempt = if opts.shared {
                FileExt::try_lock_shared(&file)
            } else {
                FileExt::try_lock_exclusive(&file)
            };

            match attempt {
                Ok(()) => {
                    tracing::trace!(lock = %name, shared = opts.shared, "Lock acquired");
                    return Ok(LockGuard {
                        name: name.to_string(),
                        file: Some(file),
                    });
                }
                Err(e) if is_contended(&e) => {
                    if opts.non_blocking {
                        return Err(TrdlError::WouldBlock {
                            name: name.to_string(),
                        });
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(TrdlError::LockTimeout {
                            name: name.to_string(),
                        });
                    }
                    if !waited {
                        tracing::debug!(lock = %name, "Waiting for lock");
                        waited = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `f` while holding the named lock. The lock is released on every
    /// exit path.
    pub async fn with_lock<T, F, Fut>(&self, name: &str, opts: AcquireOptions, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(name, opts).await?;
        let result = f().await;
        drop(guard);
        result
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_lock_name(name))
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Turn an arbitrary lock name (possibly a filesystem path) into a flat,
/// filesystem-safe file name.
pub fn sanitize_lock_name(name: &str) -> String {
    let sanitized: String = name
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.len() > MAX_LOCK_NAME_LEN {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        let keep = sanitized.len().min(MAX_LOCK_NAME_LEN - 17);
        let tail = &sanitized[sanitized.len() - keep..];
        return format!("{}-{}", &digest[..16], tail);
    }
    sanitized
}
