//! Timestamp marker files.
//!
//! A metafile records the time of the last event in its mtime. It backs the
//! self-update rate limit and the release LRU used by garbage collection.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::fs::{create_dir_all, is_absent};
use crate::lock::{AcquireOptions, FileLocker, DEFAULT_LOCK_TIMEOUT};

/// Timestamp marker backed by a file's mtime.
#[derive(Debug, Clone)]
pub struct Metafile {
    path: PathBuf,
}

impl Metafile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_name(&self) -> String {
        format!("metafile:{}", self.path.display())
    }

    /// Whether the marker exists and was touched at most `period` ago.
    pub async fn modified_within(&self, locker: &FileLocker, period: Duration) -> Result<bool> {
        let opts = AcquireOptions::shared(DEFAULT_LOCK_TIMEOUT);
        let path = self.path.as_path();
        locker
            .with_lock(&self.lock_name(), opts, move || async move {
                let meta = match std::fs::metadata(path) {
                    Ok(meta) => meta,
                    Err(e) if is_absent(&e) => return Ok(false),
                    Err(e) => return Err(e.into()),
                };

                let modified = meta.modified()?;
                Ok(match SystemTime::now().duration_since(modified) {
                    Ok(elapsed) => elapsed <= period,
                    // mtime in the future
                    Err(_) => true,
                })
            })
            .await
    }

    /// Recreate the marker so that its mtime is now.
    pub async fn reset(&self, locker: &FileLocker) -> Result<()> {
        let opts = AcquireOptions::exclusive(DEFAULT_LOCK_TIMEOUT);
        let path = self.path.as_path();
        locker
            .with_lock(&self.lock_name(), opts, move || async move {
                remove_if_exists(path)?;
                if let Some(parent) = path.parent() {
                    create_dir_all(parent)?;
                }
                std::fs::File::create(path)?;
                tracing::trace!(path = %path.display(), "Metafile reset");
                Ok(())
            })
            .await
    }

    /// Remove the marker if present.
    pub async fn delete(&self, locker: &FileLocker) -> Result<()> {
        let opts = AcquireOptions::exclusive(DEFAULT_LOCK_TIMEOUT);
        let path = self.path.as_path();
        locker
            .with_lock(&self.lock_name(), opts, move || async move {
                remove_if_exists(path)?;
                Ok(())
            })
            .await
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileLocker, Metafile) {
        let tmp = TempDir::new().unwrap();
        let locker = FileLocker::new(tmp.path().join(".locks")).unwrap();
        let metafile = Metafile::new(tmp.path().join(".metafiles/releases/42"));
        (tmp, locker, metafile)
    }

    #[tokio::test]
    async fn test_missing_is_not_modified() {
        let (_tmp, locker, metafile) = setup();
        assert!(!metafile
            .modified_within(&locker, Duration::from_secs(3600))
            .await
            .unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_in_place_of_parent_is_not_modified() {
        let (tmp, locker, _) = setup();
        std::fs::write(tmp.path().join("releases"), "not a directory").unwrap();
        let metafile = Metafile::new(tmp.path().join("releases/42"));

        assert!(!metafile
            .modified_within(&locker, Duration::from_secs(3600))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reset_creates_parents() {
        let (_tmp, locker, metafile) = setup();
        metafile.reset(&locker).await.unwrap();

        assert!(metafile.path().is_file());
        assert!(metafile
            .modified_within(&locker, Duration::from_secs(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_old_marker_is_not_modified() {
        let (_tmp, locker, metafile) = setup();
        metafile.reset(&locker).await.unwrap();

        let old = SystemTime::now() - Duration::from_secs(25 * 3600);
        std::fs::File::options()
            .write(true)
            .open(metafile.path())
            .unwrap()
            .set_modified(old)
            .unwrap();

        assert!(!metafile
            .modified_within(&locker, Duration::from_secs(24 * 3600))
            .await
            .unwrap());

        metafile.reset(&locker).await.unwrap();
        assert!(metafile
            .modified_within(&locker, Duration::from_secs(24 * 3600))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_tmp, locker, metafile) = setup();
        metafile.reset(&locker).await.unwrap();
        metafile.delete(&locker).await.unwrap();
        assert!(!metafile.path().exists());

        // Deleting again is a no-op
        metafile.delete(&locker).await.unwrap();
    }
}
