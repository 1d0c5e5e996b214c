//! Garbage collection of unused releases.

use std::collections::HashSet;

use trdl_core::error::Result;
use trdl_core::fs::{is_dir, is_regular_file, list_dir};

use super::{read_release, RepoClient, RELEASE_RETENTION};

impl RepoClient {
    /// Remove releases that no channel points at and that were not used
    /// within [`RELEASE_RETENTION`].
    ///
    /// Channel locks are not taken: readers reset the release metafile before
    /// using a release, which keeps it out of reach for the retention window.
    pub async fn clean_releases(&self) -> Result<()> {
        let alive = self.alive_releases()?;

        for release_dir in list_dir(&self.releases_dir())? {
            let Some(release) = release_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_dir(&release_dir)? || alive.contains(release) {
                continue;
            }

            let metafile = self.release_metafile(release);
            if metafile
                .modified_within(&self.locker, RELEASE_RETENTION)
                .await?
            {
                tracing::debug!(repo = %self.name, release, "Release used recently, keeping");
                continue;
            }

            // Metafile goes first so an interrupted removal cannot leave a
            // fresh LRU entry behind.
            metafile.delete(&self.locker).await?;
            std::fs::remove_dir_all(&release_dir)?;
            tracing::info!(repo = %self.name, release, "Release removed");
        }
        Ok(())
    }

    /// Releases referenced by any local channel pointer.
    fn alive_releases(&self) -> Result<HashSet<String>> {
        let mut alive = HashSet::new();
        for group_dir in list_dir(&self.channels_dir())? {
            for pointer in list_dir(&group_dir)? {
                if is_regular_file(&pointer)? {
                    alive.insert(read_release(&pointer)?);
                }
            }
        }
        Ok(alive)
    }
}
