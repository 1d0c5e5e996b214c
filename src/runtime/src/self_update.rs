//! Agent self-update.
//!
//! The agent follows its own repository like any other, then replaces the
//! running executable when the channel points at a different version.

use std::time::Duration;

use trdl_core::error::{Result, TrdlError};
use trdl_core::{is_current_version, AcquireOptions, Metafile, DEFAULT_LOCK_TIMEOUT};

use crate::client::Client;

const SELF_UPDATE_LOCK_NAME: &str = "self-update";

/// Minimum interval between two self-update attempts.
pub const SELF_UPDATE_DELAY: Duration = Duration::from_secs(30);

impl Client {
    fn self_update_metafile(&self) -> Metafile {
        Metafile::new(self.home().join(".metafiles").join("self-update"))
    }

    /// Update the agent from its own repository.
    ///
    /// Returns immediately when another process is already updating or an
    /// attempt was made within [`SELF_UPDATE_DELAY`].
    pub async fn self_update(&mut self, autoclean: bool) -> Result<()> {
        let opts = AcquireOptions::exclusive(DEFAULT_LOCK_TIMEOUT).non_blocking();
        let _guard = match self.locker().acquire(SELF_UPDATE_LOCK_NAME, opts).await {
            Ok(guard) => guard,
            Err(TrdlError::WouldBlock { .. }) => {
                tracing::debug!("Self-update is already running");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let metafile = self.self_update_metafile();
        if metafile
            .modified_within(self.locker(), SELF_UPDATE_DELAY)
            .await?
        {
            tracing::debug!("Self-update was attempted recently, skipping");
            return Ok(());
        }

        let result = self.do_self_update(autoclean).await;
        metafile.reset(self.locker()).await?;
        result
    }

    async fn do_self_update(&mut self, autoclean: bool) -> Result<()> {
        let settings = self.self_update.clone();
        if settings.root_sha512.is_empty() {
            return Err(TrdlError::InvalidArgument(
                "self-update root checksum is not configured".to_string(),
            ));
        }

        if self.repositories().iter().all(|r| r.name != settings.repo) {
            self.add_repo(
                &settings.repo,
                &settings.url,
                settings.root_version,
                &settings.root_sha512,
            )
            .await?;
        }

        let channel = self
            .repositories()
            .iter()
            .find(|r| r.name == settings.repo)
            .map(|r| r.channel())
            .unwrap_or_default();
        let mut repo = self.repo_client(&settings.repo)?;
        repo.update_channel(&settings.group, channel).await?;

        let release = repo.get_channel_release(&settings.group, channel)?;
        if is_current_version(&release) {
            tracing::debug!(release = %release, "Agent is up to date");
            return Ok(());
        }

        let new_binary = repo
            .channel_release_bin_path(&settings.group, channel, None)
            .await?;
        let target = self.executable()?;
        trdl_updater::replace_executable(&target, &new_binary).map_err(|e| {
            TrdlError::Internal(format!("failed to replace {}: {e:#}", target.display()))
        })?;
        tracing::info!(release = %release, path = %target.display(), "Agent updated");

        if autoclean {
            repo.clean_releases().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{memory_connector, remote};
    use crate::client::SelfUpdateSettings;
    use crate::tuf::MemoryRemote;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn native_release(remote: &MemoryRemote, release: &str, content: &str) {
        let (os, arch) = crate::repo::current_platform();
        remote.set_target("channels/0/stable", format!("{release}\n"));
        remote.set_target(
            &format!("releases/{release}/{os}-{arch}/bin/trdl"),
            content,
        );
    }

    async fn new_client(home: &Path, remote: &Arc<MemoryRemote>, exe: &Path) -> Client {
        let settings = SelfUpdateSettings {
            root_sha512: remote.root_sha512(1).unwrap(),
            ..SelfUpdateSettings::default()
        };
        Client::with_tuf_connector(home, memory_connector(remote.clone()))
            .await
            .unwrap()
            .with_self_update_settings(settings)
            .with_executable(exe)
    }

    fn fake_executable(dir: &Path) -> std::path::PathBuf {
        let exe = dir.join("bin").join("trdl");
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, "old agent").unwrap();
        exe
    }

    #[tokio::test]
    async fn test_self_update_replaces_executable() {
        let tmp = TempDir::new().unwrap();
        let remote = remote();
        native_release(&remote, "v99.0.0", "new agent");
        let exe = fake_executable(tmp.path());
        let mut client = new_client(&tmp.path().join("home"), &remote, &exe).await;

        client.self_update(true).await.unwrap();

        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "new agent");
        assert!(client.repositories().iter().any(|r| r.name == "trdl"));
        assert!(tmp.path().join("home/.metafiles/self-update").is_file());
    }

    #[tokio::test]
    async fn test_self_update_same_version_is_noop() {
        let tmp = TempDir::new().unwrap();
        let remote = remote();
        native_release(&remote, &format!("v{}", trdl_core::VERSION), "same agent");
        let exe = fake_executable(tmp.path());
        let mut client = new_client(&tmp.path().join("home"), &remote, &exe).await;

        client.self_update(false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "old agent");
    }

    #[tokio::test]
    async fn test_self_update_is_rate_limited() {
        let tmp = TempDir::new().unwrap();
        let remote = remote();
        native_release(&remote, "v99.0.0", "new agent");
        let exe = fake_executable(tmp.path());
        let home = tmp.path().join("home");

        let mut handles = Vec::new();
        for _ in 0..4 {
            let mut client = new_client(&home, &remote, &exe).await;
            handles.push(tokio::spawn(async move { client.self_update(false).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // One attempt within the delay; the rest skip or find the lock taken
        assert_eq!(remote.metadata_updates(), 1);
        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "new agent");
    }

    #[tokio::test]
    async fn test_self_update_failure_still_marks_attempt() {
        let tmp = TempDir::new().unwrap();
        let remote = remote();
        let exe = fake_executable(tmp.path());
        let mut client = new_client(&tmp.path().join("home"), &remote, &exe).await;

        let err = client.self_update(false).await.unwrap_err();
        assert!(matches!(err, TrdlError::ChannelNotInRepo { .. }));
        assert!(tmp.path().join("home/.metafiles/self-update").is_file());

        // Second attempt inside the delay is skipped
        client.self_update(false).await.unwrap();
        assert_eq!(remote.metadata_updates(), 1);
    }

    #[tokio::test]
    async fn test_self_update_requires_root_checksum() {
        let tmp = TempDir::new().unwrap();
        let remote = remote();
        let exe = fake_executable(tmp.path());
        let mut client = Client::with_tuf_connector(tmp.path(), memory_connector(remote.clone()))
            .await
            .unwrap()
            .with_self_update_settings(SelfUpdateSettings {
                root_sha512: String::new(),
                ..SelfUpdateSettings::default()
            })
            .with_executable(&exe);

        let err = client.self_update(false).await.unwrap_err();
        assert!(matches!(err, TrdlError::InvalidArgument(_)));
    }
}
