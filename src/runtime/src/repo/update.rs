//! Trust setup and channel updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use trdl_core::error::{Result, TrdlError};
use trdl_core::fs::create_dir_all;
use trdl_core::{AcquireOptions, Channel};

use super::{
    read_release, validate_path_component, RepoClient, TUF_LOCK_NAME, TUF_LOCK_TIMEOUT,
    UPDATE_CHANNEL_LOCK_TIMEOUT,
};
use crate::tuf::{normalize_target_name, TargetMeta};

const BIN_FILE_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Operating system and architecture in release directory naming
/// (`linux`, `darwin`, `windows`; `amd64`, `arm64`, ...).
pub fn current_platform() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64",
        "loongarch64" => "loong64",
        other => other,
    };
    (os, arch)
}

/// Pick the targets of `release` for a platform. The most specific of
/// `<os>-<arch>`, `<os>-any`, `any-<arch>`, `any-any` that has any targets
/// wins; prefixes are never mixed.
pub fn select_release_targets<'a>(
    targets: &'a BTreeMap<String, TargetMeta>,
    release: &str,
    os: &str,
    arch: &str,
) -> Option<(String, Vec<(&'a str, &'a TargetMeta)>)> {
    let platforms = [
        format!("{os}-{arch}"),
        format!("{os}-any"),
        format!("any-{arch}"),
        "any-any".to_string(),
    ];

    platforms.into_iter().find_map(|platform| {
        let prefix = format!("releases/{release}/{platform}/");
        let matched: Vec<_> = targets
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, meta)| (name.as_str(), meta))
            .collect();
        (!matched.is_empty()).then_some((platform, matched))
    })
}

/// Files under a release's `bin/` directory are executables.
fn target_mode(target_name: &str) -> u32 {
    match target_name.split('/').nth(3) {
        Some("bin") => BIN_FILE_MODE,
        _ => FILE_MODE,
    }
}

impl RepoClient {
    /// Pin the trust root of the repository.
    pub async fn setup(&mut self, root_version: u64, root_sha512: &str) -> Result<()> {
        let _guard = self
            .locker
            .acquire(TUF_LOCK_NAME, AcquireOptions::exclusive(TUF_LOCK_TIMEOUT))
            .await?;
        self.tuf.setup(root_version, root_sha512).await?;
        tracing::info!(repo = %self.name, root_version, "Repository initialized");
        Ok(())
    }

    async fn update_metadata(&mut self) -> Result<()> {
        let _guard = self
            .locker
            .acquire(TUF_LOCK_NAME, AcquireOptions::exclusive(TUF_LOCK_TIMEOUT))
            .await?;
        self.tuf.update().await
    }

    /// Refresh metadata and materialize the release the channel points at.
    ///
    /// The pointer is switched only after every release file is in place, so
    /// readers never see a pointer to an incomplete release.
    pub async fn update_channel(&mut self, group: &str, channel: Channel) -> Result<()> {
        validate_path_component("group", group)?;
        let _guard = self
            .locker
            .acquire(
                &Self::channel_lock_name(group, channel),
                AcquireOptions::exclusive(UPDATE_CHANNEL_LOCK_TIMEOUT),
            )
            .await?;

        self.update_metadata().await?;
        let targets = self.tuf.targets()?;

        let channel_target = format!("channels/{group}/{channel}");
        let channel_meta =
            targets
                .get(&channel_target)
                .ok_or_else(|| TrdlError::ChannelNotInRepo {
                    group: group.to_string(),
                    channel: channel.to_string(),
                })?;

        let channel_path = self.channel_path(group, channel);
        let staged_pointer = if channel_meta.matches_file(&channel_path)? {
            None
        } else {
            let staged = self.layout.tmp_dir.join(target_path(&channel_target));
            self.sync_file(&channel_target, channel_meta, &staged, FILE_MODE)
                .await?;
            Some(staged)
        };

        let release = read_release(staged_pointer.as_deref().unwrap_or(&channel_path))?;
        self.release_metafile(&release).reset(&self.locker).await?;
        self.sync_release(&targets, &release).await?;

        if let Some(staged) = staged_pointer {
            if let Some(parent) = channel_path.parent() {
                create_dir_all(parent)?;
            }
            std::fs::rename(&staged, &channel_path)?;
            tracing::info!(
                repo = %self.name,
                group,
                channel = %channel,
                release = %release,
                "Channel updated"
            );
        } else {
            tracing::debug!(repo = %self.name, group, channel = %channel, "Channel is up to date");
        }
        Ok(())
    }

    async fn sync_release(&self, targets: &BTreeMap<String, TargetMeta>, release: &str) -> Result<()> {
        let (os, arch) = current_platform();
        let (platform, selected) = select_release_targets(targets, release, os, arch)
            .ok_or_else(|| TrdlError::NoMatchingPlatform {
                release: release.to_string(),
                os: os.to_string(),
                arch: arch.to_string(),
            })?;

        tracing::debug!(
            repo = %self.name,
            release,
            platform = %platform,
            files = selected.len(),
            "Syncing release"
        );
        for (name, meta) in selected {
            let dest = self.layout.dir.join(target_path(name));
            self.sync_file(name, meta, &dest, target_mode(name)).await?;
        }
        Ok(())
    }

    /// Download a target into `dest` unless the file already carries the
    /// signed digests.
    async fn sync_file(&self, target_name: &str, meta: &TargetMeta, dest: &Path, mode: u32) -> Result<()> {
        if meta.matches_file(dest)? {
            tracing::debug!(target = %target_name, "Target is up to date");
            return Ok(());
        }
        self.tuf.download_file(target_name, dest, mode).await
    }
}

/// Relative filesystem path of a target.
fn target_path(target_name: &str) -> PathBuf {
    normalize_target_name(target_name).split('/').collect()
}
