//! Repository engine.
//!
//! One [`RepoClient`] manages the on-disk state of a single registered
//! repository:
//!
//! ```text
//! <dir>/.meta/                             TUF metadata
//! <dir>/channels/<group>/<channel>         channel pointer (release name)
//! <dir>/releases/<release>/<platform>/...  materialized release
//! <dir>/scripts/<group>-<channel>/...      activation scripts
//! ```
//!
//! Writers of a channel hold the exclusive `<group>-<channel>` lock; readers
//! hold it shared.

mod activate;
mod clean;
mod update;

use std::convert::Infallible;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use trdl_core::error::{Result, TrdlError};
use trdl_core::fs::{is_dir, is_regular_file, list_dir};
use trdl_core::{AcquireOptions, Channel, FileLocker, Metafile, DEFAULT_LOCK_TIMEOUT};

use crate::tuf::TufClient;

pub use update::{current_platform, select_release_targets};

/// How long a consulted release is protected from garbage collection.
pub const RELEASE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Wait limit for the exclusive channel lock taken by updates.
const UPDATE_CHANNEL_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Lock serializing access to the TUF metadata store.
const TUF_LOCK_NAME: &str = "tuf-client";
const TUF_LOCK_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Directories a repository engine works in.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    /// Repository state: metadata, channels, releases, scripts.
    pub dir: PathBuf,
    pub locks_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub metafile_dir: PathBuf,
}

/// Engine for a single repository.
pub struct RepoClient {
    name: String,
    layout: RepoLayout,
    locker: FileLocker,
    tuf: Box<dyn TufClient>,
}

impl RepoClient {
    pub fn new(name: &str, layout: RepoLayout, tuf: Box<dyn TufClient>) -> Result<Self> {
        let locker = FileLocker::new(&layout.locks_dir)?;
        Ok(Self {
            name: name.to_string(),
            layout,
            locker,
            tuf,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.layout.dir
    }

    /// Directory holding the TUF metadata of this repository.
    pub fn meta_dir(&self) -> PathBuf {
        self.layout.dir.join(".meta")
    }

    fn channels_dir(&self) -> PathBuf {
        self.layout.dir.join("channels")
    }

    fn channel_path(&self, group: &str, channel: Channel) -> PathBuf {
        self.channels_dir().join(group).join(channel.as_str())
    }

    fn releases_dir(&self) -> PathBuf {
        self.layout.dir.join("releases")
    }

    fn release_metafile(&self, release: &str) -> Metafile {
        Metafile::new(self.layout.metafile_dir.join("releases").join(release))
    }

    fn channel_lock_name(group: &str, channel: Channel) -> String {
        format!("{group}-{channel}")
    }

    /// Release the channel pointer names.
    pub fn get_channel_release(&self, group: &str, channel: Channel) -> Result<String> {
        validate_path_component("group", group)?;
        let path = self.channel_path(group, channel);
        if !is_regular_file(&path)? {
            return Err(TrdlError::ChannelNotFoundLocally {
                repo: self.name.clone(),
                group: group.to_string(),
                channel: channel.to_string(),
            });
        }
        read_release(&path)
    }

    /// Locate the materialized platform directory of the channel release
    /// and mark the release as used.
    async fn find_release_dir(&self, group: &str, channel: Channel) -> Result<(PathBuf, String)> {
        let release = self.get_channel_release(group, channel)?;
        let mut entries = list_dir(&self.releases_dir().join(&release))?;

        let dir = match entries.len() {
            0 => {
                return Err(TrdlError::ReleaseNotFoundLocally {
                    repo: self.name.clone(),
                    group: group.to_string(),
                    channel: channel.to_string(),
                    release,
                })
            }
            1 => entries.remove(0),
            _ => {
                return Err(TrdlError::Malformed(format!(
                    "several platform directories found in release {:?}: {}",
                    release,
                    entries
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            }
        };

        self.release_metafile(&release).reset(&self.locker).await?;
        Ok((dir, release))
    }

    async fn find_bin_dir(&self, group: &str, channel: Channel) -> Result<(PathBuf, String)> {
        let (release_dir, release) = self.find_release_dir(group, channel).await?;
        let bin_dir = release_dir.join("bin");
        if !is_dir(&bin_dir)? {
            return Err(TrdlError::Malformed(format!(
                "bin directory not found in release {:?} ({})",
                release,
                bin_dir.display()
            )));
        }
        Ok((bin_dir, release))
    }

    async fn find_bin_path(
        &self,
        group: &str,
        channel: Channel,
        name: Option<&str>,
    ) -> Result<PathBuf> {
        let (bin_dir, release) = self.find_bin_dir(group, channel).await?;
        let not_found = || TrdlError::BinaryNotFound {
            repo: self.name.clone(),
            group: group.to_string(),
            channel: channel.to_string(),
            release: release.clone(),
            name: name.map(str::to_string),
        };

        if let Some(name) = name {
            validate_path_component("binary name", name)?;
            let path = bin_dir.join(name);
            return match std::fs::symlink_metadata(&path) {
                Ok(_) => Ok(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
                Err(e) => Err(e.into()),
            };
        }

        let mut entries = list_dir(&bin_dir)?;
        match entries.len() {
            0 => Err(not_found()),
            1 => Ok(entries.remove(0)),
            _ => Err(TrdlError::SeveralBinaries {
                release,
                names: entries
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            }),
        }
    }

    async fn read_lock(&self, group: &str, channel: Channel) -> Result<trdl_core::LockGuard> {
        self.locker
            .acquire(
                &Self::channel_lock_name(group, channel),
                AcquireOptions::shared(DEFAULT_LOCK_TIMEOUT),
            )
            .await
    }

    /// Platform directory of the channel release.
    pub async fn channel_release_dir(&self, group: &str, channel: Channel) -> Result<PathBuf> {
        let _guard = self.read_lock(group, channel).await?;
        let (dir, _) = self.find_release_dir(group, channel).await?;
        Ok(dir)
    }

    /// `bin` directory of the channel release.
    pub async fn channel_release_bin_dir(&self, group: &str, channel: Channel) -> Result<PathBuf> {
        let _guard = self.read_lock(group, channel).await?;
        let (dir, _) = self.find_bin_dir(group, channel).await?;
        Ok(dir)
    }

    /// Path of a single executable of the channel release. Without `name`
    /// the release must ship exactly one.
    pub async fn channel_release_bin_path(
        &self,
        group: &str,
        channel: Channel,
        name: Option<&str>,
    ) -> Result<PathBuf> {
        let _guard = self.read_lock(group, channel).await?;
        self.find_bin_path(group, channel, name).await
    }

    /// Replace the current process with an executable of the channel
    /// release. The channel lock is released before the exec.
    pub async fn exec_channel_release_bin(
        &self,
        group: &str,
        channel: Channel,
        name: Option<&str>,
        args: &[OsString],
    ) -> Result<Infallible> {
        let path = self.channel_release_bin_path(group, channel, name).await?;
        trdl_core::exec::exec(&path, args)
    }
}

/// Read and trim a channel pointer.
fn read_release(path: &Path) -> Result<String> {
    let data = std::fs::read_to_string(path)?;
    let release = data.trim().to_string();
    validate_path_component("release", &release)
        .map_err(|_| TrdlError::Malformed(format!("invalid release {:?} in {}", release, path.display())))?;
    Ok(release)
}

/// Reject values that would escape their directory when joined to a path.
pub(crate) fn validate_path_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0')
    {
        return Err(TrdlError::InvalidArgument(format!("invalid {what} {value:?}")));
    }
    Ok(())
}
