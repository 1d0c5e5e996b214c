//! Top-level client.
//!
//! Owns the home directory and the agent configuration, and builds a
//! [`RepoClient`] for every repository operation.
//!
//! ```text
//! <home>/config.yaml
//! <home>/.locks/                       client locks
//! <home>/.locks/repositories/<repo>/   repository locks
//! <home>/.tmp/repositories/<repo>/     staging for atomic renames
//! <home>/.metafiles/                   timestamp markers
//! <home>/logs/repositories/<repo>/     background update logs
//! <home>/repositories/<repo>/          repository state
//! ```

use std::convert::Infallible;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trdl_core::error::{Result, TrdlError};
use trdl_core::fs::{create_dir_all, remove_dir_all_if_exists};
use trdl_core::{
    AcquireOptions, AgentConfiguration, Channel, FileLocker, LockGuard, RepoConfig,
    CONFIG_FILE_NAME, DEFAULT_LOCK_TIMEOUT,
};

use crate::repo::{validate_path_component, RepoClient, RepoLayout};
use crate::script::{Shell, UseOptions};
use crate::tuf::{TufClient, TufRepository};

/// Builds the TUF client for a repository URL and metadata directory.
pub type TufConnector = Arc<dyn Fn(&str, &Path) -> Result<Box<dyn TufClient>> + Send + Sync>;

/// Connector for repositories served over HTTP(S).
pub fn http_tuf_connector() -> TufConnector {
    Arc::new(|url: &str, meta_dir: &Path| {
        let client = TufRepository::new(url, meta_dir)?;
        Ok(Box::new(client) as Box<dyn TufClient>)
    })
}

/// Where the agent updates itself from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfUpdateSettings {
    pub repo: String,
    pub group: String,
    pub url: String,
    pub root_version: u64,
    pub root_sha512: String,
}

impl Default for SelfUpdateSettings {
    fn default() -> Self {
        Self {
            repo: trdl_core::SELF_UPDATE_REPO.to_string(),
            group: trdl_core::SELF_UPDATE_GROUP.to_string(),
            url: trdl_core::SELF_UPDATE_URL.to_string(),
            root_version: trdl_core::SELF_UPDATE_ROOT_VERSION,
            root_sha512: trdl_core::SELF_UPDATE_ROOT_SHA512.to_string(),
        }
    }
}

/// Agent client bound to a home directory.
pub struct Client {
    home: PathBuf,
    locker: FileLocker,
    config: AgentConfiguration,
    tuf_connector: TufConnector,
    pub(crate) self_update: SelfUpdateSettings,
    executable: Option<PathBuf>,
}

impl Client {
    /// Open the home directory, creating it if needed.
    pub async fn new(home: &Path) -> Result<Self> {
        Self::with_tuf_connector(home, http_tuf_connector()).await
    }

    pub async fn with_tuf_connector(home: &Path, tuf_connector: TufConnector) -> Result<Self> {
        create_dir_all(home).map_err(|e| {
            TrdlError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to create home dir {}: {}", home.display(), e),
            ))
        })?;
        let locker = FileLocker::new(home.join(".locks"))?;

        let mut client = Self {
            home: home.to_path_buf(),
            locker,
            config: AgentConfiguration::default(),
            tuf_connector,
            self_update: SelfUpdateSettings::default(),
            executable: None,
        };
        client.load_config().await?;
        Ok(client)
    }

    /// Override where self-update fetches the agent from.
    pub fn with_self_update_settings(mut self, settings: SelfUpdateSettings) -> Self {
        self.self_update = settings;
        self
    }

    /// Override the agent executable used by activation scripts and
    /// replaced by self-update. Defaults to the running executable.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub(crate) fn locker(&self) -> &FileLocker {
        &self.locker
    }

    pub(crate) fn executable(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => trdl_updater::current_executable()
                .map_err(|e| TrdlError::Internal(format!("{e:#}"))),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    async fn lock_config(&self, shared: bool) -> Result<LockGuard> {
        let opts = if shared {
            AcquireOptions::shared(DEFAULT_LOCK_TIMEOUT)
        } else {
            AcquireOptions::exclusive(DEFAULT_LOCK_TIMEOUT)
        };
        self.locker
            .acquire(&self.config_path().display().to_string(), opts)
            .await
    }

    async fn load_config(&mut self) -> Result<()> {
        let _guard = self.lock_config(true).await?;
        self.config.reload(&self.config_path())
    }

    /// Registered repositories in configuration order.
    pub fn repositories(&self) -> &[RepoConfig] {
        self.config.list()
    }

    fn repo_layout(&self, name: &str) -> RepoLayout {
        RepoLayout {
            dir: self.home.join("repositories").join(name),
            locks_dir: self.home.join(".locks").join("repositories").join(name),
            tmp_dir: self.home.join(".tmp").join("repositories").join(name),
            logs_dir: self.home.join("logs").join("repositories").join(name),
            metafile_dir: self.home.join(".metafiles").join("repositories").join(name),
        }
    }

    fn connect(&self, name: &str, url: &str) -> Result<RepoClient> {
        validate_path_component("repository name", name)?;
        let layout = self.repo_layout(name);
        let tuf = (self.tuf_connector)(url, &layout.dir.join(".meta"))?;
        RepoClient::new(name, layout, tuf)
    }

    /// Engine for a registered repository.
    pub fn repo_client(&self, name: &str) -> Result<RepoClient> {
        let repo = self
            .config
            .get(name)
            .ok_or_else(|| TrdlError::RepoNotInitialized {
                repo: name.to_string(),
            })?;
        self.connect(name, &repo.url)
    }

    fn resolve_channel(&self, name: &str, channel: Option<Channel>) -> Result<Channel> {
        if let Some(channel) = channel {
            return Ok(channel);
        }
        self.config
            .get(name)
            .map(RepoConfig::channel)
            .ok_or_else(|| TrdlError::RepoNotInitialized {
                repo: name.to_string(),
            })
    }

    /// Register a repository and pin its trust root. The configuration is
    /// saved only after trust has been established.
    pub async fn add_repo(
        &mut self,
        name: &str,
        url: &str,
        root_version: u64,
        root_sha512: &str,
    ) -> Result<()> {
        let _guard = self.lock_config(false).await?;
        let path = self.config_path();
        self.config.reload(&path)?;
        self.config.stage(name, url);

        let mut repo = self.connect(name, url)?;
        if let Err(e) = repo.setup(root_version, root_sha512).await {
            self.config.reload(&path)?;
            return Err(e);
        }

        self.config.save(&path)?;
        tracing::info!(repo = %name, url = %url, "Repository added");
        Ok(())
    }

    /// Forget a repository and delete all of its local state.
    pub async fn remove_repo(&mut self, name: &str) -> Result<()> {
        validate_path_component("repository name", name)?;
        let _guard = self.lock_config(false).await?;
        let path = self.config_path();
        self.config.reload(&path)?;
        self.config.remove(name).map_err(|_| TrdlError::RepoNotInitialized {
            repo: name.to_string(),
        })?;

        let layout = self.repo_layout(name);
        for dir in [
            &layout.dir,
            &layout.logs_dir,
            &layout.tmp_dir,
            &layout.metafile_dir,
            &layout.locks_dir,
        ] {
            remove_dir_all_if_exists(dir)?;
        }

        self.config.save(&path)?;
        tracing::info!(repo = %name, "Repository removed");
        Ok(())
    }

    pub async fn set_repo_default_channel(&mut self, name: &str, channel: Channel) -> Result<()> {
        let _guard = self.lock_config(false).await?;
        let path = self.config_path();
        self.config.reload(&path)?;
        self.config
            .stage_default_channel(name, channel)
            .map_err(|_| TrdlError::RepoNotInitialized {
                repo: name.to_string(),
            })?;
        self.config.save(&path)
    }

    /// Update a channel; `None` selects the repository's default channel.
    pub async fn update_repo_channel(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
        autoclean: bool,
    ) -> Result<()> {
        let channel = self.resolve_channel(name, channel)?;
        let mut repo = self.repo_client(name)?;
        repo.update_channel(group, channel).await?;
        if autoclean {
            repo.clean_releases().await?;
        }
        Ok(())
    }

    /// Write the activation script for a channel and return its path.
    pub async fn use_repo_channel_release_bin_dir(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
        shell: Shell,
        opts: UseOptions,
    ) -> Result<PathBuf> {
        let channel = self.resolve_channel(name, channel)?;
        let repo = self.repo_client(name)?;
        let agent = self.executable()?;
        repo.use_channel_release_bin_dir(group, channel, shell, opts, &agent)
    }

    pub async fn repo_channel_release_dir(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
    ) -> Result<PathBuf> {
        let channel = self.resolve_channel(name, channel)?;
        self.repo_client(name)?
            .channel_release_dir(group, channel)
            .await
    }

    pub async fn repo_channel_release_bin_dir(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
    ) -> Result<PathBuf> {
        let channel = self.resolve_channel(name, channel)?;
        self.repo_client(name)?
            .channel_release_bin_dir(group, channel)
            .await
    }

    pub async fn repo_channel_release_bin_path(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
        bin_name: Option<&str>,
    ) -> Result<PathBuf> {
        let channel = self.resolve_channel(name, channel)?;
        self.repo_client(name)?
            .channel_release_bin_path(group, channel, bin_name)
            .await
    }

    /// Replace the current process with a channel release executable.
    pub async fn exec_repo_channel_release_bin(
        &self,
        name: &str,
        group: &str,
        channel: Option<Channel>,
        bin_name: Option<&str>,
        args: &[OsString],
    ) -> Result<Infallible> {
        let channel = self.resolve_channel(name, channel)?;
        self.repo_client(name)?
            .exec_channel_release_bin(group, channel, bin_name, args)
            .await
    }
}
