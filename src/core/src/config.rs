//! Agent configuration.
//!
//! The registered repositories persisted as a YAML document:
//!
//! ```yaml
//! repositories:
//!   - name: werf
//!     url: https://tuf.werf.io
//!     defaultChannel: ea
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::{Result, TrdlError};
use crate::fs::atomic_write;

/// Configuration file name inside the home directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<Channel>,
}

impl RepoConfig {
    /// The default channel, falling back to `stable`.
    pub fn channel(&self) -> Channel {
        self.default_channel.unwrap_or_default()
    }
}

/// Ordered set of registered repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(default)]
    repositories: Vec<RepoConfig>,
}

impl AgentConfiguration {
    /// Load from `path`. A missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(TrdlError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to read configuration {}: {}", path.display(), e),
                )))
            }
        };

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&data).map_err(|e| {
            TrdlError::Serialization(format!(
                "failed to parse configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(config)
    }

    /// Replace the in-memory state with the file content.
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Persist atomically to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        atomic_write(path, data.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RepoConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn list(&self) -> &[RepoConfig] {
        &self.repositories
    }

    /// Insert a repository or update the URL of an existing one.
    pub fn stage(&mut self, name: &str, url: &str) {
        match self.repositories.iter_mut().find(|r| r.name == name) {
            Some(repo) => repo.url = url.to_string(),
            None => self.repositories.push(RepoConfig {
                name: name.to_string(),
                url: url.to_string(),
                default_channel: None,
            }),
        }
    }

    pub fn stage_default_channel(&mut self, name: &str, channel: Channel) -> Result<()> {
        let repo = self
            .repositories
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| TrdlError::RepoNotFound(name.to_string()))?;
        repo.default_channel = Some(channel);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let index = self
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| TrdlError::RepoNotFound(name.to_string()))?;
        self.repositories.remove(index);
        Ok(())
    }
}
