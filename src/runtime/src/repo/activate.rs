//! Activation scripts for a channel.

use std::path::{Path, PathBuf};

use trdl_core::error::Result;
use trdl_core::fs::{atomic_write, is_regular_file};
use trdl_core::Channel;

use super::{validate_path_component, RepoClient};
use crate::script::{ActivationScript, Shell, UseOptions};

impl RepoClient {
    fn scripts_dir(&self, group: &str, channel: Channel) -> PathBuf {
        self.layout
            .dir
            .join("scripts")
            .join(format!("{group}-{channel}"))
    }

    /// Write the activation script for the channel and return its path. An
    /// existing script with identical content is left untouched.
    pub fn use_channel_release_bin_dir(
        &self,
        group: &str,
        channel: Channel,
        shell: Shell,
        opts: UseOptions,
        agent: &Path,
    ) -> Result<PathBuf> {
        validate_path_component("group", group)?;
        let script = ActivationScript {
            agent,
            repo: &self.name,
            group,
            channel,
            shell,
            opts,
            logs_dir: &self.layout.logs_dir,
        };

        let data = script.render();
        let path = self.scripts_dir(group, channel).join(script.file_name());
        if is_regular_file(&path)? && std::fs::read(&path)? == data.as_bytes() {
            return Ok(path);
        }

        atomic_write(&path, data.as_bytes())?;
        tracing::debug!(repo = %self.name, path = %path.display(), "Activation script written");
        Ok(path)
    }
}
