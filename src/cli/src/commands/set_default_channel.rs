//! `trdl set-default-channel` command - Set a repository's default channel.

use std::path::Path;

use clap::Args;

use trdl_core::{validate_repo_name, TrdlError};

use super::{open_client, parse_channel};

#[derive(Args, Debug)]
pub struct SetDefaultChannelArgs {
    /// Repository name
    pub repo: String,

    /// Channel: alpha, beta, ea, stable or rock-solid
    pub channel: String,
}

pub async fn execute(
    args: SetDefaultChannelArgs,
    home: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    validate_repo_name(&args.repo)?;
    let channel = parse_channel(Some(&args.channel))?
        .ok_or_else(|| TrdlError::InvalidArgument("CHANNEL is required".to_string()))?;

    let mut client = open_client(home).await?;
    client.set_repo_default_channel(&args.repo, channel).await?;
    Ok(())
}
