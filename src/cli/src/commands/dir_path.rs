//! `trdl dir-path` command - Print the channel release directory.

use std::path::Path;

use clap::Args;

use super::{open_client, ChannelArgs};

#[derive(Args, Debug)]
pub struct DirPathArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,
}

pub async fn execute(args: DirPathArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let channel = args.channel.validate()?;
    let client = open_client(home).await?;
    let dir = client
        .repo_channel_release_dir(&args.channel.repo, &args.channel.group, channel)
        .await?;
    println!("{}", dir.display());
    Ok(())
}
