//! `trdl use` command - Print the path of a channel activation script.
//!
//! The script is meant to be sourced: `. $(trdl use werf 1.2 stable)`.

use std::path::Path;

use clap::builder::FalseyValueParser;
use clap::Args;

use trdl_runtime::{Shell, UseOptions};

use super::{open_client, ChannelArgs};

#[derive(Args, Debug)]
pub struct UseArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,

    /// Shell the script is generated for: unix or pwsh
    #[arg(long, env = "TRDL_SHELL")]
    pub shell: Option<String>,

    /// Do not perform self-update from the generated script
    #[arg(long, env = "TRDL_NO_SELF_UPDATE", value_parser = FalseyValueParser::new())]
    pub no_self_update: bool,
}

pub async fn execute(args: UseArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let channel = args.channel.validate()?;
    let shell = match args.shell.as_deref() {
        Some(shell) => shell.parse::<Shell>()?,
        None => Shell::platform_default(),
    };
    let opts = UseOptions {
        no_self_update: args.no_self_update,
    };

    let client = open_client(home).await?;
    let script = client
        .use_repo_channel_release_bin_dir(
            &args.channel.repo,
            &args.channel.group,
            channel,
            shell,
            opts,
        )
        .await?;
    println!("{}", script.display());
    Ok(())
}
