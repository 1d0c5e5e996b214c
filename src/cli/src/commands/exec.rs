//! `trdl exec` command - Replace the agent with a channel release binary.

use std::ffi::OsString;
use std::path::Path;

use clap::Args;

use trdl_core::validate_repo_name;

use super::{open_client, parse_channel};

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Repository name
    pub repo: String,

    /// Release group, e.g. `1.2`
    pub group: String,

    /// Release channel: alpha, beta, ea, stable or rock-solid
    pub channel: Option<String>,

    /// Binary name, required when the release ships several
    pub bin_name: Option<String>,

    /// Arguments passed to the binary
    #[arg(last = true)]
    pub args: Vec<OsString>,
}

pub async fn execute(args: ExecArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    validate_repo_name(&args.repo)?;
    let channel = parse_channel(args.channel.as_deref())?;

    let client = open_client(home).await?;
    match client
        .exec_repo_channel_release_bin(
            &args.repo,
            &args.group,
            channel,
            args.bin_name.as_deref(),
            &args.args,
        )
        .await?
    {}
}
