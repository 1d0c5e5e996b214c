//! `trdl update` command - Self-update, then refresh a channel.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Args};

use super::{open_client, ChannelArgs};

const IN_BACKGROUND_FLAG: &str = "--in-background";
const IN_BACKGROUND_ENV: &str = "TRDL_IN_BACKGROUND";

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,

    /// Do not perform self-update
    #[arg(long, env = "TRDL_NO_SELF_UPDATE", value_parser = FalseyValueParser::new())]
    pub no_self_update: bool,

    /// Erase old downloaded releases
    #[arg(
        long,
        env = "TRDL_AUTOCLEAN",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true",
        value_parser = FalseyValueParser::new()
    )]
    pub autoclean: bool,

    /// Perform update in background
    #[arg(long, env = "TRDL_IN_BACKGROUND", value_parser = FalseyValueParser::new())]
    pub in_background: bool,

    /// Redirect the stdout of the background update to a file
    #[arg(long, env = "TRDL_BACKGROUND_STDOUT_FILE")]
    pub background_stdout_file: Option<PathBuf>,

    /// Redirect the stderr of the background update to a file
    #[arg(long, env = "TRDL_BACKGROUND_STDERR_FILE")]
    pub background_stderr_file: Option<PathBuf>,
}

pub async fn execute(args: UpdateArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let channel = args.channel.validate()?;

    if args.in_background {
        return start_in_background(&args);
    }

    let mut client = open_client(home).await?;

    if !args.no_self_update {
        if let Err(e) = client.self_update(args.autoclean).await {
            tracing::warn!(error = %e, "Self-update failed");
            eprintln!("WARNING: Self-update failed: {e}");
        }
    }

    client
        .update_repo_channel(
            &args.channel.repo,
            &args.channel.group,
            channel,
            args.autoclean,
        )
        .await?;
    Ok(())
}

/// Re-run the same command line detached from the caller.
fn start_in_background(args: &UpdateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;
    let argv = background_args(std::env::args_os().skip(1));

    // The child must not inherit the request to detach again
    std::env::remove_var(IN_BACKGROUND_ENV);

    trdl_core::exec::spawn_detached(
        &exe,
        &argv,
        args.background_stdout_file.as_deref(),
        args.background_stderr_file.as_deref(),
    )
    .map_err(|e| format!("unable to start update in background: {e}"))?;
    Ok(())
}

/// Arguments for the background run: the original ones without the
/// in-background flag.
fn background_args(args: impl Iterator<Item = OsString>) -> Vec<OsString> {
    args.filter(|arg| !is_in_background_flag(arg)).collect()
}

fn is_in_background_flag(arg: &OsStr) -> bool {
    match arg.to_str() {
        Some(arg) => {
            arg == IN_BACKGROUND_FLAG
                || arg
                    .strip_prefix(IN_BACKGROUND_FLAG)
                    .is_some_and(|rest| rest.starts_with('='))
        }
        None => false,
    }
}
