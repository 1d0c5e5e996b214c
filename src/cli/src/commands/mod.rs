//! CLI command definitions and dispatch.

mod add;
mod bin_path;
mod dir_path;
mod exec;
mod list;
mod remove;
mod set_default_channel;
mod update;
mod use_channel;
mod version;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use trdl_core::{validate_repo_name, Channel, TrdlError};
use trdl_runtime::Client;

/// trdl - secure software delivery agent.
#[derive(Parser)]
#[command(name = "trdl", version, about)]
pub struct Cli {
    /// trdl home directory
    #[arg(long, global = true, env = "TRDL_HOME_DIR", default_value = "~/.trdl")]
    pub home_dir: String,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "TRDL_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Add a software repository
    Add(add::AddArgs),
    /// Remove a software repository
    Remove(remove::RemoveArgs),
    /// List registered software repositories
    List(list::ListArgs),
    /// Set the default channel of a software repository
    SetDefaultChannel(set_default_channel::SetDefaultChannelArgs),
    /// Update the software
    Update(update::UpdateArgs),
    /// Generate a script to use the software binaries within a shell session
    Use(use_channel::UseArgs),
    /// Execute a software binary
    Exec(exec::ExecArgs),
    /// Print the software directory
    DirPath(dir_path::DirPathArgs),
    /// Print the software bin directory
    BinPath(bin_path::BinPathArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// `REPO GROUP [CHANNEL]` positional arguments shared by most commands.
#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Repository name
    pub repo: String,

    /// Release group, e.g. `1.2`
    pub group: String,

    /// Release channel: alpha, beta, ea, stable or rock-solid
    pub channel: Option<String>,
}

impl ChannelArgs {
    /// Reject the reserved repository and parse the channel, if given.
    pub fn validate(&self) -> Result<Option<Channel>, TrdlError> {
        validate_repo_name(&self.repo)?;
        parse_channel(self.channel.as_deref())
    }
}

/// Parse an optional channel argument.
pub fn parse_channel(channel: Option<&str>) -> Result<Option<Channel>, TrdlError> {
    channel
        .map(|c| {
            c.parse::<Channel>().map_err(|e| {
                TrdlError::InvalidArgument(format!("unable to parse argument \"CHANNEL\": {e}"))
            })
        })
        .transpose()
}

/// Open the client for a home directory.
pub(crate) async fn open_client(home: &Path) -> Result<Client, Box<dyn std::error::Error>> {
    let client = Client::new(home)
        .await
        .map_err(|e| format!("unable to initialize trdl client: {e}"))?;
    Ok(client)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let home: PathBuf = trdl_core::fs::expand_path(&cli.home_dir)?;

    match cli.command {
        Command::Add(args) => add::execute(args, &home).await,
        Command::Remove(args) => remove::execute(args, &home).await,
        Command::List(args) => list::execute(args, &home).await,
        Command::SetDefaultChannel(args) => set_default_channel::execute(args, &home).await,
        Command::Update(args) => update::execute(args, &home).await,
        Command::Use(args) => use_channel::execute(args, &home).await,
        Command::Exec(args) => exec::execute(args, &home).await,
        Command::DirPath(args) => dir_path::execute(args, &home).await,
        Command::BinPath(args) => bin_path::execute(args, &home).await,
        Command::Version(args) => version::execute(args).await,
    }
}
