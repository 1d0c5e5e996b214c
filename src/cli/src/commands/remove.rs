//! `trdl remove` command - Remove a software repository.

use std::path::Path;

use clap::Args;

use trdl_core::validate_repo_name;

use super::open_client;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Repository name
    pub repo: String,
}

pub async fn execute(args: RemoveArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    validate_repo_name(&args.repo)?;
    let mut client = open_client(home).await?;
    client.remove_repo(&args.repo).await?;
    Ok(())
}
