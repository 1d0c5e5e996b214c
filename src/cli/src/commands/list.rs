//! `trdl list` command - List registered repositories.

use std::path::Path;

use clap::Args;

use trdl_core::RepoConfig;

use super::open_client;
use crate::output;

#[derive(Args, Debug)]
pub struct ListArgs;

pub async fn execute(_args: ListArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let client = open_client(home).await?;
    println!("{}", render(client.repositories()));
    Ok(())
}

/// Repositories as a table sorted by name.
fn render(repositories: &[RepoConfig]) -> comfy_table::Table {
    let mut repositories: Vec<_> = repositories.iter().collect();
    repositories.sort_by(|a, b| a.name.cmp(&b.name));

    let mut table = output::new_table(&["Name", "URL", "Default Channel"]);
    for repo in repositories {
        table.add_row([repo.name.as_str(), repo.url.as_str(), repo.channel().as_str()]);
    }
    table
}
