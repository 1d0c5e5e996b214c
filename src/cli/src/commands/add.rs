//! `trdl add` command - Register a software repository.

use std::path::Path;

use clap::Args;

use trdl_core::{validate_repo_name, TrdlError};

use super::open_client;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Repository name
    pub repo: String,

    /// Repository URL
    pub url: String,

    /// Version of the trusted root metadata
    #[arg(requires = "root_sha512")]
    pub root_version: Option<String>,

    /// SHA-512 checksum of the trusted root metadata
    pub root_sha512: Option<String>,
}

impl AddArgs {
    /// Root version and checksum; both absent pins the latest root with no
    /// checksum.
    fn root(&self) -> Result<(u64, String), TrdlError> {
        let (Some(version), Some(sha)) = (&self.root_version, &self.root_sha512) else {
            return Ok((0, String::new()));
        };

        let version = version.parse::<u64>().map_err(|_| {
            TrdlError::InvalidArgument(format!("ROOT_VERSION must be numeric: {version:?}"))
        })?;
        if sha.is_empty() {
            return Err(TrdlError::InvalidArgument(
                "ROOT_SHA512 must not be empty".to_string(),
            ));
        }
        Ok((version, sha.clone()))
    }
}

pub async fn execute(args: AddArgs, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    validate_repo_name(&args.repo)?;
    let (root_version, root_sha512) = args.root()?;

    let mut client = open_client(home).await?;
    client
        .add_repo(&args.repo, &args.url, root_version, &root_sha512)
        .await?;
    Ok(())
}
