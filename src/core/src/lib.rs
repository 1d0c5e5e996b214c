//! trdl Core - Foundational Types and Primitives
//!
//! This crate provides the error type, channels, agent configuration and the
//! filesystem primitives (locks, metafiles, atomic writes) shared by the
//! trdl runtime and CLI.

pub mod channel;
pub mod config;
pub mod error;
pub mod exec;
pub mod fs;
pub mod lock;
pub mod metafile;

// Re-export commonly used types
pub use channel::Channel;
pub use config::{AgentConfiguration, RepoConfig, CONFIG_FILE_NAME};
pub use error::{Result, TrdlError};
pub use lock::{AcquireOptions, FileLocker, LockGuard, DEFAULT_LOCK_TIMEOUT};
pub use metafile::Metafile;

/// trdl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the repository the agent updates itself from. Users cannot
/// register a repository under this name.
pub const SELF_UPDATE_REPO: &str = "trdl";

/// Group the agent follows for self-updates.
pub const SELF_UPDATE_GROUP: &str = "0";

/// Upstream of the self-update repository.
pub const SELF_UPDATE_URL: &str = "https://tuf.trdl.dev";

/// Pinned root version of the self-update repository.
pub const SELF_UPDATE_ROOT_VERSION: u64 = 1;

/// Pinned root SHA-512 of the self-update repository, set at build time
/// through `TRDL_SELF_UPDATE_ROOT_SHA512`.
pub const SELF_UPDATE_ROOT_SHA512: &str = match option_env!("TRDL_SELF_UPDATE_ROOT_SHA512") {
    Some(sha) => sha,
    None => "",
};

/// Reject names that clash with the self-update repository.
pub fn validate_repo_name(name: &str) -> Result<()> {
    if name == SELF_UPDATE_REPO {
        return Err(TrdlError::InvalidArgument(format!(
            "reserved repository name {SELF_UPDATE_REPO:?} cannot be used"
        )));
    }
    Ok(())
}

/// Whether a release name denotes the running agent version. A single
/// leading `v` is ignored on both sides.
pub fn is_current_version(release: &str) -> bool {
    release.strip_prefix('v').unwrap_or(release) == VERSION.strip_prefix('v').unwrap_or(VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_repo_name() {
        let err = validate_repo_name("trdl").unwrap_err();
        assert_eq!(
            err.to_string(),
            "reserved repository name \"trdl\" cannot be used"
        );
        assert!(validate_repo_name("werf").is_ok());
    }

    #[test]
    fn test_is_current_version() {
        assert!(is_current_version(VERSION));
        assert!(is_current_version(&format!("v{VERSION}")));
        assert!(!is_current_version("v0.0.0-none"));
    }
}
