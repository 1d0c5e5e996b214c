use thiserror::Error;

/// trdl error types
#[derive(Error, Debug)]
pub enum TrdlError {
    /// Bad command-line argument, channel name or reserved name usage
    #[error("{0}")]
    InvalidArgument(String),

    /// Operation on a repository that is not registered
    #[error("repository {repo:?} not initialized: configure it with \"trdl add\" command")]
    RepoNotInitialized { repo: String },

    /// Configuration has no record with the given name
    #[error("repository {0:?} not found")]
    RepoNotFound(String),

    /// Signed targets do not contain the requested channel
    #[error("channel {channel:?} not found in the repository (group: {group:?})")]
    ChannelNotInRepo { group: String, channel: String },

    /// Channel pointer has not been fetched yet
    #[error(
        "channel {channel:?} not found locally (group: {group:?}), update channel with \"trdl update {repo} {group} {channel}\" command"
    )]
    ChannelNotFoundLocally {
        repo: String,
        group: String,
        channel: String,
    },

    /// Channel points at a release that is not materialized
    #[error(
        "release {release:?} not found locally, update channel with \"trdl update {repo} {group} {channel}\" command"
    )]
    ReleaseNotFoundLocally {
        repo: String,
        group: String,
        channel: String,
        release: String,
    },

    /// Release has no artifacts for the current platform
    #[error("no artifacts found in release {release:?} for platform {os}-{arch}")]
    NoMatchingPlatform {
        release: String,
        os: String,
        arch: String,
    },

    /// No executable matched in the release bin directory
    #[error(
        "{} not found in release {release:?}, update channel with \"trdl update {repo} {group} {channel}\" command",
        .name.as_deref().map(|n| format!("binary file {n:?}")).unwrap_or_else(|| "binary file".to_string())
    )]
    BinaryNotFound {
        repo: String,
        group: String,
        channel: String,
        release: String,
        name: Option<String>,
    },

    /// More than one executable matched and the caller did not pick one
    #[error(
        "several binary files found in release {release:?}, it is necessary to specify the certain name:\n{}",
        .names.iter().map(|n| format!(" - {n}")).collect::<Vec<_>>().join("\n")
    )]
    SeveralBinaries { release: String, names: Vec<String> },

    /// On-disk state violates the repository layout
    #[error("malformed repository state: {0}")]
    Malformed(String),

    /// Downloaded root metadata does not match the pinned digest
    #[error("expected root sha512 {expected}, got {actual}")]
    RootHashMismatch { expected: String, actual: String },

    /// Signature verification failure reported by TUF
    #[error("signature error: {0}")]
    Signature(String),

    /// Transport failure while talking to the upstream repository
    #[error("network error: {0}")]
    Network(String),

    /// TUF metadata could not be refreshed or parsed
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Lock was not acquired within its timeout
    #[error("lock {name:?} acquisition timed out")]
    LockTimeout { name: String },

    /// Non-blocking lock attempt found the lock held elsewhere
    #[error("lock {name:?} is held by another process")]
    WouldBlock { name: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant broken
    #[error("internal error: {0}")]
    Internal(String),
}

impl TrdlError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrdlError::Network(_) | TrdlError::Metadata(_))
    }

    /// Soft errors are resolved by running `trdl update`.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            TrdlError::ChannelNotFoundLocally { .. }
                | TrdlError::ReleaseNotFoundLocally { .. }
                | TrdlError::BinaryNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for TrdlError {
    fn from(err: serde_json::Error) -> Self {
        TrdlError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TrdlError {
    fn from(err: serde_yaml::Error) -> Self {
        TrdlError::Serialization(err.to_string())
    }
}

/// Result type alias for trdl operations
pub type Result<T> = std::result::Result<T, TrdlError>;
