//! The Update Framework client seam.
//!
//! The repository engine talks to upstream only through [`TufClient`]:
//! trust bootstrap, metadata refresh, target listing and verified download.
//! [`TufRepository`] is the HTTP implementation; [`MemoryTufClient`] serves
//! an in-process repository and records every transfer.

#[cfg(test)]
pub(crate) mod fixture;
mod memory;
mod remote;
mod schema;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use sha2::{Digest, Sha256, Sha512};

use trdl_core::error::Result;

pub use memory::{MemoryRemote, MemoryTufClient};
pub use remote::TufRepository;

/// Upper bound for the unverified root download.
pub const ROOT_DOWNLOAD_LIMIT: u64 = 512_000;

/// Signed description of a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMeta {
    pub length: u64,
    /// Algorithm name (`sha256`, `sha512`) to lowercase hex digest.
    pub hashes: BTreeMap<String, String>,
}

impl TargetMeta {
    /// Describe `data` with both supported digests.
    pub fn for_bytes(data: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(Sha256::digest(data)));
        hashes.insert("sha512".to_string(), hex::encode(Sha512::digest(data)));
        Self {
            length: data.len() as u64,
            hashes,
        }
    }

    /// Whether the file at `path` has the signed length and every declared
    /// digest. A missing file does not match; an unknown algorithm never
    /// matches.
    pub fn matches_file(&self, path: &Path) -> Result<bool> {
        let mut file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if file.metadata()?.len() != self.length || self.hashes.is_empty() {
            return Ok(false);
        }

        let mut sha256 = self.hashes.contains_key("sha256").then(Sha256::new);
        let mut sha512 = self.hashes.contains_key("sha512").then(Sha512::new);
        if self
            .hashes
            .keys()
            .any(|algo| algo != "sha256" && algo != "sha512")
        {
            return Ok(false);
        }

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            if let Some(h) = sha256.as_mut() {
                h.update(&buf[..n]);
            }
            if let Some(h) = sha512.as_mut() {
                h.update(&buf[..n]);
            }
        }

        let digest_matches = |algo: &str, actual: String| {
            self.hashes
                .get(algo)
                .is_some_and(|expected| expected.eq_ignore_ascii_case(&actual))
        };
        if let Some(h) = sha256 {
            if !digest_matches("sha256", hex::encode(h.finalize())) {
                return Ok(false);
            }
        }
        if let Some(h) = sha512 {
            if !digest_matches("sha512", hex::encode(h.finalize())) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Verified access to a TUF repository.
#[async_trait]
pub trait TufClient: Send + Sync {
    /// Pin the trust root: wipe local metadata, fetch the root of the given
    /// version without verification, check its SHA-512 and initialize trust
    /// from it. Version `0` fetches the current `root.json`.
    async fn setup(&mut self, root_version: u64, root_sha512: &str) -> Result<()>;

    /// Refresh metadata from upstream and persist it locally.
    async fn update(&mut self) -> Result<()>;

    /// Targets listed by the last verified metadata.
    fn targets(&self) -> Result<BTreeMap<String, TargetMeta>>;

    /// Stream the verified target into `dest`, created with `mode`. The
    /// destination is removed on any failure.
    async fn download_file(&self, target_name: &str, dest: &Path, mode: u32) -> Result<()>;
}

/// Canonical form of a target name: forward slashes, no leading slash, no
/// `.` or empty components, `..` resolved.
pub fn normalize_target_name(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Open `dest` for writing with `mode`, creating parents and truncating any
/// previous content.
pub(crate) fn create_target_file(dest: &Path, mode: u32) -> Result<std::fs::File> {
    if let Some(parent) = dest.parent() {
        trdl_core::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let file = options.open(dest)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(file)
}

/// Remove a partially written destination, ignoring a missing file.
pub(crate) fn discard_target_file(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %dest.display(), error = %e, "Failed to remove partial download");
        }
    }
}
