//! In-process TUF repository.
//!
//! [`MemoryRemote`] plays the upstream: versioned root documents and target
//! payloads. [`MemoryTufClient`] follows the same contract as the HTTP
//! client (pinned root digest, metadata snapshot per refresh, length and
//! hash checks on download) and counts every refresh and transfer.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use trdl_core::error::{Result, TrdlError};
use trdl_core::fs::{atomic_write, remove_dir_all_if_exists, sha512_hex};

use super::{
    create_target_file, discard_target_file, normalize_target_name, TargetMeta, TufClient,
};

const TRUSTED_ROOT_FILE: &str = "root.json";

/// Upstream state shared by every client pointed at it.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    roots: Mutex<BTreeMap<u64, Vec<u8>>>,
    targets: Mutex<BTreeMap<String, Vec<u8>>>,
    metadata_updates: AtomicUsize,
    downloads: AtomicUsize,
    fail_downloads: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a root document under `version`.
    pub fn publish_root(&self, version: u64, data: impl Into<Vec<u8>>) {
        self.roots.lock().insert(version, data.into());
    }

    /// SHA-512 of the root published under `version`.
    pub fn root_sha512(&self, version: u64) -> Option<String> {
        self.roots.lock().get(&version).map(|data| sha512_hex(data))
    }

    pub fn set_target(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.targets
            .lock()
            .insert(normalize_target_name(name), data.into());
    }

    pub fn remove_target(&self, name: &str) {
        self.targets.lock().remove(&normalize_target_name(name));
    }

    /// Make every following download fail as a transport error.
    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Number of metadata refreshes served.
    pub fn metadata_updates(&self) -> usize {
        self.metadata_updates.load(Ordering::SeqCst)
    }

    /// Number of target transfers served.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn root(&self, version: u64) -> Option<Vec<u8>> {
        let roots = self.roots.lock();
        if version == 0 {
            roots.values().next_back().cloned()
        } else {
            roots.get(&version).cloned()
        }
    }

    fn snapshot(&self) -> BTreeMap<String, TargetMeta> {
        self.targets
            .lock()
            .iter()
            .map(|(name, data)| (name.clone(), TargetMeta::for_bytes(data)))
            .collect()
    }
}

/// TUF client bound to a [`MemoryRemote`].
pub struct MemoryTufClient {
    remote: Arc<MemoryRemote>,
    meta_dir: PathBuf,
    targets: Option<BTreeMap<String, TargetMeta>>,
}

impl MemoryTufClient {
    pub fn new(remote: Arc<MemoryRemote>, meta_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            meta_dir: meta_dir.into(),
            targets: None,
        }
    }

    fn trusted_root_path(&self) -> PathBuf {
        self.meta_dir.join(TRUSTED_ROOT_FILE)
    }
}

#[async_trait]
impl TufClient for MemoryTufClient {
    async fn setup(&mut self, root_version: u64, root_sha512: &str) -> Result<()> {
        let root = self.remote.root(root_version).ok_or_else(|| {
            TrdlError::Network(format!("root version {root_version} not found upstream"))
        })?;

        let actual = sha512_hex(&root);
        if !actual.eq_ignore_ascii_case(root_sha512) {
            return Err(TrdlError::RootHashMismatch {
                expected: root_sha512.to_string(),
                actual,
            });
        }

        remove_dir_all_if_exists(&self.meta_dir)?;
        atomic_write(&self.trusted_root_path(), &root)?;
        self.targets = Some(self.remote.snapshot());
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        if !self.trusted_root_path().is_file() {
            return Err(TrdlError::Metadata(format!(
                "no trusted root in {}",
                self.meta_dir.display()
            )));
        }
        self.remote.metadata_updates.fetch_add(1, Ordering::SeqCst);
        self.targets = Some(self.remote.snapshot());
        Ok(())
    }

    fn targets(&self) -> Result<BTreeMap<String, TargetMeta>> {
        self.targets
            .clone()
            .ok_or_else(|| TrdlError::Metadata("metadata has not been loaded".to_string()))
    }

    async fn download_file(&self, target_name: &str, dest: &Path, mode: u32) -> Result<()> {
        let name = normalize_target_name(target_name);
        let meta = self
            .targets
            .as_ref()
            .and_then(|targets| targets.get(&name))
            .cloned()
            .ok_or_else(|| TrdlError::Metadata(format!("target {name:?} not found")))?;

        let mut file = create_target_file(dest, mode)?;
        self.remote.downloads.fetch_add(1, Ordering::SeqCst);

        let result = (|| -> Result<()> {
            if self.remote.fail_downloads.load(Ordering::SeqCst) {
                return Err(TrdlError::Network(format!(
                    "connection reset while downloading {name:?}"
                )));
            }
            let data = self
                .remote
                .targets
                .lock()
                .get(&name)
                .cloned()
                .ok_or_else(|| TrdlError::Network(format!("target {name:?} not found upstream")))?;
            if TargetMeta::for_bytes(&data) != meta {
                return Err(TrdlError::Signature(format!(
                    "target {name:?} does not match signed metadata"
                )));
            }
            file.write_all(&data)?;
            file.sync_all()?;
            Ok(())
        })();

        if result.is_err() {
            drop(file);
            discard_target_file(dest);
        }
        result
    }
}
