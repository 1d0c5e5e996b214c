//! TUF client over HTTP(S) or `file://`, verifying with `tough`'s key and
//! role checks.
//!
//! The local store is `meta.json` under the repository's `.meta`
//! directory: the last verified root, timestamp, snapshot and targets
//! documents keyed by file name. It is read at the start of an update,
//! changed in memory and written back only when the whole refresh succeeds.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tough::schema::{RoleType, Root, Signed};
use url::Url;

use trdl_core::error::{Result, TrdlError};
use trdl_core::fs::{atomic_write, remove_dir_all_if_exists, sha512_hex};

use super::schema::{
    check_not_expired, metadata_file_name, parse_role, parse_root, role_keys_changed,
    verify_role, verify_root_rotation, verify_root_signed_by_all_keys, MetaFile, PayloadCheck,
    RoleDocument, Snapshot, Targets, Timestamp,
};
use super::{
    create_target_file, discard_target_file, normalize_target_name, TargetMeta, TufClient,
    ROOT_DOWNLOAD_LIMIT,
};

const STORE_FILE: &str = "meta.json";
const ROOT_FILE: &str = "root.json";
const TIMESTAMP_FILE: &str = "timestamp.json";
const SNAPSHOT_FILE: &str = "snapshot.json";
const TARGETS_FILE: &str = "targets.json";

const TIMESTAMP_DOWNLOAD_LIMIT: u64 = 16_384;
/// Bound for snapshot and targets documents listed without a length.
const META_DOWNLOAD_LIMIT: u64 = 10_000_000;
const MAX_ROOT_ROTATIONS: usize = 1024;
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Verified metadata keyed by file name.
type MetaStore = BTreeMap<String, Value>;

/// TUF client for a repository served over HTTP(S) or from a local
/// directory.
pub struct TufRepository {
    base_url: Url,
    meta_dir: PathBuf,
    http: reqwest::Client,
    consistent_snapshot: bool,
    targets: Option<BTreeMap<String, TargetMeta>>,
}

impl TufRepository {
    /// Create a client for the repository at `url` keeping its metadata in
    /// `meta_dir`. Nothing is loaded until [`TufClient::update`] runs.
    pub fn new(url: &str, meta_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_url = parse_base_url(url)?;
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TrdlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            meta_dir: meta_dir.into(),
            http,
            consistent_snapshot: false,
            targets: None,
        })
    }

    fn store_path(&self) -> PathBuf {
        self.meta_dir.join(STORE_FILE)
    }

    fn load_store(&self) -> Result<MetaStore> {
        let path = self.store_path();
        match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                TrdlError::Metadata(format!("unable to parse {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MetaStore::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_store(&self, store: &MetaStore) -> Result<()> {
        Ok(atomic_write(&self.store_path(), &serde_json::to_vec(store)?)?)
    }

    /// Open `path` under the repository URL. `None` when upstream does not
    /// have it.
    async fn fetch(&self, path: &str) -> Result<Option<ByteStream>> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| TrdlError::InvalidArgument(format!("invalid path {path:?}: {e}")))?;

        if url.scheme() == "file" {
            let file = url
                .to_file_path()
                .map_err(|()| TrdlError::InvalidArgument(format!("invalid file url {url}")))?;
            return match tokio::fs::read(&file).await {
                Ok(data) => {
                    let chunk = futures::stream::once(async move { Ok::<_, TrdlError>(data) });
                    Ok(Some(chunk.boxed()))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(TrdlError::Network(format!("failed to read {url}: {e}"))),
            };
        }

        tracing::debug!(url = %url, "Fetching");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TrdlError::Network(format!("failed to download {url}: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| TrdlError::Network(format!("failed to download {url}: {e}")))?;

        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| TrdlError::Network(format!("failed to download {url}: {e}")))
        });
        Ok(Some(stream.boxed()))
    }

    /// Fetch a whole document of at most `limit` bytes.
    async fn fetch_limited(&self, path: &str, limit: u64) -> Result<Option<Vec<u8>>> {
        let Some(mut stream) = self.fetch(path).await? else {
            return Ok(None);
        };

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (data.len() + chunk.len()) as u64 > limit {
                return Err(TrdlError::Metadata(format!(
                    "{path} exceeds the {limit} bytes limit"
                )));
            }
            data.extend_from_slice(&chunk);
        }
        Ok(Some(data))
    }

    async fn fetch_required(&self, path: &str, limit: u64) -> Result<Vec<u8>> {
        self.fetch_limited(path, limit).await?.ok_or_else(|| {
            TrdlError::Metadata(format!("{path} not found in {}", self.base_url))
        })
    }

    /// Fetch a document listed by timestamp or snapshot and check it
    /// against the listing.
    async fn fetch_listed(&self, kind: &str, listed: &MetaFile) -> Result<Vec<u8>> {
        let path = metadata_file_name(kind, listed.version.get(), self.consistent_snapshot);
        let limit = listed.length.unwrap_or(META_DOWNLOAD_LIMIT);
        let data = self.fetch_required(&path, limit).await?;
        PayloadCheck::check(&path, &data, listed.length, listed.hashes.as_ref())?;
        Ok(data)
    }

    /// Follow `<N+1>.root.json` until upstream has no newer root.
    async fn update_root(&self, store: &mut MetaStore, mut trusted: Signed<Root>) -> Result<Root> {
        for _ in 0..MAX_ROOT_ROTATIONS {
            let next_version = trusted.signed.version.get() + 1;
            let path = format!("{next_version}.{ROOT_FILE}");
            let Some(data) = self.fetch_limited(&path, ROOT_DOWNLOAD_LIMIT).await? else {
                check_not_expired(&trusted.signed)?;
                return Ok(trusted.signed);
            };

            let next = parse_root(&data)?;
            verify_root_rotation(&trusted.signed, &next)?;
            for (role, file) in [
                (RoleType::Timestamp, TIMESTAMP_FILE),
                (RoleType::Snapshot, SNAPSHOT_FILE),
                (RoleType::Targets, TARGETS_FILE),
            ] {
                if role_keys_changed(&trusted.signed, &next.signed, role) {
                    store.remove(file);
                }
            }

            tracing::info!(url = %self.base_url, version = next_version, "Root metadata rotated");
            store.insert(ROOT_FILE.to_string(), serde_json::from_slice(&data)?);
            trusted = next;
        }
        Err(TrdlError::Metadata(format!(
            "more than {MAX_ROOT_ROTATIONS} root versions to apply"
        )))
    }

    async fn update_timestamp(&self, store: &mut MetaStore, root: &Root) -> Result<Timestamp> {
        let data = self
            .fetch_required(TIMESTAMP_FILE, TIMESTAMP_DOWNLOAD_LIMIT)
            .await?;
        let timestamp: Signed<Timestamp> = parse_role(&data)?;
        verify_role(root, &timestamp)?;

        if let Some(trusted) = stored::<Timestamp>(store, TIMESTAMP_FILE)? {
            if timestamp.signed.version < trusted.signed.version {
                return Err(rollback(
                    TIMESTAMP_FILE,
                    timestamp.signed.version.get(),
                    trusted.signed.version.get(),
                ));
            }
        }

        store.insert(TIMESTAMP_FILE.to_string(), serde_json::from_slice(&data)?);
        Ok(timestamp.signed)
    }

    async fn update_snapshot(
        &self,
        store: &mut MetaStore,
        root: &Root,
        timestamp: &Timestamp,
    ) -> Result<Snapshot> {
        let listed = timestamp.snapshot()?;
        let trusted = current::<Snapshot>(store, SNAPSHOT_FILE, root)?;
        if let Some(trusted) = &trusted {
            if trusted.version == listed.version {
                return Ok(trusted.clone());
            }
        }

        let data = self.fetch_listed("snapshot", &listed).await?;
        let snapshot: Signed<Snapshot> = parse_role(&data)?;
        verify_role(root, &snapshot)?;
        check_listed_version(SNAPSHOT_FILE, &listed, snapshot.signed.version.get())?;

        if let Some(trusted) = trusted {
            let versions = snapshot.signed.versions()?;
            for (name, old) in trusted.versions()? {
                let new = versions.get(&name).copied().unwrap_or(0);
                if new < old {
                    return Err(rollback(&name, new, old));
                }
            }
        }

        store.insert(SNAPSHOT_FILE.to_string(), serde_json::from_slice(&data)?);
        Ok(snapshot.signed)
    }

    async fn update_targets(
        &self,
        store: &mut MetaStore,
        root: &Root,
        snapshot: &Snapshot,
    ) -> Result<Targets> {
        let listed = snapshot.targets()?;
        if let Some(trusted) = current::<Targets>(store, TARGETS_FILE, root)? {
            if trusted.version == listed.version {
                return Ok(trusted);
            }
        }

        let data = self.fetch_listed("targets", &listed).await?;
        let targets: Signed<Targets> = parse_role(&data)?;
        verify_role(root, &targets)?;
        check_listed_version(TARGETS_FILE, &listed, targets.signed.version.get())?;

        store.insert(TARGETS_FILE.to_string(), serde_json::from_slice(&data)?);
        Ok(targets.signed)
    }

    /// Location of a target upstream. With consistent snapshots the file
    /// name is prefixed with one of its digests.
    fn target_path(&self, name: &str, meta: &TargetMeta) -> Result<String> {
        if !self.consistent_snapshot {
            return Ok(format!("targets/{name}"));
        }

        let digest = meta
            .hashes
            .get("sha512")
            .or_else(|| meta.hashes.get("sha256"))
            .ok_or_else(|| TrdlError::Metadata(format!("target {name:?} declares no digests")))?;
        Ok(match name.rsplit_once('/') {
            Some((dir, base)) => format!("targets/{dir}/{digest}.{base}"),
            None => format!("targets/{digest}.{name}"),
        })
    }

    async fn fetch_target(&self, name: &str, meta: &TargetMeta, file: &mut File) -> Result<()> {
        let path = self.target_path(name, meta)?;
        let stream = self
            .fetch(&path)
            .await?
            .ok_or_else(|| TrdlError::Network(format!("target {name:?} not found upstream")))?;
        write_verified(stream, file, name, meta).await
    }
}

/// Document `name` from the store, if any.
fn stored<T: RoleDocument>(store: &MetaStore, name: &str) -> Result<Option<Signed<T>>> {
    store
        .get(name)
        .map(|value| {
            serde_json::from_value(value.clone())
                .map_err(|e| TrdlError::Metadata(format!("unable to parse stored {name}: {e}")))
        })
        .transpose()
}

/// Stored document that still verifies under `root`; anything else is
/// dropped and fetched again.
fn current<T: RoleDocument>(store: &MetaStore, name: &str, root: &Root) -> Result<Option<T>> {
    let Some(signed) = stored::<T>(store, name)? else {
        return Ok(None);
    };
    match verify_role(root, &signed) {
        Ok(()) => Ok(Some(signed.signed)),
        Err(e) => {
            tracing::debug!(file = name, error = %e, "Stored metadata no longer trusted");
            Ok(None)
        }
    }
}

fn check_listed_version(name: &str, listed: &MetaFile, actual: u64) -> Result<()> {
    if listed.version.get() != actual {
        return Err(TrdlError::Metadata(format!(
            "{name} has version {actual}, expected {}",
            listed.version
        )));
    }
    Ok(())
}

fn rollback(name: &str, new: u64, trusted: u64) -> TrdlError {
    TrdlError::Signature(format!(
        "{name} version {new} is older than trusted version {trusted}"
    ))
}

#[async_trait]
impl TufClient for TufRepository {
    async fn setup(&mut self, root_version: u64, root_sha512: &str) -> Result<()> {
        let path = if root_version == 0 {
            ROOT_FILE.to_string()
        } else {
            format!("{root_version}.{ROOT_FILE}")
        };

        let data = self
            .fetch_limited(&path, ROOT_DOWNLOAD_LIMIT)
            .await?
            .ok_or_else(|| TrdlError::Network(format!("{path} not found in {}", self.base_url)))?;
        let actual = sha512_hex(&data);
        if !actual.eq_ignore_ascii_case(root_sha512) {
            return Err(TrdlError::RootHashMismatch {
                expected: root_sha512.to_string(),
                actual,
            });
        }

        let root = parse_root(&data)?;
        verify_root_signed_by_all_keys(&root)?;

        remove_dir_all_if_exists(&self.meta_dir)?;
        let mut store = MetaStore::new();
        store.insert(ROOT_FILE.to_string(), serde_json::from_slice(&data)?);
        self.save_store(&store)?;
        self.targets = None;

        tracing::info!(url = %self.base_url, version = %root.signed.version, "Trust root pinned");
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        let mut store = self.load_store()?;
        let trusted = stored_root(&store)?.ok_or_else(|| {
            TrdlError::Metadata(format!("no trusted root in {}", self.meta_dir.display()))
        })?;

        let root = self.update_root(&mut store, trusted).await?;
        let timestamp = self.update_timestamp(&mut store, &root).await?;
        self.consistent_snapshot = root.consistent_snapshot;
        let snapshot = self.update_snapshot(&mut store, &root, &timestamp).await?;
        let targets = self.update_targets(&mut store, &root, &snapshot).await?;
        let files = targets.target_files()?;

        self.save_store(&store)?;
        tracing::debug!(
            url = %self.base_url,
            snapshot = %snapshot.version,
            targets = files.len(),
            "Metadata refreshed"
        );
        self.targets = Some(files);
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
            .ok_or_else(|| TrdlError::Metadata("metadata has not been loaded".to_string()))?
            .get(&name)
            .cloned()
            .ok_or_else(|| TrdlError::Metadata(format!("target {name:?} not found")))?;

        let mut file = create_target_file(dest, mode)?;
        tracing::info!(target = %name, dest = %dest.display(), "Downloading target");

        let result = self.fetch_target(&name, &meta, &mut file).await;

        if let Err(ref e) = result {
            drop(file);
            discard_target_file(dest);
            tracing::debug!(target = %name, error = %e, "Target download failed");
        }
        result
    }
}

fn stored_root(store: &MetaStore) -> Result<Option<Signed<Root>>> {
    store
        .get(ROOT_FILE)
        .map(|value| {
            serde_json::from_value(value.clone())
                .map_err(|e| TrdlError::Metadata(format!("unable to parse stored root: {e}")))
        })
        .transpose()
}

/// Write `stream` to `file`, stopping as soon as it goes past the signed
/// length and checking the declared digests at the end.
async fn write_verified<S>(stream: S, file: &mut File, name: &str, meta: &TargetMeta) -> Result<()>
where
    S: Stream<Item = Result<Vec<u8>>>,
{
    let mut check = PayloadCheck::new(
        &format!("target {name:?}"),
        Some(meta.length),
        Some(&meta.hashes),
    )?;

    let mut stream = Box::pin(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        check.update(&chunk)?;
        file.write_all(&chunk)?;
    }
    check.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Parse a repository URL, making sure relative joins stay under it.
fn parse_base_url(url: &str) -> Result<Url> {
    let with_slash = if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    };
    Url::parse(&with_slash)
        .map_err(|e| TrdlError::InvalidArgument(format!("invalid repository url {url:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuf::fixture::SignedRepo;
    use tempfile::TempDir;

    fn setup_dirs() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let upstream = tmp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        let meta = tmp.path().join(".meta");
        (tmp, upstream, meta)
    }

    async fn pinned(repo: &SignedRepo, meta: &Path) -> TufRepository {
        let mut client = TufRepository::new(&repo.url(), meta).unwrap();
        client.setup(1, &repo.root_sha512(1)).await.unwrap();
        client
    }

    #[test]
    fn test_parse_base_url_adds_slash() {
        let url = parse_base_url("https://tuf.example.com/repo").unwrap();
        assert_eq!(url.as_str(), "https://tuf.example.com/repo/");
        assert_eq!(
            url.join("2.root.json").unwrap().as_str(),
            "https://tuf.example.com/repo/2.root.json"
        );
        assert_eq!(
            url.join("targets/").unwrap().as_str(),
            "https://tuf.example.com/repo/targets/"
        );
    }

    #[test]
    fn test_parse_base_url_invalid() {
        assert!(matches!(
            parse_base_url("not a url").unwrap_err(),
            TrdlError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_targets_before_load() {
        let tmp = TempDir::new().unwrap();
        let client = TufRepository::new("https://tuf.example.com", tmp.path().join(".meta")).unwrap();
        assert!(matches!(
            client.targets().unwrap_err(),
            TrdlError::Metadata(_)
        ));
    }

    #[tokio::test]
    async fn test_update_without_trusted_root() {
        let tmp = TempDir::new().unwrap();
        let mut client =
            TufRepository::new("https://tuf.example.com", tmp.path().join(".meta")).unwrap();
        assert!(matches!(
            client.update().await.unwrap_err(),
            TrdlError::Metadata(_)
        ));
    }

    // --- signed repository tests ---

    #[tokio::test]
    async fn test_cold_setup_update_and_download() {
        let (tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");
        repo.set_target("releases/v1.2.3/linux-amd64/bin/tool", "#!/bin/sh\n");

        let client = pinned(&repo, &meta).await;
        assert!(client.targets().is_err());

        // A fresh client reads the pinned root back from disk
        let mut client = TufRepository::new(&repo.url(), &meta).unwrap();
        client.update().await.unwrap();

        let targets = client.targets().unwrap();
        assert_eq!(targets.len(), 2);
        let stable = &targets["channels/0/stable"];
        assert_eq!(stable.length, 7);
        assert_eq!(stable.hashes.len(), 1);
        assert_eq!(stable.hashes["sha512"], sha512_hex(b"v1.2.3\n"));

        let dest = tmp.path().join("out/tool");
        client
            .download_file("/releases/v1.2.3/linux-amd64/bin/tool", &dest, 0o755)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "#!/bin/sh\n");
        assert!(targets["releases/v1.2.3/linux-amd64/bin/tool"]
            .matches_file(&dest)
            .unwrap());
    }

    #[tokio::test]
    async fn test_setup_root_hash_mismatch() {
        let (_tmp, upstream, meta) = setup_dirs();
        let repo = SignedRepo::new(&upstream);
        std::fs::create_dir_all(&meta).unwrap();
        std::fs::write(meta.join(STORE_FILE), "{}").unwrap();

        let mut client = TufRepository::new(&repo.url(), &meta).unwrap();
        let err = client.setup(1, &"0".repeat(128)).await.unwrap_err();
        assert!(matches!(err, TrdlError::RootHashMismatch { .. }));
        // Existing local metadata is left alone
        assert_eq!(std::fs::read_to_string(meta.join(STORE_FILE)).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_setup_version_zero_fetches_current_root() {
        let (_tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.rotate_root();

        let mut client = TufRepository::new(&repo.url(), &meta).unwrap();
        client.setup(0, &repo.root_sha512(2)).await.unwrap();
        client.update().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_requires_every_root_signature() {
        let (_tmp, upstream, meta) = setup_dirs();
        let repo = SignedRepo::new(&upstream);
        repo.forge_root_signature(1);

        let mut client = TufRepository::new(&repo.url(), &meta).unwrap();
        let err = client.setup(1, &repo.root_sha512(1)).await.unwrap_err();
        assert!(matches!(err, TrdlError::Signature(_)));
        assert!(!meta.exists());
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let (_tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");

        let mut client = pinned(&repo, &meta).await;
        client.update().await.unwrap();
        let first = client.targets().unwrap();
        let stored = std::fs::read(meta.join(STORE_FILE)).unwrap();

        client.update().await.unwrap();
        assert_eq!(client.targets().unwrap(), first);
        assert_eq!(std::fs::read(meta.join(STORE_FILE)).unwrap(), stored);
    }

    #[tokio::test]
    async fn test_update_picks_up_new_targets() {
        let (_tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");

        let mut client = pinned(&repo, &meta).await;
        client.update().await.unwrap();

        repo.set_target("channels/0/stable", "v1.2.4\n");
        repo.set_target("channels/0/ea", "v1.2.5\n");
        client.update().await.unwrap();

        let targets = client.targets().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets["channels/0/stable"].hashes["sha512"],
            sha512_hex(b"v1.2.4\n")
        );
    }

    #[tokio::test]
    async fn test_update_follows_root_rotation() {
        let (_tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");
        let mut client = pinned(&repo, &meta).await;

        repo.rotate_root();
        repo.rotate_root();
        client.update().await.unwrap();

        let store: MetaStore =
            serde_json::from_slice(&std::fs::read(meta.join(STORE_FILE)).unwrap()).unwrap();
        assert_eq!(store[ROOT_FILE]["signed"]["version"], 3);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_stored_metadata() {
        let (_tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");
        let mut client = pinned(&repo, &meta).await;
        client.update().await.unwrap();
        let stored = std::fs::read(meta.join(STORE_FILE)).unwrap();

        repo.set_target("channels/0/stable", "v1.2.4\n");
        std::fs::write(upstream.join(TARGETS_FILE), "{}").unwrap();
        let err = client.update().await.unwrap_err();
        assert!(matches!(err, TrdlError::Signature(_)));
        assert_eq!(std::fs::read(meta.join(STORE_FILE)).unwrap(), stored);
    }

    #[tokio::test]
    async fn test_download_rejects_tampered_target() {
        let (tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");
        let mut client = pinned(&repo, &meta).await;
        client.update().await.unwrap();

        repo.tamper_target("channels/0/stable", "v6.6.6\n");
        let dest = tmp.path().join("stable");
        std::fs::write(&dest, "stale").unwrap();
        let err = client
            .download_file("channels/0/stable", &dest, 0o644)
            .await
            .unwrap_err();
        assert!(matches!(err, TrdlError::Signature(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_missing_upstream_file() {
        let (tmp, upstream, meta) = setup_dirs();
        let mut repo = SignedRepo::new(&upstream);
        repo.set_target("channels/0/stable", "v1.2.3\n");
        let mut client = pinned(&repo, &meta).await;
        client.update().await.unwrap();

        std::fs::remove_file(upstream.join("targets/channels/0/stable")).unwrap();
        let dest = tmp.path().join("stable");
        let err = client
            .download_file("channels/0/stable", &dest, 0o644)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!dest.exists());
    }

    // --- streaming tests ---

    #[tokio::test]
    async fn test_write_verified_propagates_errors() {
        let tmp = TempDir::new().unwrap();
        let mut file = File::create(tmp.path().join("out")).unwrap();
        let chunks = vec![
            Ok(b"abc".to_vec()),
            Err(TrdlError::Network("reset".to_string())),
        ];

        let meta = TargetMeta::for_bytes(b"abcdef");
        let err = write_verified(futures::stream::iter(chunks), &mut file, "t", &meta)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_verified_writes_chunks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out");
        let mut file = File::create(&path).unwrap();
        let chunks = vec![Ok(b"hello ".to_vec()), Ok(b"world".to_vec())];

        let meta = TargetMeta::for_bytes(b"hello world");
        write_verified(futures::stream::iter(chunks), &mut file, "t", &meta)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_write_verified_stops_past_signed_length() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out");
        let mut file = File::create(&path).unwrap();
        let chunks = vec![Ok(b"hello".to_vec()), Ok(b" world".to_vec())];

        let meta = TargetMeta::for_bytes(b"hello");
        let err = write_verified(futures::stream::iter(chunks), &mut file, "t", &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, TrdlError::Signature(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_target_path_with_consistent_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut client = TufRepository::new("https://tuf.example.com", tmp.path()).unwrap();
        let meta = TargetMeta::for_bytes(b"x");
        assert_eq!(
            client.target_path("channels/0/stable", &meta).unwrap(),
            "targets/channels/0/stable"
        );

        client.consistent_snapshot = true;
        assert_eq!(
            client.target_path("channels/0/stable", &meta).unwrap(),
            format!("targets/channels/0/{}.stable", meta.hashes["sha512"])
        );
    }
}
