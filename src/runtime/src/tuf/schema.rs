//! Signed role documents of a trdl repository.
//!
//! Publishers may declare any subset of digests for metadata and targets
//! (trdl servers emit `sha512` only), so listings are kept as published and
//! read through narrow views. Signatures are checked with the keys of the
//! trusted [`Root`].

use std::collections::BTreeMap;
use std::num::NonZeroU64;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use tough::schema::{Role, RoleType, Root, Signed};

use trdl_core::error::{Result, TrdlError};

use super::TargetMeta;

/// Algorithm name to hex digest.
pub type Hashes = BTreeMap<String, String>;

const SUPPORTED_HASHES: [&str; 2] = ["sha256", "sha512"];

/// A role document other than root.
pub trait RoleDocument: Role + DeserializeOwned {
    /// Value of the `_type` field.
    const KIND: &'static str;

    fn kind(&self) -> &str;
}

macro_rules! role_document {
    ($(#[$attr:meta])* $name:ident, $role:expr, $kind:literal, $listing:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Deserialize, Serialize)]
        pub struct $name {
            #[serde(rename = "_type")]
            pub kind: String,
            pub spec_version: String,
            pub version: NonZeroU64,
            /// Kept verbatim so the signed bytes can be reproduced.
            pub expires: String,
            pub $listing: BTreeMap<String, Value>,
            #[serde(flatten)]
            pub extra: BTreeMap<String, Value>,
        }

        impl Role for $name {
            const TYPE: RoleType = $role;

            fn expires(&self) -> DateTime<Utc> {
                parse_expires(&self.expires)
            }

            fn version(&self) -> NonZeroU64 {
                self.version
            }

            fn filename(&self, consistent_snapshot: bool) -> String {
                metadata_file_name($kind, self.version.get(), consistent_snapshot)
            }
        }

        impl RoleDocument for $name {
            const KIND: &'static str = $kind;

            fn kind(&self) -> &str {
                &self.kind
            }
        }
    };
}

role_document!(
    /// Freshness marker pointing at the current snapshot.
    Timestamp,
    RoleType::Timestamp,
    "timestamp",
    meta
);

role_document!(
    /// Versions of the targets metadata.
    Snapshot,
    RoleType::Snapshot,
    "snapshot",
    meta
);

role_document!(
    /// Signed list of target files.
    Targets,
    RoleType::Targets,
    "targets",
    targets
);

/// A metadata file as listed by timestamp or snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaFile {
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub hashes: Option<Hashes>,
    pub version: NonZeroU64,
}

#[derive(Deserialize)]
struct TargetFile {
    length: u64,
    hashes: Hashes,
}

impl Timestamp {
    /// The snapshot entry.
    pub fn snapshot(&self) -> Result<MetaFile> {
        listed(&self.meta, "snapshot.json", Self::TYPE)
    }
}

impl Snapshot {
    /// The top-level targets entry.
    pub fn targets(&self) -> Result<MetaFile> {
        listed(&self.meta, "targets.json", Self::TYPE)
    }

    /// Every listed metadata file with its version.
    pub fn versions(&self) -> Result<BTreeMap<String, u64>> {
        self.meta
            .keys()
            .map(|name| Ok((name.clone(), listed(&self.meta, name, Self::TYPE)?.version.get())))
            .collect()
    }
}

impl Targets {
    /// Targets with their signed length and declared digests.
    pub fn target_files(&self) -> Result<BTreeMap<String, TargetMeta>> {
        self.targets
            .iter()
            .map(|(name, value)| {
                let file: TargetFile = serde_json::from_value(value.clone()).map_err(|e| {
                    TrdlError::Metadata(format!("invalid targets entry {name:?}: {e}"))
                })?;
                let hashes = file
                    .hashes
                    .into_iter()
                    .map(|(algo, digest)| (algo, digest.to_ascii_lowercase()))
                    .collect();
                Ok((
                    name.clone(),
                    TargetMeta {
                        length: file.length,
                        hashes,
                    },
                ))
            })
            .collect()
    }
}

fn listed(meta: &BTreeMap<String, Value>, name: &str, role: RoleType) -> Result<MetaFile> {
    let value = meta
        .get(name)
        .ok_or_else(|| TrdlError::Metadata(format!("{role} metadata does not list {name}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| TrdlError::Metadata(format!("invalid {role} entry {name:?}: {e}")))
}

/// Unparseable expiry dates count as already expired.
fn parse_expires(expires: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(expires)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `<kind>.json`, or `<version>.<kind>.json` with consistent snapshots.
pub fn metadata_file_name(kind: &str, version: u64, consistent_snapshot: bool) -> String {
    if consistent_snapshot && kind != "timestamp" {
        format!("{version}.{kind}.json")
    } else {
        format!("{kind}.json")
    }
}

pub fn parse_root(data: &[u8]) -> Result<Signed<Root>> {
    serde_json::from_slice(data)
        .map_err(|e| TrdlError::Metadata(format!("unable to parse root metadata: {e}")))
}

pub fn parse_role<T: RoleDocument>(data: &[u8]) -> Result<Signed<T>> {
    let signed: Signed<T> = serde_json::from_slice(data).map_err(|e| {
        TrdlError::Metadata(format!("unable to parse {} metadata: {e}", T::KIND))
    })?;
    if signed.signed.kind() != T::KIND {
        return Err(TrdlError::Metadata(format!(
            "expected {} metadata, got {:?}",
            T::KIND,
            signed.signed.kind()
        )));
    }
    Ok(signed)
}

/// Check `signed` against the keys and threshold `root` sets for its role,
/// then its expiry.
pub fn verify_role<T: Role>(root: &Root, signed: &Signed<T>) -> Result<()> {
    root.verify_role(signed)
        .map_err(|e| TrdlError::Signature(format!("{} metadata: {e}", T::TYPE)))?;
    check_not_expired(&signed.signed)
}

pub fn check_not_expired<T: Role>(role: &T) -> Result<()> {
    let expires = role.expires();
    if expires <= Utc::now() {
        return Err(TrdlError::Metadata(format!(
            "{} metadata expired at {expires}",
            T::TYPE
        )));
    }
    Ok(())
}

/// Trust bootstrap: every root key must have produced a valid signature.
pub fn verify_root_signed_by_all_keys(signed: &Signed<Root>) -> Result<()> {
    let mut verifier = signed.signed.clone();
    let role = verifier
        .roles
        .get_mut(&RoleType::Root)
        .ok_or_else(|| TrdlError::Metadata("root metadata lists no root role".to_string()))?;
    role.threshold = NonZeroU64::new(role.keyids.len() as u64)
        .ok_or_else(|| TrdlError::Metadata("root metadata lists no root keys".to_string()))?;

    verifier.verify_role(signed).map_err(|e| {
        TrdlError::Signature(format!("root metadata is not signed by every root key: {e}"))
    })
}

/// A new root must directly follow the trusted one and satisfy the root
/// role of both.
pub fn verify_root_rotation(trusted: &Root, next: &Signed<Root>) -> Result<()> {
    let expected = trusted.version.get() + 1;
    if next.signed.version.get() != expected {
        return Err(TrdlError::Metadata(format!(
            "expected root version {expected}, got {}",
            next.signed.version
        )));
    }
    trusted
        .verify_role(next)
        .map_err(|e| TrdlError::Signature(format!("root v{expected} by trusted keys: {e}")))?;
    next.signed
        .verify_role(next)
        .map_err(|e| TrdlError::Signature(format!("root v{expected} by its own keys: {e}")))
}

/// Whether the keys of `role` differ between two roots.
pub fn role_keys_changed(old: &Root, new: &Root, role: RoleType) -> bool {
    old.roles.get(&role).map(|r| &r.keyids) != new.roles.get(&role).map(|r| &r.keyids)
}

/// Incremental check of a payload against its signed length and digests.
pub struct PayloadCheck {
    what: String,
    length: Option<u64>,
    hashes: Hashes,
    received: u64,
    sha256: Option<Sha256>,
    sha512: Option<Sha512>,
}

impl PayloadCheck {
    /// `hashes` of `None` skips digest checks; an empty set is rejected, as
    /// is any algorithm other than sha256 and sha512.
    pub fn new(what: &str, length: Option<u64>, hashes: Option<&Hashes>) -> Result<Self> {
        let hashes = hashes.cloned();
        if let Some(hashes) = &hashes {
            if hashes.is_empty() {
                return Err(TrdlError::Metadata(format!("{what} declares no digests")));
            }
            if let Some(algo) = hashes.keys().find(|a| !SUPPORTED_HASHES.contains(&a.as_str())) {
                return Err(TrdlError::Metadata(format!(
                    "{what} uses unsupported hash algorithm {algo:?}"
                )));
            }
        }
        let hashes = hashes.unwrap_or_default();

        Ok(Self {
            what: what.to_string(),
            length,
            received: 0,
            sha256: hashes.contains_key("sha256").then(Sha256::new),
            sha512: hashes.contains_key("sha512").then(Sha512::new),
            hashes,
        })
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<()> {
        self.received += chunk.len() as u64;
        if let Some(length) = self.length {
            if self.received > length {
                return Err(TrdlError::Signature(format!(
                    "{} exceeds its signed length of {length} bytes",
                    self.what
                )));
            }
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha512.as_mut() {
            h.update(chunk);
        }
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if let Some(length) = self.length {
            if self.received != length {
                return Err(TrdlError::Signature(format!(
                    "{} is {} bytes, signed length is {length}",
                    self.what, self.received
                )));
            }
        }

        let actual = [
            ("sha256", self.sha256.map(|h| hex::encode(h.finalize()))),
            ("sha512", self.sha512.map(|h| hex::encode(h.finalize()))),
        ];
        for (algo, digest) in actual {
            let Some(digest) = digest else { continue };
            let matches = self
                .hashes
                .get(algo)
                .is_some_and(|expected| expected.eq_ignore_ascii_case(&digest));
            if !matches {
                return Err(TrdlError::Signature(format!(
                    "{} does not match its signed {algo} digest",
                    self.what
                )));
            }
        }
        Ok(())
    }

    /// Check a complete payload.
    pub fn check(what: &str, data: &[u8], length: Option<u64>, hashes: Option<&Hashes>) -> Result<()> {
        let mut check = Self::new(what, length, hashes)?;
        check.update(data)?;
        check.finish()
    }
}
