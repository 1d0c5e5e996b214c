//! Signed repositories laid out on disk, served to [`TufRepository`] through
//! `file://` URLs.
//!
//! Metadata is signed with Ed25519 keys and declares `sha512` digests only,
//! the way trdl servers publish.
//!
//! [`TufRepository`]: super::TufRepository

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tough::schema::key::Key;
use tough::schema::{Role, Root};
use url::Url;

use trdl_core::fs::sha512_hex;

use super::schema::{Snapshot, Targets, Timestamp};

const EXPIRES: &str = "2100-01-01T00:00:00Z";

pub(crate) struct SigningKey {
    pair: Ed25519KeyPair,
    id: String,
    public: Value,
}

impl SigningKey {
    pub(crate) fn generate() -> Self {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public = json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyid_hash_algorithms": ["sha256", "sha512"],
            "keyval": {"public": hex::encode(pair.public_key().as_ref())},
        });
        let key: Key = serde_json::from_value(public.clone()).unwrap();
        let id = hex::encode(&*key.key_id().unwrap());
        Self { pair, id, public }
    }

    fn sign(&self, msg: &[u8]) -> Value {
        json!({"keyid": self.id, "sig": hex::encode(self.pair.sign(msg).as_ref())})
    }
}

/// Sign the canonical form of `doc`, parsed as `T`.
fn sign_document<T: Role + DeserializeOwned>(doc: Value, keys: &[&SigningKey]) -> Vec<u8> {
    let role: T = serde_json::from_value(doc.clone()).unwrap();
    let canonical = role.canonical_form().unwrap();
    let signatures: Vec<Value> = keys.iter().map(|k| k.sign(&canonical)).collect();
    serde_json::to_vec_pretty(&json!({"signed": doc, "signatures": signatures})).unwrap()
}

/// A repository with two root keys and one key for the online roles.
pub(crate) struct SignedRepo {
    dir: PathBuf,
    root_keys: Vec<SigningKey>,
    online_key: SigningKey,
    root_version: u64,
    version: u64,
    targets: BTreeMap<String, Vec<u8>>,
}

impl SignedRepo {
    /// Publish root v1 and an empty target set.
    pub(crate) fn new(dir: &Path) -> Self {
        let mut repo = Self {
            dir: dir.to_path_buf(),
            root_keys: vec![SigningKey::generate(), SigningKey::generate()],
            online_key: SigningKey::generate(),
            root_version: 1,
            version: 0,
            targets: BTreeMap::new(),
        };
        repo.write_root();
        repo.publish();
        repo
    }

    pub(crate) fn url(&self) -> String {
        Url::from_directory_path(&self.dir).unwrap().to_string()
    }

    pub(crate) fn root_bytes(&self, version: u64) -> Vec<u8> {
        std::fs::read(self.dir.join(format!("{version}.root.json"))).unwrap()
    }

    pub(crate) fn root_sha512(&self, version: u64) -> String {
        sha512_hex(&self.root_bytes(version))
    }

    /// Add or replace a target and publish new metadata.
    pub(crate) fn set_target(&mut self, name: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let path = self.dir.join("targets").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, &data).unwrap();
        self.targets.insert(name.to_string(), data);
        self.publish();
    }

    /// Change a target file without re-signing.
    pub(crate) fn tamper_target(&self, name: &str, data: &str) {
        std::fs::write(self.dir.join("targets").join(name), data).unwrap();
    }

    /// Publish the next root version with an extra root key, signed by the
    /// previous and the new root keys.
    pub(crate) fn rotate_root(&mut self) {
        self.root_keys.push(SigningKey::generate());
        self.root_version += 1;
        self.write_root();
    }

    fn write_root(&self) {
        let mut keys = Map::new();
        for key in self.root_keys.iter().chain([&self.online_key]) {
            keys.insert(key.id.clone(), key.public.clone());
        }
        let root_ids: Vec<&str> = self.root_keys.iter().map(|k| k.id.as_str()).collect();
        let online = [self.online_key.id.as_str()];
        let doc = json!({
            "_type": "root",
            "spec_version": "1.0",
            "consistent_snapshot": false,
            "version": self.root_version,
            "expires": EXPIRES,
            "keys": keys,
            "roles": {
                "root": {"keyids": root_ids, "threshold": 1},
                "snapshot": {"keyids": online, "threshold": 1},
                "targets": {"keyids": online, "threshold": 1},
                "timestamp": {"keyids": online, "threshold": 1},
            },
        });

        let signers: Vec<&SigningKey> = self.root_keys.iter().collect();
        let data = sign_document::<Root>(doc, &signers);
        std::fs::write(self.dir.join(format!("{}.root.json", self.root_version)), &data).unwrap();
        std::fs::write(self.dir.join("root.json"), &data).unwrap();
    }

    /// Replace the signature of the second root key with one over other
    /// bytes, keeping its key id.
    pub(crate) fn forge_root_signature(&self, version: u64) {
        let mut root: Value = serde_json::from_slice(&self.root_bytes(version)).unwrap();
        root["signatures"][1] = self.root_keys[1].sign(b"something else");
        let data = serde_json::to_vec_pretty(&root).unwrap();
        std::fs::write(self.dir.join(format!("{version}.root.json")), &data).unwrap();
        if version == self.root_version {
            std::fs::write(self.dir.join("root.json"), &data).unwrap();
        }
    }

    fn publish(&mut self) {
        self.version += 1;
        let online = [&self.online_key];

        let targets: Map<String, Value> = self
            .targets
            .iter()
            .map(|(name, data)| {
                let entry = json!({"length": data.len(), "hashes": {"sha512": sha512_hex(data)}});
                (name.clone(), entry)
            })
            .collect();
        let targets = sign_document::<Targets>(
            json!({
                "_type": "targets",
                "spec_version": "1.0",
                "version": self.version,
                "expires": EXPIRES,
                "targets": targets,
            }),
            &online,
        );

        let snapshot = sign_document::<Snapshot>(
            json!({
                "_type": "snapshot",
                "spec_version": "1.0",
                "version": self.version,
                "expires": EXPIRES,
                "meta": {"targets.json": self.listing(&targets)},
            }),
            &online,
        );

        let timestamp = sign_document::<Timestamp>(
            json!({
                "_type": "timestamp",
                "spec_version": "1.0",
                "version": self.version,
                "expires": EXPIRES,
                "meta": {"snapshot.json": self.listing(&snapshot)},
            }),
            &online,
        );

        std::fs::write(self.dir.join("targets.json"), targets).unwrap();
        std::fs::write(self.dir.join("snapshot.json"), snapshot).unwrap();
        std::fs::write(self.dir.join("timestamp.json"), timestamp).unwrap();
    }

    fn listing(&self, data: &[u8]) -> Value {
        json!({
            "version": self.version,
            "length": data.len(),
            "hashes": {"sha512": sha512_hex(data)},
        })
    }
}
