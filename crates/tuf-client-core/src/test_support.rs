//! Signed repository fixtures shared by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
};
use serde_json::{json, Value};

use crate::cache::MemoryCache;
use crate::clock::FixedClock;
use crate::crypto::{self, sha256_hex, HashAlgorithm};
use crate::fetch::{FetchError, Fetcher, MetadataRequest, TargetRequest};
use crate::metadata::{Key, KeyId, Signature};
use crate::updater::Updater;

/// DER prefix of a P-256 SubjectPublicKeyInfo before the 65-byte point.
const P256_SPKI_PREFIX: &str = "3059301306072a8648ce3d020106082a8648ce3d030107034200";

#[derive(Clone)]
enum KeyMaterial {
    Ed25519([u8; 32]),
    Ecdsa(Vec<u8>),
}

/// A signing key with its TUF public representation.
#[derive(Clone)]
pub(crate) struct TestKey {
    material: KeyMaterial,
}

impl TestKey {
    /// Deterministic Ed25519 key derived from `seed`.
    pub fn ed25519(seed: u8) -> Self {
        Self {
            material: KeyMaterial::Ed25519([seed; 32]),
        }
    }

    pub fn ecdsa() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        Self {
            material: KeyMaterial::Ecdsa(pkcs8.as_ref().to_vec()),
        }
    }

    fn keytype_and_scheme(&self) -> (&'static str, &'static str) {
        match self.material {
            KeyMaterial::Ed25519(_) => ("ed25519", "ed25519"),
            KeyMaterial::Ecdsa(_) => ("ecdsa", "ecdsa-sha2-nistp256"),
        }
    }

    pub fn public(&self) -> String {
        match &self.material {
            KeyMaterial::Ed25519(seed) => {
                let pair = Ed25519KeyPair::from_seed_unchecked(seed).unwrap();
                hex::encode(pair.public_key().as_ref())
            }
            KeyMaterial::Ecdsa(pkcs8) => {
                let pair = EcdsaKeyPair::from_pkcs8(
                    &ECDSA_P256_SHA256_ASN1_SIGNING,
                    pkcs8,
                    &SystemRandom::new(),
                )
                .unwrap();
                let mut der = hex::decode(P256_SPKI_PREFIX).unwrap();
                der.extend_from_slice(pair.public_key().as_ref());
                pem::encode(&pem::Pem::new("PUBLIC KEY", der))
            }
        }
    }

    pub fn public_json(&self) -> Value {
        let (keytype, scheme) = self.keytype_and_scheme();
        json!({
            "keytype": keytype,
            "scheme": scheme,
            "keyval": { "public": self.public() },
        })
    }

    pub fn keyid(&self) -> KeyId {
        let (keytype, scheme) = self.keytype_and_scheme();
        crypto::key_id_for(keytype, scheme, &self.public()).unwrap()
    }

    /// The key as the parser would produce it.
    pub fn key(&self) -> Key {
        let (keytype, scheme) = self.keytype_and_scheme();
        let scheme = crate::metadata::KeyScheme::from_name(scheme);
        let public = self.public();
        Key {
            keyid: self.keyid(),
            keytype: keytype.to_string(),
            material: crypto::decode_public_key(&scheme, &public).unwrap(),
            scheme,
            public,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = match &self.material {
            KeyMaterial::Ed25519(seed) => Ed25519KeyPair::from_seed_unchecked(seed)
                .unwrap()
                .sign(message)
                .as_ref()
                .to_vec(),
            KeyMaterial::Ecdsa(pkcs8) => {
                let rng = SystemRandom::new();
                EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
                    .unwrap()
                    .sign(&rng, message)
                    .unwrap()
                    .as_ref()
                    .to_vec()
            }
        };
        Signature {
            keyid: self.keyid(),
            sig,
        }
    }
}

/// Wraps `signed` in an envelope signed by `keys`. The signed span is the
/// canonical encoding, so both payload modes verify.
pub(crate) fn sign_document(signed: &Value, keys: &[&TestKey]) -> Vec<u8> {
    let payload = crypto::canonical_json(signed).unwrap();
    let signatures: Vec<Value> = keys
        .iter()
        .map(|key| {
            let signature = key.sign(&payload);
            json!({ "keyid": signature.keyid.as_str(), "sig": hex::encode(signature.sig) })
        })
        .collect();
    let mut document = br#"{"signatures":"#.to_vec();
    document.extend_from_slice(&serde_json::to_vec(&signatures).unwrap());
    document.extend_from_slice(br#","signed":"#);
    document.extend_from_slice(&payload);
    document.push(b'}');
    document
}

/// `length` plus sha256 and sha512 of `bytes`.
pub(crate) fn file_meta(bytes: &[u8]) -> Value {
    json!({
        "length": bytes.len(),
        "hashes": {
            "sha256": sha256_hex(bytes),
            "sha512": HashAlgorithm::Sha512.digest_hex(bytes),
        },
    })
}

pub(crate) fn rfc3339(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// In-memory repository served through the [`Fetcher`] interface.
#[derive(Default)]
pub(crate) struct MockFetcher {
    metadata: Mutex<HashMap<String, Vec<u8>>>,
    targets: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn put_metadata(&self, name: &str, bytes: Vec<u8>) {
        self.metadata.lock().unwrap().insert(name.to_string(), bytes);
    }

    pub fn remove_metadata(&self, name: &str) {
        self.metadata.lock().unwrap().remove(name);
    }

    pub fn metadata(&self, name: &str) -> Option<Vec<u8>> {
        self.metadata.lock().unwrap().get(name).cloned()
    }

    pub fn put_target(&self, path: &str, bytes: Vec<u8>) {
        self.targets.lock().unwrap().insert(path.to_string(), bytes);
    }

    /// Makes requests for `name` fail with `error`.
    pub fn fail(&self, name: &str, error: FetchError) {
        self.failures.lock().unwrap().insert(name.to_string(), error);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn serve(
        &self,
        store: &Mutex<HashMap<String, Vec<u8>>>,
        name: String,
        limit: u64,
    ) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(name.clone());
        if let Some(error) = self.failures.lock().unwrap().get(&name) {
            return Err(error.clone());
        }
        let bytes = store
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(name.clone()))?;
        if bytes.len() as u64 > limit {
            return Err(FetchError::LengthExceeded {
                resource: name,
                limit,
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_metadata(
        &self,
        request: &MetadataRequest,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        self.serve(&self.metadata, request.file_name(), max_length)
    }

    async fn fetch_target(
        &self,
        request: &TargetRequest,
        length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let name = format!("targets/{}", request.file_path().trim_start_matches('/'));
        self.serve(&self.targets, name, length)
    }
}

pub(crate) struct RoleKeys {
    pub root: TestKey,
    pub timestamp: TestKey,
    pub snapshot: TestKey,
    pub targets: TestKey,
}

/// A delegated targets role published by the fixture.
pub(crate) struct Delegate {
    pub name: String,
    /// `targets` or another delegate's name.
    pub parent: String,
    pub key: TestKey,
    pub paths: Vec<String>,
    pub terminating: bool,
    pub version: u64,
    pub files: Vec<(String, Vec<u8>)>,
}

impl Delegate {
    pub fn new(name: &str, parent: &str, seed: u8, paths: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.to_string(),
            key: TestKey::ed25519(seed),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            terminating: false,
            version: 1,
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.files.push((path.to_string(), bytes.to_vec()));
        self
    }

    pub fn terminating(mut self) -> Self {
        self.terminating = true;
        self
    }
}

pub(crate) struct Versions {
    pub root: u64,
    pub timestamp: u64,
    pub snapshot: u64,
    pub targets: u64,
}

/// A complete signed repository plus the collaborators an updater needs.
pub(crate) struct Fixture {
    pub keys: RoleKeys,
    pub versions: Versions,
    pub consistent_snapshot: bool,
    pub expires: DateTime<Utc>,
    pub files: Vec<(String, Vec<u8>)>,
    pub delegates: Vec<Delegate>,
    pub fetcher: Arc<MockFetcher>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<FixedClock>,
    pub bootstrap_root: Vec<u8>,
}

impl Fixture {
    pub fn new() -> Self {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut fixture = Self {
            keys: RoleKeys {
                root: TestKey::ed25519(1),
                timestamp: TestKey::ed25519(2),
                snapshot: TestKey::ed25519(3),
                targets: TestKey::ed25519(4),
            },
            versions: Versions {
                root: 1,
                timestamp: 1,
                snapshot: 1,
                targets: 1,
            },
            consistent_snapshot: true,
            expires: now + Duration::days(365),
            files: vec![("/a/b.bin".to_string(), b"0123456789".to_vec())],
            delegates: Vec::new(),
            fetcher: Arc::new(MockFetcher::default()),
            cache: Arc::new(MemoryCache::new()),
            clock: Arc::new(FixedClock::new(now)),
            bootstrap_root: Vec::new(),
        };
        fixture.bootstrap_root = fixture.root_bytes(1);
        fixture
    }

    pub fn root_doc(&self, version: u64) -> Value {
        let mut keys = serde_json::Map::new();
        let mut role = |key: &TestKey| {
            let keyid = key.keyid();
            keys.insert(keyid.as_str().to_string(), key.public_json());
            json!({ "keyids": [keyid.as_str()], "threshold": 1 })
        };
        let roles = json!({
            "root": role(&self.keys.root),
            "timestamp": role(&self.keys.timestamp),
            "snapshot": role(&self.keys.snapshot),
            "targets": role(&self.keys.targets),
        });
        json!({
            "_type": "root",
            "spec_version": "1.0.31",
            "version": version,
            "expires": rfc3339(self.expires),
            "consistent_snapshot": self.consistent_snapshot,
            "keys": keys,
            "roles": roles,
        })
    }

    /// Root `version` signed by the current root key.
    pub fn root_bytes(&self, version: u64) -> Vec<u8> {
        sign_document(&self.root_doc(version), &[&self.keys.root])
    }

    pub fn targets_doc(&self, role: &str, version: u64, files: &[(String, Vec<u8>)]) -> Value {
        let targets: serde_json::Map<String, Value> = files
            .iter()
            .map(|(path, bytes)| (path.clone(), file_meta(bytes)))
            .collect();
        let children: Vec<&Delegate> = self.delegates.iter().filter(|d| d.parent == role).collect();
        let mut doc = json!({
            "_type": "targets",
            "spec_version": "1.0.31",
            "version": version,
            "expires": rfc3339(self.expires),
            "targets": targets,
        });
        if !children.is_empty() {
            let keys: serde_json::Map<String, Value> = children
                .iter()
                .map(|d| (d.key.keyid().as_str().to_string(), d.key.public_json()))
                .collect();
            let roles: Vec<Value> = children
                .iter()
                .map(|d| {
                    json!({
                        "name": d.name,
                        "keyids": [d.key.keyid().as_str()],
                        "threshold": 1,
                        "paths": d.paths,
                        "terminating": d.terminating,
                    })
                })
                .collect();
            doc["delegations"] = json!({ "keys": keys, "roles": roles });
        }
        doc
    }

    pub fn snapshot_doc(&self, meta: &BTreeMap<String, Value>) -> Value {
        json!({
            "_type": "snapshot",
            "spec_version": "1.0.31",
            "version": self.versions.snapshot,
            "expires": rfc3339(self.expires),
            "meta": meta,
        })
    }

    pub fn timestamp_doc(&self, snapshot_bytes: &[u8]) -> Value {
        let mut pin = file_meta(snapshot_bytes);
        pin["version"] = json!(self.versions.snapshot);
        json!({
            "_type": "timestamp",
            "spec_version": "1.0.31",
            "version": self.versions.timestamp,
            "expires": rfc3339(self.expires),
            "meta": { "snapshot.json": pin },
        })
    }

    fn versioned(&self, version: u64, role: &str) -> String {
        if self.consistent_snapshot {
            format!("{version}.{role}.json")
        } else {
            format!("{role}.json")
        }
    }

    /// Signs and publishes roots `1..=versions.root`, then the current
    /// targets, delegates, snapshot and timestamp.
    pub fn publish_repository(&mut self) {
        for version in 1..=self.versions.root {
            if self
                .fetcher
                .metadata(&format!("{version}.root.json"))
                .is_none()
            {
                self.fetcher
                    .put_metadata(&format!("{version}.root.json"), self.root_bytes(version));
            }
        }
        self.publish_top_level();
    }

    /// Publishes targets, delegates, snapshot and timestamp at the current
    /// versions, leaving roots untouched.
    pub fn publish_top_level(&self) {
        let mut meta = BTreeMap::new();

        let targets = sign_document(
            &self.targets_doc("targets", self.versions.targets, &self.files),
            &[&self.keys.targets],
        );
        meta.insert("targets.json".to_string(), json!({ "version": self.versions.targets }));
        self.fetcher
            .put_metadata(&self.versioned(self.versions.targets, "targets"), targets);

        for delegate in &self.delegates {
            let bytes = sign_document(
                &self.targets_doc(&delegate.name, delegate.version, &delegate.files),
                &[&delegate.key],
            );
            let mut pin = file_meta(&bytes);
            pin["version"] = json!(delegate.version);
            meta.insert(format!("{}.json", delegate.name), pin);
            self.fetcher
                .put_metadata(&self.versioned(delegate.version, &delegate.name), bytes);
        }

        for (path, bytes) in self.files.iter().chain(self.delegates.iter().flat_map(|d| d.files.iter())) {
            let name = if self.consistent_snapshot {
                match path.rsplit_once('/') {
                    Some((dir, base)) => format!("{dir}/{}.{base}", sha256_hex(bytes)),
                    None => format!("{}.{path}", sha256_hex(bytes)),
                }
            } else {
                path.clone()
            };
            self.fetcher
                .put_target(&format!("targets/{}", name.trim_start_matches('/')), bytes.clone());
        }

        let snapshot = sign_document(&self.snapshot_doc(&meta), &[&self.keys.snapshot]);
        self.fetcher
            .put_metadata(&self.versioned(self.versions.snapshot, "snapshot"), snapshot.clone());

        let timestamp = sign_document(&self.timestamp_doc(&snapshot), &[&self.keys.timestamp]);
        self.fetcher.put_metadata("timestamp.json", timestamp);
    }

    /// Bytes currently published under `name`.
    pub fn metadata(&self, name: &str) -> Vec<u8> {
        self.fetcher.metadata(name).unwrap()
    }

    pub fn updater(&self) -> Updater {
        self.updater_with(crate::config::UpdaterConfig::default())
    }

    pub fn updater_with(&self, config: crate::config::UpdaterConfig) -> Updater {
        Updater::builder(self.bootstrap_root.clone(), self.fetcher.clone())
            .config(config)
            .cache(self.cache.clone())
            .clock(self.clock.clone())
            .build()
            .unwrap()
    }
}
