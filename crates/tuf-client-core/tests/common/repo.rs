// Signed repository fixtures for integration tests.
//
// Every role is signed by a deterministic Ed25519 key so tests can rebuild or
// tamper with individual documents without touching key material.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Value};
use tuf_client_core::crypto::{canonical_json, key_id_for, sha256_hex};

/// Ed25519 signer with its TUF public representation.
pub struct Signer {
    pair: Ed25519KeyPair,
    keyid: String,
}

impl Signer {
    pub fn from_seed(seed: u8) -> Self {
        let pair = Ed25519KeyPair::from_seed_unchecked(&[seed; 32]).expect("seed is 32 bytes");
        let keyid = key_id_for("ed25519", "ed25519", &hex::encode(pair.public_key().as_ref()))
            .expect("key id")
            .as_str()
            .to_string();
        Self { pair, keyid }
    }

    pub fn keyid(&self) -> &str {
        &self.keyid
    }

    pub fn public_json(&self) -> Value {
        json!({
            "keytype": "ed25519",
            "scheme": "ed25519",
            "keyval": { "public": hex::encode(self.pair.public_key().as_ref()) },
        })
    }

    /// Wraps `signed` in an envelope carrying this key's signature over the
    /// canonical encoding.
    pub fn sign(&self, signed: &Value) -> Vec<u8> {
        let payload = canonical_json(signed).expect("canonical encoding");
        let sig = self.pair.sign(&payload);
        let envelope = json!({
            "signatures": [{ "keyid": self.keyid, "sig": hex::encode(sig.as_ref()) }],
            "signed": signed,
        });
        canonical_json(&envelope).expect("canonical encoding")
    }
}

/// A target file and the bytes served for it.
pub struct TargetFile {
    pub path: &'static str,
    pub bytes: &'static [u8],
}

/// Files of one published repository state, keyed by repository path
/// (`metadata/...` or `targets/...`).
pub struct Repository {
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Builds a consistent-snapshot repository at `version` for every role,
/// with roots `1..=version` and one delegated role `tools` for `/tools/*`.
pub fn build_repository(
    version: u64,
    expires: DateTime<Utc>,
    targets: &[TargetFile],
    delegated: &[TargetFile],
) -> Repository {
    let root_key = Signer::from_seed(1);
    let online = Signer::from_seed(2);
    let tools = Signer::from_seed(3);
    let expires = expires.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let mut files = BTreeMap::new();

    for root_version in 1..=version {
        let root = json!({
            "_type": "root",
            "spec_version": "1.0.31",
            "version": root_version,
            "expires": expires,
            "consistent_snapshot": true,
            "keys": {
                root_key.keyid(): root_key.public_json(),
                online.keyid(): online.public_json(),
            },
            "roles": {
                "root": { "keyids": [root_key.keyid()], "threshold": 1 },
                "timestamp": { "keyids": [online.keyid()], "threshold": 1 },
                "snapshot": { "keyids": [online.keyid()], "threshold": 1 },
                "targets": { "keyids": [online.keyid()], "threshold": 1 },
            },
        });
        files.insert(
            format!("metadata/{root_version}.root.json"),
            root_key.sign(&root),
        );
    }

    let mut listing = |entries: &[TargetFile]| -> Value {
        let mut map = serde_json::Map::new();
        for entry in entries {
            map.insert(entry.path.to_string(), file_meta(entry.bytes));
            let (dir, name) = entry.path.rsplit_once('/').unwrap_or(("", entry.path));
            files.insert(
                format!("targets{dir}/{}.{name}", sha256_hex(entry.bytes)),
                entry.bytes.to_vec(),
            );
        }
        Value::Object(map)
    };
    let top_listing = listing(targets);
    let tools_listing = listing(delegated);

    let tools_doc = tools.sign(&json!({
        "_type": "targets",
        "spec_version": "1.0.31",
        "version": version,
        "expires": expires,
        "targets": tools_listing,
    }));
    let targets_doc = online.sign(&json!({
        "_type": "targets",
        "spec_version": "1.0.31",
        "version": version,
        "expires": expires,
        "targets": top_listing,
        "delegations": {
            "keys": { tools.keyid(): tools.public_json() },
            "roles": [{
                "name": "tools",
                "keyids": [tools.keyid()],
                "threshold": 1,
                "paths": ["/tools/*"],
                "terminating": true,
            }],
        },
    }));

    let mut tools_pin = file_meta(&tools_doc);
    tools_pin["version"] = json!(version);
    let snapshot_doc = online.sign(&json!({
        "_type": "snapshot",
        "spec_version": "1.0.31",
        "version": version,
        "expires": expires,
        "meta": {
            "targets.json": { "version": version },
            "tools.json": tools_pin,
        },
    }));

    let mut snapshot_pin = file_meta(&snapshot_doc);
    snapshot_pin["version"] = json!(version);
    let timestamp_doc = online.sign(&json!({
        "_type": "timestamp",
        "spec_version": "1.0.31",
        "version": version,
        "expires": expires,
        "meta": { "snapshot.json": snapshot_pin },
    }));

    files.insert(format!("metadata/{version}.tools.json"), tools_doc);
    files.insert(format!("metadata/{version}.targets.json"), targets_doc);
    files.insert(format!("metadata/{version}.snapshot.json"), snapshot_doc);
    files.insert("metadata/timestamp.json".to_string(), timestamp_doc);
    Repository { files }
}

fn file_meta(bytes: &[u8]) -> Value {
    json!({ "length": bytes.len(), "hashes": { "sha256": sha256_hex(bytes) } })
}
