//! Bytes → typed metadata.
//!
//! The envelope is split with serde so the exact `signed` span survives, then
//! the signed body is walked by hand. Every error carries the JSON pointer of
//! the offending field.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::SigningPayload;
use crate::crypto;
use crate::metadata::{
    is_top_level_role, role_file_name, DelegatedRole, Delegations, Envelope, FileInfo, Hashes,
    Key, KeyId, KeyScheme, MetaFile, Metadata, MetadataKind, PathMatcher, PathPattern, Role,
    Root, RootRoles, Signature, SignedMetadata, Snapshot, Targets, Timestamp, SNAPSHOT_ROLE,
    TARGETS_ROLE,
};

/// Major version of the metadata format this client understands.
pub const SUPPORTED_SPEC_MAJOR: u64 = 1;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document is not valid utf-8")]
    Utf8,
    #[error("missing required field {0}")]
    MissingField(String),
    #[error("field {path} must be {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
    },
    #[error("field {path} is out of range: {reason}")]
    OutOfDomain { path: String, reason: String },
    #[error("unknown metadata type {0:?}")]
    UnknownKind(String),
    #[error("expected {expected} metadata, found {found}")]
    KindMismatch {
        expected: MetadataKind,
        found: MetadataKind,
    },
    #[error("unsupported spec_version {0:?}")]
    UnsupportedSpecVersion(String),
}

type Result<T> = std::result::Result<T, ParseError>;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope<'a> {
    #[serde(borrow)]
    signed: &'a RawValue,
    signatures: Value,
}

/// Parses metadata documents. The only knob is how the signed payload is
/// derived from the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser {
    payload: SigningPayload,
}

impl Parser {
    pub fn new(payload: SigningPayload) -> Self {
        Self { payload }
    }

    /// Parses a document whose kind is known in advance.
    pub fn parse<T: Metadata>(&self, bytes: &[u8]) -> Result<Envelope<T>> {
        let envelope = self.parse_with(bytes, Some(T::KIND))?;
        let found = envelope.signed.kind();
        match T::from_signed(envelope.signed) {
            Ok(signed) => Ok(Envelope {
                signed,
                signatures: envelope.signatures,
                payload: envelope.payload,
                raw: envelope.raw,
            }),
            Err(_) => Err(ParseError::KindMismatch {
                expected: T::KIND,
                found,
            }),
        }
    }

    /// Parses a document of any kind, dispatching on `_type`.
    pub fn parse_any(&self, bytes: &[u8]) -> Result<Envelope<SignedMetadata>> {
        self.parse_with(bytes, None)
    }

    fn parse_with(
        &self,
        bytes: &[u8],
        expected: Option<MetadataKind>,
    ) -> Result<Envelope<SignedMetadata>> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Utf8)?;
        let raw: RawEnvelope<'_> = serde_json::from_str(text)?;
        let signed_value: Value = serde_json::from_str(raw.signed.get())?;

        let signed_node = Node::new(&signed_value, "/signed".to_string());
        let signed_object = signed_node.object()?;
        let type_name = signed_object.required("_type")?.str()?;
        let kind = MetadataKind::from_type(type_name)
            .ok_or_else(|| ParseError::UnknownKind(type_name.to_string()))?;
        if let Some(expected) = expected {
            if expected != kind {
                return Err(ParseError::KindMismatch {
                    expected,
                    found: kind,
                });
            }
        }

        let signed = match kind {
            MetadataKind::Root => SignedMetadata::Root(read_root(&signed_object)?),
            MetadataKind::Timestamp => SignedMetadata::Timestamp(read_timestamp(&signed_object)?),
            MetadataKind::Snapshot => SignedMetadata::Snapshot(read_snapshot(&signed_object)?),
            MetadataKind::Targets => SignedMetadata::Targets(read_targets(&signed_object)?),
        };
        let signatures = read_signatures(&Node::new(&raw.signatures, "/signatures".to_string()))?;

        let payload = match self.payload {
            SigningPayload::ExactBytes => raw.signed.get().as_bytes().to_vec(),
            SigningPayload::CanonicalJson => crypto::canonical_json(&signed_value)?,
        };

        Ok(Envelope {
            signed,
            signatures,
            payload,
            raw: bytes.to_vec(),
        })
    }
}

/// A JSON value together with its pointer inside the document.
struct Node<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> Node<'a> {
    fn new(value: &'a Value, path: String) -> Self {
        Self { value, path }
    }

    fn wrong_type(&self, expected: &'static str) -> ParseError {
        ParseError::WrongType {
            path: self.path.clone(),
            expected,
        }
    }

    fn out_of_domain(&self, reason: impl Into<String>) -> ParseError {
        ParseError::OutOfDomain {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn object(&self) -> Result<ObjectNode<'a>> {
        match self.value {
            Value::Object(map) => Ok(ObjectNode {
                map,
                path: self.path.clone(),
            }),
            _ => Err(self.wrong_type("an object")),
        }
    }

    fn array(&self) -> Result<Vec<Node<'a>>> {
        match self.value {
            Value::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(index, item)| Node::new(item, format!("{}/{index}", self.path)))
                .collect()),
            _ => Err(self.wrong_type("an array")),
        }
    }

    fn str(&self) -> Result<&'a str> {
        self.value.as_str().ok_or_else(|| self.wrong_type("a string"))
    }

    fn bool(&self) -> Result<bool> {
        self.value.as_bool().ok_or_else(|| self.wrong_type("a boolean"))
    }

    fn u64(&self) -> Result<u64> {
        match self.value {
            Value::Number(number) => {
                if let Some(value) = number.as_u64() {
                    Ok(value)
                } else if number.as_i64().is_some() {
                    Err(self.out_of_domain("must not be negative"))
                } else {
                    Err(self.wrong_type("an integer"))
                }
            }
            _ => Err(self.wrong_type("an integer")),
        }
    }

    fn positive(&self) -> Result<u64> {
        match self.u64()? {
            0 => Err(self.out_of_domain("must be at least 1")),
            value => Ok(value),
        }
    }

    fn datetime(&self) -> Result<DateTime<Utc>> {
        let text = self.str()?;
        DateTime::parse_from_rfc3339(text)
            .map(|value| value.with_timezone(&Utc))
            .map_err(|err| self.out_of_domain(format!("invalid timestamp {text:?}: {err}")))
    }

    fn strings(&self) -> Result<Vec<&'a str>> {
        self.array()?.iter().map(Node::str).collect()
    }
}

struct ObjectNode<'a> {
    map: &'a Map<String, Value>,
    path: String,
}

impl<'a> ObjectNode<'a> {
    fn child_path(&self, key: &str) -> String {
        // JSON pointer escaping.
        let escaped = key.replace('~', "~0").replace('/', "~1");
        format!("{}/{escaped}", self.path)
    }

    fn required(&self, key: &str) -> Result<Node<'a>> {
        self.optional(key)
            .ok_or_else(|| ParseError::MissingField(self.child_path(key)))
    }

    fn optional(&self, key: &str) -> Option<Node<'a>> {
        self.map
            .get(key)
            .map(|value| Node::new(value, self.child_path(key)))
    }

    fn entries(&self) -> impl Iterator<Item = (&'a String, Node<'a>)> + '_ {
        self.map
            .iter()
            .map(move |(key, value)| (key, Node::new(value, self.child_path(key))))
    }
}

struct Common {
    spec_version: String,
    version: u64,
    expires: DateTime<Utc>,
}

fn read_common(signed: &ObjectNode<'_>) -> Result<Common> {
    let spec_node = signed.required("spec_version")?;
    let spec_version = spec_node.str()?;
    let major = spec_version
        .split('.')
        .next()
        .and_then(|major| major.parse::<u64>().ok());
    if major != Some(SUPPORTED_SPEC_MAJOR) {
        return Err(ParseError::UnsupportedSpecVersion(spec_version.to_string()));
    }
    Ok(Common {
        spec_version: spec_version.to_string(),
        version: signed.required("version")?.positive()?,
        expires: signed.required("expires")?.datetime()?,
    })
}

fn read_root(signed: &ObjectNode<'_>) -> Result<Root> {
    let common = read_common(signed)?;
    let consistent_snapshot = signed.required("consistent_snapshot")?.bool()?;
    let keys = read_keys(&signed.required("keys")?)?;

    let roles_node = signed.required("roles")?;
    let roles = roles_node.object()?;
    let read = |name: &str| -> Result<Role> {
        let node = roles.required(name)?;
        let role = read_role(name, &node.object()?)?;
        if let Some(missing) = role.keyids.iter().find(|keyid| !keys.contains_key(*keyid)) {
            return Err(node.out_of_domain(format!("keyid {missing} is not in the key table")));
        }
        Ok(role)
    };
    let roles = RootRoles {
        root: read("root")?,
        timestamp: read("timestamp")?,
        snapshot: read("snapshot")?,
        targets: read("targets")?,
    };

    Ok(Root {
        spec_version: common.spec_version,
        version: common.version,
        expires: common.expires,
        consistent_snapshot,
        keys,
        roles,
    })
}

fn read_timestamp(signed: &ObjectNode<'_>) -> Result<Timestamp> {
    let common = read_common(signed)?;
    let meta = signed.required("meta")?.object()?;
    let pin_node = meta.required(&role_file_name(SNAPSHOT_ROLE))?;
    let snapshot = read_meta_file(&pin_node)?;
    if snapshot.length.is_none() {
        return Err(ParseError::MissingField(format!("{}/length", pin_node.path)));
    }
    if snapshot.hashes.is_empty() {
        return Err(ParseError::MissingField(format!("{}/hashes", pin_node.path)));
    }
    Ok(Timestamp {
        spec_version: common.spec_version,
        version: common.version,
        expires: common.expires,
        snapshot,
    })
}

fn read_snapshot(signed: &ObjectNode<'_>) -> Result<Snapshot> {
    let common = read_common(signed)?;
    let meta_node = signed.required("meta")?;
    let meta_object = meta_node.object()?;
    let mut meta = BTreeMap::new();
    for (name, node) in meta_object.entries() {
        meta.insert(name.clone(), read_meta_file(&node)?);
    }
    let targets_file = role_file_name(TARGETS_ROLE);
    if !meta.contains_key(&targets_file) {
        return Err(ParseError::MissingField(meta_object.child_path(&targets_file)));
    }
    Ok(Snapshot {
        spec_version: common.spec_version,
        version: common.version,
        expires: common.expires,
        meta,
    })
}

fn read_targets(signed: &ObjectNode<'_>) -> Result<Targets> {
    let common = read_common(signed)?;
    let targets_object = signed.required("targets")?.object()?;
    let mut targets = BTreeMap::new();
    for (path, node) in targets_object.entries() {
        targets.insert(path.clone(), read_file_info(&node)?);
    }
    let delegations = signed
        .optional("delegations")
        .map(|node| read_delegations(&node))
        .transpose()?;
    Ok(Targets {
        spec_version: common.spec_version,
        version: common.version,
        expires: common.expires,
        targets,
        delegations,
    })
}

fn read_keys(node: &Node<'_>) -> Result<BTreeMap<KeyId, Key>> {
    let object = node.object()?;
    let mut keys = BTreeMap::new();
    for (keyid, key_node) in object.entries() {
        let key = read_key(KeyId::new(keyid.as_str()), &key_node)?;
        keys.insert(key.keyid.clone(), key);
    }
    Ok(keys)
}

fn read_key(keyid: KeyId, node: &Node<'_>) -> Result<Key> {
    let object = node.object()?;
    let derived = crypto::key_id_of(node.value)?;
    if !derived.as_str().eq_ignore_ascii_case(keyid.as_str()) {
        return Err(node.out_of_domain(format!(
            "keyid {keyid} does not match the key, expected {derived}"
        )));
    }
    let keytype = object.required("keytype")?.str()?;
    let scheme_node = object.required("scheme")?;
    let scheme = KeyScheme::from_name(scheme_node.str()?);
    if !scheme.accepts_keytype(keytype) {
        return Err(scheme_node.out_of_domain(format!(
            "scheme {} cannot be used with keytype {keytype}",
            scheme.as_str()
        )));
    }
    let public_node = object.required("keyval")?.object()?.required("public")?;
    let public = public_node.str()?;
    let material = crypto::decode_public_key(&scheme, public)
        .map_err(|err| public_node.out_of_domain(err.to_string()))?;
    Ok(Key {
        keyid,
        keytype: keytype.to_string(),
        scheme,
        public: public.to_string(),
        material,
    })
}

fn read_role(name: &str, object: &ObjectNode<'_>) -> Result<Role> {
    let keyids_node = object.required("keyids")?;
    let mut keyids = BTreeSet::new();
    for keyid in keyids_node.strings()? {
        if !keyids.insert(KeyId::new(keyid)) {
            return Err(keyids_node.out_of_domain(format!("duplicate keyid {keyid}")));
        }
    }
    let threshold_node = object.required("threshold")?;
    let threshold = threshold_node.positive()?;
    if threshold > keyids.len() as u64 {
        return Err(threshold_node.out_of_domain(format!(
            "threshold {threshold} exceeds {} keyids",
            keyids.len()
        )));
    }
    Ok(Role {
        name: name.to_string(),
        keyids,
        threshold,
    })
}

fn read_hashes(node: &Node<'_>) -> Result<Hashes> {
    let object = node.object()?;
    let mut hashes = Hashes::new();
    for (algorithm, digest_node) in object.entries() {
        let digest = digest_node.str()?;
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(digest_node.out_of_domain("digest must be hex"));
        }
        hashes.insert(algorithm.clone(), digest.to_ascii_lowercase());
    }
    Ok(hashes)
}

fn read_meta_file(node: &Node<'_>) -> Result<MetaFile> {
    let object = node.object()?;
    let length = object.optional("length").map(|n| n.u64()).transpose()?;
    let hashes = match object.optional("hashes") {
        Some(hashes_node) => {
            let hashes = read_hashes(&hashes_node)?;
            if hashes.is_empty() {
                return Err(hashes_node.out_of_domain("must list at least one hash"));
            }
            hashes
        }
        None => Hashes::new(),
    };
    Ok(MetaFile {
        version: object.required("version")?.positive()?,
        length,
        hashes,
    })
}

fn read_file_info(node: &Node<'_>) -> Result<FileInfo> {
    let object = node.object()?;
    let length = object.required("length")?.u64()?;
    let hashes_node = object.required("hashes")?;
    let hashes = read_hashes(&hashes_node)?;
    if hashes.is_empty() {
        return Err(hashes_node.out_of_domain("must list at least one hash"));
    }
    Ok(FileInfo {
        length,
        hashes,
        custom: object.optional("custom").map(|n| n.value.clone()),
    })
}

fn read_delegations(node: &Node<'_>) -> Result<Delegations> {
    let object = node.object()?;
    let keys = read_keys(&object.required("keys")?)?;
    let mut names = BTreeSet::new();
    let mut roles = Vec::new();
    for role_node in object.required("roles")?.array()? {
        let role_object = role_node.object()?;
        let name_node = role_object.required("name")?;
        let name = name_node.str()?;
        if name.is_empty() || is_top_level_role(name) {
            return Err(name_node.out_of_domain(format!("{name:?} is not a delegable role name")));
        }
        if !names.insert(name) {
            return Err(name_node.out_of_domain(format!("duplicate delegated role {name}")));
        }
        let role = read_role(name, &role_object)?;
        let terminating = role_object
            .optional("terminating")
            .map(|n| n.bool())
            .transpose()?
            .unwrap_or(false);

        let paths = match (
            role_object.optional("paths"),
            role_object.optional("path_hash_prefixes"),
        ) {
            (Some(paths), None) => {
                let mut patterns = Vec::new();
                for (index, pattern) in paths.strings()?.into_iter().enumerate() {
                    let pattern = PathPattern::new(pattern).map_err(|err| {
                        ParseError::OutOfDomain {
                            path: format!("{}/{index}", paths.path),
                            reason: err.to_string(),
                        }
                    })?;
                    patterns.push(pattern);
                }
                PathMatcher::Paths(patterns)
            }
            (None, Some(prefixes)) => {
                let mut values = Vec::new();
                for prefix in prefixes.strings()? {
                    if !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(prefixes.out_of_domain("hash prefixes must be hex"));
                    }
                    values.push(prefix.to_ascii_lowercase());
                }
                PathMatcher::HashPrefixes(values)
            }
            (Some(_), Some(_)) => {
                return Err(role_node.out_of_domain(
                    "paths and path_hash_prefixes are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(role_node.out_of_domain("one of paths or path_hash_prefixes is required"))
            }
        };

        roles.push(DelegatedRole {
            role,
            paths,
            terminating,
        });
    }
    Ok(Delegations { keys, roles })
}

fn read_signatures(node: &Node<'_>) -> Result<Vec<Signature>> {
    let mut signatures = Vec::new();
    for item in node.array()? {
        let object = item.object()?;
        let keyid = object.required("keyid")?.str()?;
        let sig_node = object.required("sig")?;
        let sig = hex::decode(sig_node.str()?)
            .map_err(|_| sig_node.out_of_domain("signature must be hex"))?;
        signatures.push(Signature {
            keyid: KeyId::new(keyid),
            sig,
        });
    }
    Ok(signatures)
}
