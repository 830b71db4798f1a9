//! Typed in-memory representation of TUF metadata.
//!
//! Every document kind the protocol knows about (root, timestamp, snapshot,
//! targets) has a plain data struct here. Values are produced by the
//! [`parser`](crate::parser) and never mutated afterwards; the updater only
//! reads them. Keys are owned by the document that declares them and roles
//! refer to them by [`KeyId`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde_json::Value;

use crate::crypto::sha256_hex;

/// Role name of the root metadata.
pub const ROOT_ROLE: &str = "root";
/// Role name of the timestamp metadata.
pub const TIMESTAMP_ROLE: &str = "timestamp";
/// Role name of the snapshot metadata.
pub const SNAPSHOT_ROLE: &str = "snapshot";
/// Role name of the top-level targets metadata.
pub const TARGETS_ROLE: &str = "targets";

/// Algorithm name → lowercase hex digest.
pub type Hashes = BTreeMap<String, String>;

/// The closed set of metadata kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataKind {
    Root,
    Timestamp,
    Snapshot,
    Targets,
}

impl MetadataKind {
    /// Value of the `_type` field for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKind::Root => ROOT_ROLE,
            MetadataKind::Timestamp => TIMESTAMP_ROLE,
            MetadataKind::Snapshot => SNAPSHOT_ROLE,
            MetadataKind::Targets => TARGETS_ROLE,
        }
    }

    /// Parses a `_type` value.
    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            ROOT_ROLE => Some(MetadataKind::Root),
            TIMESTAMP_ROLE => Some(MetadataKind::Timestamp),
            SNAPSHOT_ROLE => Some(MetadataKind::Snapshot),
            TARGETS_ROLE => Some(MetadataKind::Targets),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` when `name` is one of the four top-level role names.
pub fn is_top_level_role(name: &str) -> bool {
    MetadataKind::from_type(name).is_some()
}

/// Content-derived key identifier, as written in the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Signature schemes understood by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScheme {
    /// `ed25519`, hex-encoded 32-byte public key.
    Ed25519,
    /// `ecdsa-sha2-nistp256`, PEM SubjectPublicKeyInfo, DER signatures.
    EcdsaP256Sha256,
    /// `rsassa-pss-sha256`, PEM SubjectPublicKeyInfo.
    RsaPssSha256,
    /// Any other scheme. Kept so documents listing foreign keys still parse;
    /// signatures from such keys never verify.
    Unsupported(String),
}

impl KeyScheme {
    pub fn from_name(name: &str) -> Self {
        match name {
            "ed25519" => KeyScheme::Ed25519,
            "ecdsa-sha2-nistp256" => KeyScheme::EcdsaP256Sha256,
            "rsassa-pss-sha256" => KeyScheme::RsaPssSha256,
            other => KeyScheme::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyScheme::Ed25519 => "ed25519",
            KeyScheme::EcdsaP256Sha256 => "ecdsa-sha2-nistp256",
            KeyScheme::RsaPssSha256 => "rsassa-pss-sha256",
            KeyScheme::Unsupported(name) => name,
        }
    }

    /// Returns whether `keytype` is a legal pairing for this scheme.
    pub fn accepts_keytype(&self, keytype: &str) -> bool {
        match self {
            KeyScheme::Ed25519 => keytype == "ed25519",
            KeyScheme::EcdsaP256Sha256 => keytype == "ecdsa" || keytype == "ecdsa-sha2-nistp256",
            KeyScheme::RsaPssSha256 => keytype == "rsa",
            KeyScheme::Unsupported(_) => true,
        }
    }
}

/// A public key declared by a root or targets document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Identifier under which the declaring document lists this key.
    pub keyid: KeyId,
    /// Declared `keytype` (e.g. `ed25519`, `ecdsa`, `rsa`).
    pub keytype: String,
    /// Declared signature scheme.
    pub scheme: KeyScheme,
    /// `keyval.public` exactly as written in the document.
    pub public: String,
    /// Decoded key material in the form the verifier consumes (raw Ed25519
    /// bytes, uncompressed EC point, or PKCS#1 RSA public key).
    pub material: Vec<u8>,
}

/// A signature over one document's signed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub keyid: KeyId,
    pub sig: Vec<u8>,
}

/// A set of keys and the number of them required to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub keyids: BTreeSet<KeyId>,
    /// Always at least 1 and at most `keyids.len()`.
    pub threshold: u64,
}

/// Roles declared by the root document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRoles {
    pub root: Role,
    pub timestamp: Role,
    pub snapshot: Role,
    pub targets: Role,
}

impl RootRoles {
    pub fn get(&self, kind: MetadataKind) -> &Role {
        match kind {
            MetadataKind::Root => &self.root,
            MetadataKind::Timestamp => &self.timestamp,
            MetadataKind::Snapshot => &self.snapshot,
            MetadataKind::Targets => &self.targets,
        }
    }
}

/// Length and hashes of a target file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub length: u64,
    /// Never empty.
    pub hashes: Hashes,
    pub custom: Option<Value>,
}

/// Description of a metadata file as pinned by timestamp or snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFile {
    pub version: u64,
    pub length: Option<u64>,
    /// May be empty for snapshot entries; timestamp entries always carry at
    /// least one hash.
    pub hashes: Hashes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<KeyId, Key>,
    pub roles: RootRoles,
}

impl Root {
    pub fn role(&self, kind: MetadataKind) -> &Role {
        self.roles.get(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Pin for `snapshot.json`.
    pub snapshot: MetaFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    /// Metadata filename (`targets.json`, `<role>.json`) → pin.
    pub meta: BTreeMap<String, MetaFile>,
}

impl Snapshot {
    /// Returns the pin recorded for a targets role.
    pub fn role_pin(&self, role: &str) -> Option<&MetaFile> {
        self.meta.get(&role_file_name(role))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, FileInfo>,
    pub delegations: Option<Delegations>,
}

/// Delegation table of a targets document.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegations {
    /// Keys usable by the delegated roles; they do not live in root.
    pub keys: BTreeMap<KeyId, Key>,
    /// Ordered by priority: earlier entries are searched first.
    pub roles: Vec<DelegatedRole>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelegatedRole {
    pub role: Role,
    pub paths: PathMatcher,
    pub terminating: bool,
}

impl DelegatedRole {
    pub fn name(&self) -> &str {
        &self.role.name
    }

    pub fn matches(&self, target_path: &str) -> bool {
        self.paths.matches(target_path)
    }
}

/// Which target paths a delegated role is trusted for.
#[derive(Debug, Clone, PartialEq)]
pub enum PathMatcher {
    Paths(Vec<PathPattern>),
    /// Lowercase hex prefixes of the SHA-256 of the target path.
    HashPrefixes(Vec<String>),
}

impl PathMatcher {
    pub fn matches(&self, target_path: &str) -> bool {
        match self {
            PathMatcher::Paths(patterns) => patterns.iter().any(|p| p.matches(target_path)),
            PathMatcher::HashPrefixes(prefixes) => {
                let digest = sha256_hex(target_path.as_bytes());
                prefixes.iter().any(|prefix| digest.starts_with(prefix.as_str()))
            }
        }
    }
}

/// Shell-style path pattern; `*` may span `/` as with `fnmatch`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, target_path: &str) -> bool {
        self.matcher.is_match(target_path)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Shared accessors over the four metadata kinds.
pub trait Metadata: Sized {
    const KIND: MetadataKind;

    fn version(&self) -> u64;
    fn expires(&self) -> DateTime<Utc>;
    fn spec_version(&self) -> &str;

    /// Extracts this kind from the sum type, handing the value back otherwise.
    fn from_signed(signed: SignedMetadata) -> Result<Self, SignedMetadata>;
}

macro_rules! impl_metadata {
    ($ty:ident, $kind:ident) => {
        impl Metadata for $ty {
            const KIND: MetadataKind = MetadataKind::$kind;

            fn version(&self) -> u64 {
                self.version
            }

            fn expires(&self) -> DateTime<Utc> {
                self.expires
            }

            fn spec_version(&self) -> &str {
                &self.spec_version
            }

            fn from_signed(signed: SignedMetadata) -> Result<Self, SignedMetadata> {
                match signed {
                    SignedMetadata::$kind(value) => Ok(value),
                    other => Err(other),
                }
            }
        }
    };
}

impl_metadata!(Root, Root);
impl_metadata!(Timestamp, Timestamp);
impl_metadata!(Snapshot, Snapshot);
impl_metadata!(Targets, Targets);

/// Any signed metadata document.
#[derive(Debug, Clone, PartialEq)]
pub enum SignedMetadata {
    Root(Root),
    Timestamp(Timestamp),
    Snapshot(Snapshot),
    Targets(Targets),
}

impl SignedMetadata {
    pub fn kind(&self) -> MetadataKind {
        match self {
            SignedMetadata::Root(_) => MetadataKind::Root,
            SignedMetadata::Timestamp(_) => MetadataKind::Timestamp,
            SignedMetadata::Snapshot(_) => MetadataKind::Snapshot,
            SignedMetadata::Targets(_) => MetadataKind::Targets,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            SignedMetadata::Root(m) => m.version,
            SignedMetadata::Timestamp(m) => m.version,
            SignedMetadata::Snapshot(m) => m.version,
            SignedMetadata::Targets(m) => m.version,
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        match self {
            SignedMetadata::Root(m) => m.expires,
            SignedMetadata::Timestamp(m) => m.expires,
            SignedMetadata::Snapshot(m) => m.expires,
            SignedMetadata::Targets(m) => m.expires,
        }
    }
}

/// A parsed document together with its signatures and signed bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub signed: T,
    /// In document order.
    pub signatures: Vec<Signature>,
    /// Bytes the signatures are checked against.
    pub payload: Vec<u8>,
    /// The whole document as received, used for hashing and caching.
    pub raw: Vec<u8>,
}

impl<T: Metadata> Envelope<T> {
    pub fn version(&self) -> u64 {
        self.signed.version()
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.signed.expires()
    }

    /// `expires <= now` counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.signed.expires() <= now
    }
}

/// File name under which a role's metadata is published (`<role>.json`).
pub fn role_file_name(role: &str) -> String {
    format!("{role}.json")
}
