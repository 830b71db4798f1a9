//! Updater limits and environment-driven overrides.
//!
//! Every knob has a safe default; embedders usually only touch the signing
//! payload mode when talking to repositories that pretty-print metadata.

use std::collections::HashMap;
use std::env;

/// Environment variable capping root rotations per refresh.
const ENV_MAX_ROOT_ROTATIONS: &str = "TUF_CLIENT_MAX_ROOT_ROTATIONS";
/// Environment variable capping the delegation search depth.
const ENV_MAX_DELEGATION_DEPTH: &str = "TUF_CLIENT_MAX_DELEGATION_DEPTH";
/// Length caps for metadata fetched without a pin.
const ENV_MAX_ROOT_LENGTH: &str = "TUF_CLIENT_MAX_ROOT_LENGTH";
const ENV_MAX_TIMESTAMP_LENGTH: &str = "TUF_CLIENT_MAX_TIMESTAMP_LENGTH";
const ENV_MAX_SNAPSHOT_LENGTH: &str = "TUF_CLIENT_MAX_SNAPSHOT_LENGTH";
const ENV_MAX_TARGETS_LENGTH: &str = "TUF_CLIENT_MAX_TARGETS_LENGTH";
/// `exact` or `canonical`.
const ENV_SIGNING_PAYLOAD: &str = "TUF_CLIENT_SIGNING_PAYLOAD";
/// Toggles `<hash>.<name>` target filenames under consistent snapshots.
const ENV_PREFIX_TARGETS_WITH_HASH: &str = "TUF_CLIENT_PREFIX_TARGETS_WITH_HASH";

pub const DEFAULT_MAX_ROOT_ROTATIONS: u32 = 32;
pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 5;
pub const DEFAULT_MAX_ROOT_LENGTH: u64 = 512_000;
pub const DEFAULT_MAX_TIMESTAMP_LENGTH: u64 = 16_384;
pub const DEFAULT_MAX_SNAPSHOT_LENGTH: u64 = 2_000_000;
pub const DEFAULT_MAX_TARGETS_LENGTH: u64 = 5_000_000;

/// How the bytes covered by signatures are derived from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningPayload {
    /// The `signed` value exactly as it appears in the fetched bytes.
    #[default]
    ExactBytes,
    /// The `signed` value re-encoded as OLPC canonical JSON, for repositories
    /// that sign canonical bytes but publish pretty-printed documents.
    CanonicalJson,
}

impl SigningPayload {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" | "exact_bytes" => Some(SigningPayload::ExactBytes),
            "canonical" | "canonical_json" | "cjson" => Some(SigningPayload::CanonicalJson),
            _ => None,
        }
    }
}

/// Limits applied by the [`Updater`](crate::updater::Updater).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Maximum root versions accepted in one refresh.
    pub max_root_rotations: u32,
    /// Maximum nesting below top-level targets during target resolution.
    pub max_delegation_depth: usize,
    /// Upper bound for root documents.
    pub max_root_length: u64,
    /// Upper bound for timestamp documents.
    pub max_timestamp_length: u64,
    /// Upper bound for snapshot when timestamp omits its length.
    pub max_snapshot_length: u64,
    /// Upper bound for targets documents when snapshot omits their length.
    pub max_targets_length: u64,
    pub signing_payload: SigningPayload,
    /// Request targets as `<dir>/<hash>.<name>` when root enables
    /// consistent snapshots.
    pub prefix_targets_with_hash: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_root_rotations: DEFAULT_MAX_ROOT_ROTATIONS,
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            max_root_length: DEFAULT_MAX_ROOT_LENGTH,
            max_timestamp_length: DEFAULT_MAX_TIMESTAMP_LENGTH,
            max_snapshot_length: DEFAULT_MAX_SNAPSHOT_LENGTH,
            max_targets_length: DEFAULT_MAX_TARGETS_LENGTH,
            signing_payload: SigningPayload::default(),
            prefix_targets_with_hash: true,
        }
    }
}

impl UpdaterConfig {
    /// Builds a configuration from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds a configuration from key/value pairs, ignoring unparsable values.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).map(String::as_str);
        let defaults = Self::default();

        Self {
            max_root_rotations: parse_number(get(ENV_MAX_ROOT_ROTATIONS))
                .unwrap_or(defaults.max_root_rotations),
            max_delegation_depth: parse_number(get(ENV_MAX_DELEGATION_DEPTH))
                .unwrap_or(defaults.max_delegation_depth),
            max_root_length: parse_length(get(ENV_MAX_ROOT_LENGTH))
                .unwrap_or(defaults.max_root_length),
            max_timestamp_length: parse_length(get(ENV_MAX_TIMESTAMP_LENGTH))
                .unwrap_or(defaults.max_timestamp_length),
            max_snapshot_length: parse_length(get(ENV_MAX_SNAPSHOT_LENGTH))
                .unwrap_or(defaults.max_snapshot_length),
            max_targets_length: parse_length(get(ENV_MAX_TARGETS_LENGTH))
                .unwrap_or(defaults.max_targets_length),
            signing_payload: get(ENV_SIGNING_PAYLOAD)
                .and_then(SigningPayload::parse)
                .unwrap_or(defaults.signing_payload),
            prefix_targets_with_hash: parse_bool(
                get(ENV_PREFIX_TARGETS_WITH_HASH),
                defaults.prefix_targets_with_hash,
            ),
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Lengths of zero would reject every document.
fn parse_length(value: Option<&str>) -> Option<u64> {
    parse_number::<u64>(value).filter(|length| *length > 0)
}

/// Parses boolean values from strings, falling back to the provided default.
pub(crate) fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
