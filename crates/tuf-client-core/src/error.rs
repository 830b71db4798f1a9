//! Top-level error returned by the updater.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::CacheError;
use crate::fetch::FetchError;
use crate::parser::ParseError;
use crate::target::IntegrityFailure;

/// Coarse classification callers can branch on (retry, alert, give up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network trouble; retrying later may succeed.
    Transient,
    /// The repository served something that is not valid metadata.
    Malformed,
    /// Verification failed. Possibly an attack; do not trust the repository
    /// content until it is fixed.
    Security,
    /// The call was made in a state where it cannot succeed.
    Precondition,
    /// Local failure unrelated to the repository.
    Internal,
}

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("failed to fetch {file}: {source}")]
    Fetch {
        file: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },
    #[error("{file} exceeds the {limit} byte limit")]
    EndlessData { file: String, limit: u64 },
    #[error("{role} has {valid} valid signatures, threshold is {threshold}")]
    InsufficientSignatures {
        role: String,
        valid: u64,
        threshold: u64,
    },
    #[error("expected root version {expected}, found {found}")]
    RootVersionMismatch { expected: u64, found: u64 },
    #[error("root rotation limit of {limit} reached")]
    RootRotationLimitExceeded { limit: u32 },
    #[error("{role} version {presented} is older than trusted version {trusted}")]
    RollbackAttack {
        role: String,
        trusted: u64,
        presented: u64,
    },
    #[error("snapshot no longer lists {file}")]
    SnapshotEntryRemoved { file: String },
    #[error("timestamp version {version} was served with different content")]
    TimestampEquivocation { version: u64 },
    #[error("snapshot does not match timestamp: {0}")]
    SnapshotIntegrity(IntegrityFailure),
    #[error("{role} does not match snapshot: {failure}")]
    MetadataIntegrity {
        role: String,
        failure: IntegrityFailure,
    },
    #[error("{role} version {found} does not match pinned version {expected}")]
    MixAndMatch {
        role: String,
        expected: u64,
        found: u64,
    },
    #[error("snapshot does not list role {role}")]
    RoleNotInSnapshot { role: String },
    #[error("{role} metadata expired at {expires}")]
    ExpiredMetadata {
        role: String,
        expires: DateTime<Utc>,
    },
    #[error("delegation of {role} exceeds the maximum depth of {max_depth}")]
    MaxDelegationDepthExceeded { role: String, max_depth: usize },
    #[error("target {path} failed verification: {failure}")]
    TargetIntegrity {
        path: String,
        failure: IntegrityFailure,
    },
    #[error("target {path} is not available from any location")]
    TargetUnavailable { path: String },
    #[error("target {path} is not listed by any trusted role")]
    TargetNotFound { path: String },
    #[error("trusted metadata is missing or stale; refresh first")]
    RefreshRequired,
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl UpdaterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            UpdaterError::Fetch { source, .. } => match source {
                FetchError::InvalidUrl(_) => ErrorCategory::Internal,
                _ => ErrorCategory::Transient,
            },
            UpdaterError::TargetUnavailable { .. } => ErrorCategory::Transient,
            UpdaterError::Parse { .. } => ErrorCategory::Malformed,
            UpdaterError::EndlessData { .. }
            | UpdaterError::InsufficientSignatures { .. }
            | UpdaterError::RootVersionMismatch { .. }
            | UpdaterError::RootRotationLimitExceeded { .. }
            | UpdaterError::RollbackAttack { .. }
            | UpdaterError::SnapshotEntryRemoved { .. }
            | UpdaterError::TimestampEquivocation { .. }
            | UpdaterError::SnapshotIntegrity(_)
            | UpdaterError::MetadataIntegrity { .. }
            | UpdaterError::MixAndMatch { .. }
            | UpdaterError::RoleNotInSnapshot { .. }
            | UpdaterError::ExpiredMetadata { .. }
            | UpdaterError::MaxDelegationDepthExceeded { .. }
            | UpdaterError::TargetIntegrity { .. } => ErrorCategory::Security,
            UpdaterError::TargetNotFound { .. } | UpdaterError::RefreshRequired => {
                ErrorCategory::Precondition
            }
            UpdaterError::Cache(_) | UpdaterError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the failure may indicate tampering.
    pub fn is_security(&self) -> bool {
        self.category() == ErrorCategory::Security
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
