//! Transport seam.
//!
//! A [`Fetcher`] retrieves raw bytes for metadata and target files and knows
//! nothing about trust. Implementations must stop reading once a response
//! exceeds the length they are given.

use async_trait::async_trait;
use thiserror::Error;

use crate::metadata::{Hashes, ROOT_ROLE, TIMESTAMP_ROLE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The repository does not have the file. For root this ends the
    /// rotation walk; everywhere else it is a failure.
    #[error("{0} not found")]
    NotFound(String),
    #[error("{resource} exceeds the {limit} byte limit")]
    LengthExceeded { resource: String, limit: u64 },
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("unexpected status {status} for {resource}")]
    Status { resource: String, status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Identifies one metadata file on the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataRequest {
    pub role: String,
    /// Version prefix of the file name, when the repository provides
    /// versioned files.
    pub version: Option<u64>,
}

impl MetadataRequest {
    /// `<version>.root.json`; root is always requested by version.
    pub fn root(version: u64) -> Self {
        Self {
            role: ROOT_ROLE.to_string(),
            version: Some(version),
        }
    }

    /// `timestamp.json`; timestamp is never versioned.
    pub fn timestamp() -> Self {
        Self {
            role: TIMESTAMP_ROLE.to_string(),
            version: None,
        }
    }

    /// A snapshot or targets file pinned at `version`, versioned only when
    /// the repository uses consistent snapshots.
    pub fn pinned(role: &str, version: u64, consistent_snapshot: bool) -> Self {
        Self {
            role: role.to_string(),
            version: consistent_snapshot.then_some(version),
        }
    }

    pub fn file_name(&self) -> String {
        match self.version {
            Some(version) => format!("{version}.{}.json", self.role),
            None => format!("{}.json", self.role),
        }
    }
}

/// Identifies one target file on the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRequest {
    /// Target path as listed in targets metadata.
    pub path: String,
    /// Hex digest prefixed to the file name under consistent snapshots.
    pub hash_prefix: Option<String>,
}

impl TargetRequest {
    pub fn plain(path: &str) -> Self {
        Self {
            path: path.to_string(),
            hash_prefix: None,
        }
    }

    /// Requests to try in order: one per declared digest when hash-prefixed
    /// names are in use, otherwise just the plain path.
    pub fn candidates(path: &str, hashes: &Hashes, hash_prefixed: bool) -> Vec<Self> {
        if !hash_prefixed {
            return vec![Self::plain(path)];
        }
        hashes
            .values()
            .map(|digest| Self {
                path: path.to_string(),
                hash_prefix: Some(digest.clone()),
            })
            .collect()
    }

    /// Repository-relative location, `<dir>/<hash>.<name>` when prefixed.
    pub fn file_path(&self) -> String {
        let Some(hash) = &self.hash_prefix else {
            return self.path.clone();
        };
        match self.path.rsplit_once('/') {
            Some((dir, name)) => format!("{dir}/{hash}.{name}"),
            None => format!("{hash}.{}", self.path),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches a metadata file, failing with [`FetchError::LengthExceeded`]
    /// once more than `max_length` bytes have been read.
    async fn fetch_metadata(
        &self,
        request: &MetadataRequest,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError>;

    /// Fetches a target file; the body must not exceed `length` bytes.
    async fn fetch_target(&self, request: &TargetRequest, length: u64)
        -> Result<Vec<u8>, FetchError>;
}
