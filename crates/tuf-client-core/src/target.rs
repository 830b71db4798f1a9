//! Length and digest checks for downloaded files.

use thiserror::Error;

use crate::crypto::HashAlgorithm;
use crate::metadata::{FileInfo, Hashes, MetaFile};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFailure {
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
    /// The transfer was cut off once it passed the expected length.
    #[error("more than the expected {expected} bytes")]
    Oversized { expected: u64 },
    #[error("{algorithm} digest mismatch")]
    HashMismatch { algorithm: String },
    #[error("unsupported hash algorithm {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },
    #[error("no supported hash algorithm among {0:?}")]
    NoSupportedHash(Vec<String>),
}

/// Result of resolving a target path against trusted metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetLookup {
    Found(ResolvedTarget),
    /// No trusted role lists the path. Not an error.
    NotFound { path: String },
}

impl TargetLookup {
    pub fn found(self) -> Option<ResolvedTarget> {
        match self {
            TargetLookup::Found(target) => Some(target),
            TargetLookup::NotFound { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub path: String,
    pub info: FileInfo,
    /// Roles walked from `targets` to the role that listed the path.
    pub chain: Vec<String>,
}

impl ResolvedTarget {
    /// Role whose metadata listed the target.
    pub fn role(&self) -> &str {
        self.chain.last().map(String::as_str).unwrap_or_default()
    }
}

/// A downloaded target whose length and digests matched trusted metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedTarget {
    pub path: String,
    pub info: FileInfo,
    pub chain: Vec<String>,
    pub bytes: Vec<u8>,
}

/// Checks a target file: exact length and every declared digest.
pub fn verify_target(info: &FileInfo, bytes: &[u8]) -> Result<(), IntegrityFailure> {
    check_length(info.length, bytes)?;
    for (name, expected) in &info.hashes {
        let algorithm =
            HashAlgorithm::from_name(name).ok_or_else(|| IntegrityFailure::UnsupportedAlgorithm {
                algorithm: name.clone(),
            })?;
        check_digest(algorithm, expected, bytes)?;
    }
    Ok(())
}

/// Checks a metadata file against its pin. Digests are compared for every
/// supported algorithm; unknown algorithms are skipped, but at least one
/// supported digest must be present when any are declared.
pub fn verify_meta_file(pin: &MetaFile, bytes: &[u8]) -> Result<(), IntegrityFailure> {
    if let Some(length) = pin.length {
        check_length(length, bytes)?;
    }
    check_supported_hashes(&pin.hashes, bytes)
}

fn check_supported_hashes(hashes: &Hashes, bytes: &[u8]) -> Result<(), IntegrityFailure> {
    if hashes.is_empty() {
        return Ok(());
    }
    let mut checked = 0;
    for (name, expected) in hashes {
        if let Some(algorithm) = HashAlgorithm::from_name(name) {
            check_digest(algorithm, expected, bytes)?;
            checked += 1;
        }
    }
    if checked == 0 {
        return Err(IntegrityFailure::NoSupportedHash(hashes.keys().cloned().collect()));
    }
    Ok(())
}

fn check_length(expected: u64, bytes: &[u8]) -> Result<(), IntegrityFailure> {
    let actual = bytes.len() as u64;
    if actual != expected {
        return Err(IntegrityFailure::LengthMismatch { expected, actual });
    }
    Ok(())
}

fn check_digest(algorithm: HashAlgorithm, expected: &str, bytes: &[u8]) -> Result<(), IntegrityFailure> {
    if algorithm.digest_hex(bytes) != expected {
        return Err(IntegrityFailure::HashMismatch {
            algorithm: algorithm.as_str().to_string(),
        });
    }
    Ok(())
}
