//! Sled-backed [`MetadataCache`].
//!
//! Documents live in a single tree keyed by file name. A metadata record
//! binds the database to one repository; opening it for another repository
//! discards the previous contents so trust state never leaks across them.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Config as SledConfig, Db, Tree};
use tracing::{debug, warn};

use crate::cache::{CacheError, MetadataCache};
use crate::crypto::sha256_hex;

/// Tree name dedicated to store metadata records.
const META_TREE: &str = "__meta";
/// Key for the JSON-encoded [`StoreMetadata`] record.
const META_KEY: &[u8] = b"meta.json";
/// Name of the tree holding metadata documents.
pub const TREE_METADATA: &str = "tuf_metadata";

/// Record persisted alongside the documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Crate version that created the store.
    pub version: String,
    /// SHA256 of the repository identifier (usually its metadata URL).
    pub repository_hash: String,
    /// When the store was created.
    pub creation_time: DateTime<Utc>,
}

/// Persistent metadata cache on top of a sled database.
#[derive(Debug, Clone)]
pub struct SledCache {
    db: Db,
    tree: Tree,
    path: PathBuf,
}

impl SledCache {
    /// Opens (or creates) a cache at `path` bound to `repository`.
    ///
    /// Stores created for a different repository or crate version are wiped.
    /// IO failures while opening (stale locks, damaged files) rebuild the
    /// database from scratch.
    pub fn open<P, S>(path: P, repository: S) -> Result<Self, CacheError>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories.
                fs::create_dir_all(parent)?;
            }
        }
        let repository_hash = sha256_hex(repository.as_ref().as_bytes());

        let db = match sled_config(&path).open() {
            Ok(db) => db,
            Err(sled::Error::Io(err)) => {
                warn!(path = %path.display(), error = %err, "tuf: rebuilding unreadable cache");
                reset_path(&path)?;
                sled_config(&path).open()?
            }
            Err(other) => return Err(CacheError::Db(other)),
        };

        match validate_or_write_metadata(&db, &repository_hash)? {
            MetadataState::Valid | MetadataState::Written => Self::from_db(db, path),
            MetadataState::Mismatch => {
                debug!(path = %path.display(), "tuf: cache belongs to another repository, wiping");
                drop(db);
                reset_path(&path)?;
                let db = sled_config(&path).open()?;
                write_metadata(&db, &repository_hash)?;
                Self::from_db(db, path)
            }
        }
    }

    /// Opens an in-memory cache that disappears with the process.
    pub fn open_ephemeral<S: AsRef<str>>(repository: S) -> Result<Self, CacheError> {
        let db = SledConfig::new().temporary(true).open()?;
        write_metadata(&db, &sha256_hex(repository.as_ref().as_bytes()))?;
        Self::from_db(db, PathBuf::new())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, CacheError> {
        let tree = db.open_tree(TREE_METADATA)?;
        Ok(Self { db, tree, path })
    }

    /// Filesystem path backing the cache; empty for ephemeral caches.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> Result<Option<StoreMetadata>, CacheError> {
        let tree = self.db.open_tree(META_TREE)?;
        match tree.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }
}

impl MetadataCache for SledCache {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.tree.get(name.as_bytes())?.map(|value| value.to_vec()))
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.tree.insert(name.as_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), CacheError> {
        self.tree.remove(name.as_bytes())?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Classification of metadata validation outcomes.
#[derive(Debug)]
enum MetadataState {
    Valid,
    Written,
    Mismatch,
}

fn validate_or_write_metadata(db: &Db, repository_hash: &str) -> Result<MetadataState, CacheError> {
    let tree = db.open_tree(META_TREE)?;
    match tree.get(META_KEY)? {
        None => {
            write_metadata(db, repository_hash)?;
            Ok(MetadataState::Written)
        }
        Some(bytes) => {
            let Ok(metadata) = serde_json::from_slice::<StoreMetadata>(&bytes) else {
                return Ok(MetadataState::Mismatch);
            };
            if metadata.version == env!("CARGO_PKG_VERSION")
                && metadata.repository_hash == repository_hash
            {
                Ok(MetadataState::Valid)
            } else {
                Ok(MetadataState::Mismatch)
            }
        }
    }
}

fn write_metadata(db: &Db, repository_hash: &str) -> Result<(), CacheError> {
    let metadata = StoreMetadata {
        version: env!("CARGO_PKG_VERSION").to_string(),
        repository_hash: repository_hash.to_string(),
        creation_time: Utc::now(),
    };
    let tree = db.open_tree(META_TREE)?;
    tree.insert(META_KEY, serde_json::to_vec(&metadata)?)?;
    tree.flush()?;
    Ok(())
}

/// Builds a sled configuration using the provided filesystem path.
fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new().path(path).cache_capacity(16 * 1024 * 1024)
}

/// Deletes the database file or directory to start from a clean slate.
fn reset_path(path: &Path) -> Result<(), CacheError> {
    if path.exists() {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPO_A: &str = "https://tuf.example.com/metadata/";
    const REPO_B: &str = "https://mirror.example.org/metadata/";

    #[test]
    /// Creates the on-disk database with its metadata record.
    fn open_creates_metadata() {
        let tmp = TempDir::new().unwrap();
        let cache = SledCache::open(tmp.path().join("tuf.db"), REPO_A).unwrap();
        let metadata = cache.metadata().unwrap().unwrap();
        assert_eq!(metadata.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(metadata.repository_hash, sha256_hex(REPO_A.as_bytes()));
        assert_eq!(cache.path(), tmp.path().join("tuf.db"));
    }

    #[test]
    /// Re-opens an existing cache when bound to the same repository.
    fn open_preserves_documents_for_same_repository() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("tuf.db");
        {
            let cache = SledCache::open(&path, REPO_A).unwrap();
            cache.store("root.json", b"root").unwrap();
            cache.flush().unwrap();
        }
        let reopened = SledCache::open(&path, REPO_A).unwrap();
        assert_eq!(reopened.load("root.json").unwrap().unwrap(), b"root");
    }

    #[test]
    /// Wipes the cache when it was created for another repository.
    fn open_wipes_documents_for_other_repository() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tuf.db");
        {
            let cache = SledCache::open(&path, REPO_A).unwrap();
            cache.store("root.json", b"root").unwrap();
            cache.flush().unwrap();
        }
        let reopened = SledCache::open(&path, REPO_B).unwrap();
        assert!(reopened.load("root.json").unwrap().is_none());
        assert_eq!(
            reopened.metadata().unwrap().unwrap().repository_hash,
            sha256_hex(REPO_B.as_bytes())
        );
    }

    #[test]
    /// Ensures remove and clear drop entries from an ephemeral cache.
    fn ephemeral_cache_remove_and_clear() {
        let cache = SledCache::open_ephemeral(REPO_A).unwrap();
        cache.store("timestamp.json", b"ts").unwrap();
        cache.store("snapshot.json", b"snap").unwrap();
        cache.remove("timestamp.json").unwrap();
        assert!(cache.load("timestamp.json").unwrap().is_none());
        assert!(cache.load("snapshot.json").unwrap().is_some());
        cache.clear().unwrap();
        assert!(cache.load("snapshot.json").unwrap().is_none());
        assert!(cache.path().as_os_str().is_empty());
    }
}
