//! Persistence seam for verified metadata.
//!
//! The updater only ever writes documents it has fully verified, and it
//! re-verifies everything it reads back, so a cache never extends trust.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Key/value storage for metadata documents, keyed by file name
/// (`root.json`, `3.root.json`, `timestamp.json`, `<role>.json`).
pub trait MetadataCache: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError>;
    fn remove(&self, name: &str) -> Result<(), CacheError>;
    /// Drops every entry.
    fn clear(&self) -> Result<(), CacheError>;
}

/// Process-local cache; the default when no persistent cache is supplied.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently held, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.entries.read() {
            Ok(entries) => entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

impl MetadataCache for MemoryCache {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(name).cloned())
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.remove(name);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.clear();
        Ok(())
    }
}
