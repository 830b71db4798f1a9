//! Client side of The Update Framework.
//!
//! An [`Updater`] takes a trusted bootstrap root and a [`Fetcher`], walks the
//! root, timestamp, snapshot and targets metadata of a repository, and hands
//! out target descriptors and downloads only once every signature, version
//! and digest on the way has checked out. Transport and persistence are
//! pluggable; [`HttpFetcher`] and [`SledCache`] are the stock
//! implementations.

pub mod cache;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod fetch;
pub mod http;
pub mod metadata;
pub mod parser;
pub mod store;
pub mod target;
pub mod trust;
pub mod updater;

#[cfg(test)]
mod test_support;

pub use cache::{CacheError, MemoryCache, MetadataCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{SigningPayload, UpdaterConfig};
pub use error::{ErrorCategory, Result, UpdaterError};
pub use fetch::{FetchError, Fetcher, MetadataRequest, TargetRequest};
pub use http::{HttpFetcher, HttpFetcherConfig};
pub use metadata::{
    DelegatedRole, Delegations, Envelope, FileInfo, Key, KeyId, KeyScheme, MetaFile, MetadataKind,
    Role, Root, Snapshot, Targets, Timestamp,
};
pub use parser::{ParseError, Parser};
pub use store::SledCache;
pub use target::{IntegrityFailure, ResolvedTarget, TargetLookup, VerifiedTarget};
pub use trust::{TrustedSet, TrustedSnapshot};
pub use updater::{Updater, UpdaterBuilder};
