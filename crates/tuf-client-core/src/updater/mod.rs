//! The refresh state machine and target lookups.
//!
//! A refresh runs root → timestamp → snapshot → targets against a private
//! copy of the trusted set. Each stage verifies its document completely
//! before promoting it into that copy, and the copy is published when the
//! pass ends, whether it ends in success or at the first failing stage. The
//! failing stage never promotes anything.
//!
//! Target lookups run against whatever set is published and never block a
//! refresh. Delegated targets they verify are folded into the published set
//! when it still trusts the same snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{MemoryCache, MetadataCache};
use crate::clock::{Clock, SystemClock};
use crate::config::UpdaterConfig;
use crate::crypto::{self, VerifyError};
use crate::delegation::{self, DelegateLoader};
use crate::error::{Result, UpdaterError};
use crate::fetch::{FetchError, Fetcher, MetadataRequest, TargetRequest};
use crate::metadata::{
    is_top_level_role, role_file_name, DelegatedRole, Envelope, Key, KeyId, MetaFile, Metadata,
    MetadataKind, Role, Root, Snapshot, Targets, Timestamp, ROOT_ROLE, SNAPSHOT_ROLE,
    TARGETS_ROLE, TIMESTAMP_ROLE,
};
use crate::parser::Parser;
use crate::target::{self, IntegrityFailure, TargetLookup, VerifiedTarget};
use crate::trust::{TrustStore, TrustedSet, TrustedSnapshot};


/// Cache entry holding the newest trusted root.
const ROOT_FILE: &str = "root.json";

/// Prefix of cache entries for delegated roles.
const DELEGATED_CACHE_PREFIX: &str = "delegated.";

/// Assembles an [`Updater`]. Only the bootstrap root and a fetcher are
/// required; the cache defaults to [`MemoryCache`] and the clock to
/// [`SystemClock`].
pub struct UpdaterBuilder {
    bootstrap_root: Vec<u8>,
    fetcher: Arc<dyn Fetcher>,
    config: UpdaterConfig,
    cache: Option<Arc<dyn MetadataCache>>,
    clock: Option<Arc<dyn Clock>>,
}

impl UpdaterBuilder {
    pub fn config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Verifies the bootstrap root and seeds trust from the cache.
    pub fn build(self) -> Result<Updater> {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new()) as Arc<dyn MetadataCache>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let parser = Parser::new(self.config.signing_payload);
        let root = initial_root(&parser, cache.as_ref(), &self.bootstrap_root)?;
        info!(version = root.signed.version, "tuf: trusted root loaded");
        Ok(Updater {
            parser,
            config: self.config,
            fetcher: self.fetcher,
            cache,
            clock,
            store: TrustStore::new(TrustedSet::new(root)),
            bootstrap_root: self.bootstrap_root,
            refresh_lock: Mutex::new(()),
        })
    }
}

/// TUF client bound to one repository.
pub struct Updater {
    config: UpdaterConfig,
    parser: Parser,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn MetadataCache>,
    clock: Arc<dyn Clock>,
    store: TrustStore,
    bootstrap_root: Vec<u8>,
    /// Serialises refresh and reset.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("config", &self.config)
            .field("trusted", &self.store)
            .finish_non_exhaustive()
    }
}

/// Everything needed to load one document pinned by a trusted parent.
struct Pinned<'a> {
    role: &'a str,
    pin: &'a MetaFile,
    signer: &'a Role,
    keys: &'a BTreeMap<KeyId, Key>,
    max_length: u64,
    consistent_snapshot: bool,
}

impl Updater {
    pub fn builder(bootstrap_root: impl Into<Vec<u8>>, fetcher: Arc<dyn Fetcher>) -> UpdaterBuilder {
        UpdaterBuilder {
            bootstrap_root: bootstrap_root.into(),
            fetcher,
            config: UpdaterConfig::default(),
            cache: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The currently published trusted set.
    pub fn trusted(&self) -> TrustedSnapshot {
        self.store.current()
    }

    /// Runs one full refresh pass.
    ///
    /// Stages completed before a failure stay trusted; the error names the
    /// stage that failed.
    pub async fn refresh(&self) -> Result<TrustedSnapshot> {
        let _guard = self.refresh_lock.lock().await;
        let mut working = (*self.store.current()).clone();
        let outcome = self.run_stages(&mut working).await;
        let published = self.store.publish(working);
        match outcome {
            Ok(()) => {
                info!(
                    root = published.root_version(),
                    timestamp = published.version_of(MetadataKind::Timestamp),
                    snapshot = published.version_of(MetadataKind::Snapshot),
                    targets = published.version_of(MetadataKind::Targets),
                    "tuf: refresh complete"
                );
                Ok(published)
            }
            Err(err) => {
                warn!(error = %err, category = ?err.category(), "tuf: refresh failed");
                Err(err)
            }
        }
    }

    async fn run_stages(&self, working: &mut TrustedSet) -> Result<()> {
        let now = self.clock.now();
        self.update_root(working, now).await?;
        self.update_timestamp(working, now).await?;
        self.update_snapshot(working, now).await?;
        self.update_targets(working, now).await?;
        Ok(())
    }

    /// Looks `path` up through top-level targets and its delegations.
    pub async fn resolve_target(&self, path: &str) -> Result<TargetLookup> {
        let trusted = self.store.current();
        let now = self.clock.now();
        let top = trusted
            .fresh_targets(now)
            .cloned()
            .ok_or(UpdaterError::RefreshRequired)?;

        let loader = PinnedDelegates {
            updater: self,
            trusted: &trusted,
            now,
            loaded: StdMutex::new(Vec::new()),
        };
        let lookup =
            delegation::resolve(&top, path, self.config.max_delegation_depth, &loader).await;
        self.store.extend_delegated(&trusted, loader.into_loaded());
        lookup
    }

    /// Resolves `path`, downloads it and checks it against the trusted
    /// length and digests.
    pub async fn download_target(&self, path: &str) -> Result<VerifiedTarget> {
        let resolved = match self.resolve_target(path).await? {
            TargetLookup::Found(resolved) => resolved,
            TargetLookup::NotFound { path } => return Err(UpdaterError::TargetNotFound { path }),
        };
        let hash_prefixed =
            self.config.prefix_targets_with_hash && self.trusted().root().signed.consistent_snapshot;

        for request in TargetRequest::candidates(path, &resolved.info.hashes, hash_prefixed) {
            let bytes = match self.fetcher.fetch_target(&request, resolved.info.length).await {
                Ok(bytes) => bytes,
                Err(FetchError::NotFound(_)) => {
                    debug!(file = %request.file_path(), "tuf: target location missing");
                    continue;
                }
                Err(FetchError::LengthExceeded { .. }) => {
                    return Err(UpdaterError::TargetIntegrity {
                        path: path.to_string(),
                        failure: IntegrityFailure::Oversized {
                            expected: resolved.info.length,
                        },
                    })
                }
                Err(source) => {
                    return Err(UpdaterError::Fetch {
                        file: request.file_path(),
                        source,
                    })
                }
            };
            target::verify_target(&resolved.info, &bytes).map_err(|failure| {
                warn!(path, error = %failure, "tuf: discarding target that failed verification");
                UpdaterError::TargetIntegrity {
                    path: path.to_string(),
                    failure,
                }
            })?;
            return Ok(VerifiedTarget {
                path: resolved.path,
                info: resolved.info,
                chain: resolved.chain,
                bytes,
            });
        }
        Err(UpdaterError::TargetUnavailable {
            path: path.to_string(),
        })
    }

    /// Forgets everything learned since the bootstrap root, including cached
    /// metadata.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.cache.clear()?;
        let root = bootstrap(&self.parser, &self.bootstrap_root)?;
        info!(version = root.signed.version, "tuf: trust reset to bootstrap root");
        self.store.publish(TrustedSet::new(root));
        Ok(())
    }

    async fn update_root(&self, working: &mut TrustedSet, now: DateTime<Utc>) -> Result<()> {
        let mut rotations: u32 = 0;
        loop {
            let current = working.root_version();
            let next = current
                .checked_add(1)
                .ok_or_else(|| UpdaterError::Internal("root version overflow".into()))?;
            let request = MetadataRequest::root(next);
            let file = request.file_name();
            let bytes = match self
                .fetcher
                .fetch_metadata(&request, self.config.max_root_length)
                .await
            {
                Ok(bytes) => bytes,
                Err(FetchError::NotFound(_)) => break,
                Err(err) => return Err(fetch_failure(file, self.config.max_root_length, err)),
            };
            check_length(&file, &bytes, self.config.max_root_length)?;
            if rotations >= self.config.max_root_rotations {
                return Err(UpdaterError::RootRotationLimitExceeded {
                    limit: self.config.max_root_rotations,
                });
            }

            let candidate = self.parse::<Root>(&file, &bytes)?;
            verify_rotation(working.root(), &candidate)?;
            self.cache_store(&file, &candidate.raw);
            self.cache_store(ROOT_FILE, &candidate.raw);
            for kind in working.promote_root(candidate) {
                debug!(role = %kind, "tuf: signing keys rotated, forgetting trusted copy");
                self.cache_remove(&role_file_name(kind.as_str()));
            }
            info!(from = current, to = next, "tuf: root rotated");
            rotations += 1;
        }
        check_expiry(working.root(), ROOT_ROLE, now)
    }

    async fn update_timestamp(&self, working: &mut TrustedSet, now: DateTime<Utc>) -> Result<()> {
        let root = Arc::clone(working.root());
        let signer = root.signed.role(MetadataKind::Timestamp);
        let request = MetadataRequest::timestamp();
        let file = request.file_name();
        let bytes = self
            .fetch_metadata(&request, self.config.max_timestamp_length)
            .await?;
        let candidate = self.parse::<Timestamp>(&file, &bytes)?;
        verify_role(&candidate, signer, &root.signed.keys)?;

        let previous = match working.timestamp() {
            Some(previous) => Some(Arc::clone(previous)),
            None => self.seed::<Timestamp>(&file, signer, &root.signed.keys),
        };
        if let Some(previous) = &previous {
            let trusted = &previous.signed;
            if candidate.signed.version < trusted.version {
                return Err(UpdaterError::RollbackAttack {
                    role: TIMESTAMP_ROLE.to_string(),
                    trusted: trusted.version,
                    presented: candidate.signed.version,
                });
            }
            if candidate.signed.version == trusted.version && candidate.signed != *trusted {
                return Err(UpdaterError::TimestampEquivocation {
                    version: trusted.version,
                });
            }
            if candidate.signed.snapshot.version < trusted.snapshot.version {
                return Err(UpdaterError::RollbackAttack {
                    role: SNAPSHOT_ROLE.to_string(),
                    trusted: trusted.snapshot.version,
                    presented: candidate.signed.snapshot.version,
                });
            }
        }
        check_expiry(&candidate, TIMESTAMP_ROLE, now)?;

        debug!(
            version = candidate.signed.version,
            snapshot = candidate.signed.snapshot.version,
            "tuf: timestamp verified"
        );
        self.cache_store(&file, &candidate.raw);
        working.promote_timestamp(Arc::new(candidate));
        Ok(())
    }

    async fn update_snapshot(&self, working: &mut TrustedSet, now: DateTime<Utc>) -> Result<()> {
        let root = Arc::clone(working.root());
        let timestamp = working
            .timestamp()
            .cloned()
            .ok_or_else(|| UpdaterError::Internal("snapshot stage without timestamp".into()))?;
        let pin = &timestamp.signed.snapshot;
        let signer = root.signed.role(MetadataKind::Snapshot);

        let previous = match working.snapshot() {
            Some(previous) => Some(Arc::clone(previous)),
            None => self.seed::<Snapshot>(&role_file_name(SNAPSHOT_ROLE), signer, &root.signed.keys),
        };
        if let Some(previous) = &previous {
            if pin.version < previous.signed.version {
                return Err(UpdaterError::RollbackAttack {
                    role: SNAPSHOT_ROLE.to_string(),
                    trusted: previous.signed.version,
                    presented: pin.version,
                });
            }
        }

        let candidate = self
            .load_pinned::<Snapshot>(
                Pinned {
                    role: SNAPSHOT_ROLE,
                    pin,
                    signer,
                    keys: &root.signed.keys,
                    max_length: self.config.max_snapshot_length,
                    consistent_snapshot: root.signed.consistent_snapshot,
                },
                previous.as_ref(),
                now,
            )
            .await?;

        if let Some(previous) = &previous {
            for (file, trusted) in &previous.signed.meta {
                match candidate.signed.meta.get(file) {
                    None => {
                        return Err(UpdaterError::SnapshotEntryRemoved { file: file.clone() })
                    }
                    Some(presented) if presented.version < trusted.version => {
                        return Err(UpdaterError::RollbackAttack {
                            role: file.trim_end_matches(".json").to_string(),
                            trusted: trusted.version,
                            presented: presented.version,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        debug!(version = candidate.signed.version, "tuf: snapshot verified");
        working.promote_snapshot(candidate);
        Ok(())
    }

    async fn update_targets(&self, working: &mut TrustedSet, now: DateTime<Utc>) -> Result<()> {
        let root = Arc::clone(working.root());
        let snapshot = working
            .snapshot()
            .cloned()
            .ok_or_else(|| UpdaterError::Internal("targets stage without snapshot".into()))?;
        let pin = snapshot
            .signed
            .role_pin(TARGETS_ROLE)
            .ok_or_else(|| UpdaterError::RoleNotInSnapshot {
                role: TARGETS_ROLE.to_string(),
            })?;
        let in_memory = working.targets().cloned();
        let targets = self
            .load_pinned::<Targets>(
                Pinned {
                    role: TARGETS_ROLE,
                    pin,
                    signer: root.signed.role(MetadataKind::Targets),
                    keys: &root.signed.keys,
                    max_length: self.config.max_targets_length,
                    consistent_snapshot: root.signed.consistent_snapshot,
                },
                in_memory.as_ref(),
                now,
            )
            .await?;
        debug!(version = targets.signed.version, "tuf: targets verified");
        working.promote_targets(targets);
        Ok(())
    }

    /// Produces a fully verified document for `pinned`, preferring an
    /// already trusted copy, then the cache, then the network.
    async fn load_pinned<T: Metadata + Send + Sync>(
        &self,
        pinned: Pinned<'_>,
        in_memory: Option<&Arc<Envelope<T>>>,
        now: DateTime<Utc>,
    ) -> Result<Arc<Envelope<T>>> {
        let file = cache_file_name(pinned.role);

        if let Some(trusted) = in_memory.filter(|t| t.signed.version() == pinned.pin.version) {
            match check_integrity(&pinned, &trusted.raw)
                .and_then(|()| self.verify_pinned(&pinned, trusted, now))
            {
                Ok(()) => return Ok(Arc::clone(trusted)),
                Err(err) => debug!(role = pinned.role, error = %err, "tuf: trusted copy no longer valid"),
            }
        }

        if let Some(bytes) = self.cache_load(&file) {
            match self
                .parse_pinned::<T>(&pinned, &file, &bytes)
                .and_then(|candidate| self.verify_pinned(&pinned, &candidate, now).map(|()| candidate))
            {
                Ok(candidate) => {
                    debug!(role = pinned.role, "tuf: using cached metadata");
                    return Ok(Arc::new(candidate));
                }
                Err(err) => debug!(role = pinned.role, error = %err, "tuf: cached metadata unusable"),
            }
        }

        let request =
            MetadataRequest::pinned(pinned.role, pinned.pin.version, pinned.consistent_snapshot);
        let limit = pinned.pin.length.unwrap_or(pinned.max_length);
        let bytes = self.fetch_metadata(&request, limit).await?;
        let candidate = self.parse_pinned::<T>(&pinned, &request.file_name(), &bytes)?;
        self.verify_pinned(&pinned, &candidate, now)?;
        self.cache_store(&file, &candidate.raw);
        Ok(Arc::new(candidate))
    }

    /// Integrity against the pin, then parsing.
    fn parse_pinned<T: Metadata>(
        &self,
        pinned: &Pinned<'_>,
        file: &str,
        bytes: &[u8],
    ) -> Result<Envelope<T>> {
        check_integrity(pinned, bytes)?;
        self.parse::<T>(file, bytes)
    }

    /// Signatures, pinned version and expiry.
    fn verify_pinned<T: Metadata>(
        &self,
        pinned: &Pinned<'_>,
        candidate: &Envelope<T>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        verify_role(candidate, pinned.signer, pinned.keys)?;
        if candidate.signed.version() != pinned.pin.version {
            return Err(UpdaterError::MixAndMatch {
                role: pinned.role.to_string(),
                expected: pinned.pin.version,
                found: candidate.signed.version(),
            });
        }
        check_expiry(candidate, pinned.role, now)
    }

    fn parse<T: Metadata>(&self, file: &str, bytes: &[u8]) -> Result<Envelope<T>> {
        parse(&self.parser, file, bytes)
    }

    async fn fetch_metadata(&self, request: &MetadataRequest, limit: u64) -> Result<Vec<u8>> {
        let file = request.file_name();
        let bytes = self
            .fetcher
            .fetch_metadata(request, limit)
            .await
            .map_err(|err| fetch_failure(file.clone(), limit, err))?;
        check_length(&file, &bytes, limit)?;
        Ok(bytes)
    }

    /// A cached document signed by `signer`, used only as the rollback
    /// reference when nothing is trusted in memory.
    fn seed<T: Metadata>(
        &self,
        file: &str,
        signer: &Role,
        keys: &BTreeMap<KeyId, Key>,
    ) -> Option<Arc<Envelope<T>>> {
        let bytes = self.cache_load(file)?;
        match self
            .parse::<T>(file, &bytes)
            .and_then(|envelope| verify_role(&envelope, signer, keys).map(|()| envelope))
        {
            Ok(envelope) => Some(Arc::new(envelope)),
            Err(err) => {
                warn!(file, error = %err, "tuf: ignoring cached metadata");
                None
            }
        }
    }

    fn cache_load(&self, name: &str) -> Option<Vec<u8>> {
        load_cached(self.cache.as_ref(), name)
    }

    fn cache_store(&self, name: &str, bytes: &[u8]) {
        if let Err(err) = self.cache.store(name, bytes) {
            warn!(file = name, error = %err, "tuf: cache write failed");
        }
    }

    fn cache_remove(&self, name: &str) {
        if let Err(err) = self.cache.remove(name) {
            warn!(file = name, error = %err, "tuf: cache remove failed");
        }
    }
}

/// Loads delegated targets pinned by the snapshot a lookup started from.
struct PinnedDelegates<'a> {
    updater: &'a Updater,
    trusted: &'a TrustedSet,
    now: DateTime<Utc>,
    loaded: StdMutex<Vec<(String, Arc<Envelope<Targets>>)>>,
}

impl PinnedDelegates<'_> {
    fn into_loaded(self) -> Vec<(String, Arc<Envelope<Targets>>)> {
        self.loaded
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DelegateLoader for PinnedDelegates<'_> {
    async fn load(
        &self,
        keys: &BTreeMap<KeyId, Key>,
        role: &DelegatedRole,
    ) -> Result<Arc<Envelope<Targets>>> {
        let snapshot = self.trusted.snapshot().ok_or(UpdaterError::RefreshRequired)?;
        let pin = snapshot
            .signed
            .role_pin(role.name())
            .ok_or_else(|| UpdaterError::RoleNotInSnapshot {
                role: role.name().to_string(),
            })?;
        let in_memory = self.trusted.delegated(role.name());
        let targets = self
            .updater
            .load_pinned::<Targets>(
                Pinned {
                    role: role.name(),
                    pin,
                    signer: &role.role,
                    keys,
                    max_length: self.updater.config.max_targets_length,
                    consistent_snapshot: self.trusted.root().signed.consistent_snapshot,
                },
                in_memory,
                self.now,
            )
            .await?;
        let reused = in_memory.is_some_and(|existing| Arc::ptr_eq(existing, &targets));
        if !reused {
            self.loaded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((role.name().to_string(), Arc::clone(&targets)));
        }
        Ok(targets)
    }
}

fn parse<T: Metadata>(parser: &Parser, file: &str, bytes: &[u8]) -> Result<Envelope<T>> {
    parser.parse::<T>(bytes).map_err(|source| UpdaterError::Parse {
        file: file.to_string(),
        source,
    })
}

fn verify_role<T>(envelope: &Envelope<T>, role: &Role, keys: &BTreeMap<KeyId, Key>) -> Result<()> {
    crypto::verify_threshold(&envelope.payload, &envelope.signatures, role, keys)
        .map(|_| ())
        .map_err(
            |VerifyError::InsufficientSignatures {
                 role,
                 valid,
                 threshold,
             }| UpdaterError::InsufficientSignatures {
                role,
                valid,
                threshold,
            },
        )
}

/// A root rotation needs the previous root's threshold, the exact next
/// version and the new root's own threshold.
fn verify_rotation(trusted: &Envelope<Root>, candidate: &Envelope<Root>) -> Result<()> {
    verify_role(candidate, trusted.signed.role(MetadataKind::Root), &trusted.signed.keys)?;
    let expected = trusted.signed.version + 1;
    if candidate.signed.version != expected {
        return Err(UpdaterError::RootVersionMismatch {
            expected,
            found: candidate.signed.version,
        });
    }
    verify_role(
        candidate,
        candidate.signed.role(MetadataKind::Root),
        &candidate.signed.keys,
    )
}

/// The bootstrap root, which must carry its own root threshold.
fn bootstrap(parser: &Parser, bytes: &[u8]) -> Result<Envelope<Root>> {
    let root = parse::<Root>(parser, ROOT_FILE, bytes)?;
    verify_role(&root, root.signed.role(MetadataKind::Root), &root.signed.keys)?;
    Ok(root)
}

/// The bootstrap root, advanced through any verified rotations found in the
/// cache.
fn initial_root(
    parser: &Parser,
    cache: &dyn MetadataCache,
    bootstrap_root: &[u8],
) -> Result<Envelope<Root>> {
    let mut root = bootstrap(parser, bootstrap_root)?;
    while let Some(next) = root.signed.version.checked_add(1) {
        let name = MetadataRequest::root(next).file_name();
        let Some(bytes) = load_cached(cache, &name) else {
            break;
        };
        let candidate = match parse::<Root>(parser, &name, &bytes)
            .and_then(|candidate| verify_rotation(&root, &candidate).map(|()| candidate))
        {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(file = %name, error = %err, "tuf: ignoring cached root");
                break;
            }
        };
        debug!(version = next, "tuf: cached root rotation verified");
        root = candidate;
    }
    Ok(root)
}

/// Cache entry for a role's newest trusted document. Delegated roles get
/// their own prefix so a name like `2.root` cannot shadow a cached rotation.
fn cache_file_name(role: &str) -> String {
    if is_top_level_role(role) {
        role_file_name(role)
    } else {
        format!("{DELEGATED_CACHE_PREFIX}{}", role_file_name(role))
    }
}

fn load_cached(cache: &dyn MetadataCache, name: &str) -> Option<Vec<u8>> {
    match cache.load(name) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(file = name, error = %err, "tuf: cache read failed");
            None
        }
    }
}

fn check_integrity(pinned: &Pinned<'_>, bytes: &[u8]) -> Result<()> {
    target::verify_meta_file(pinned.pin, bytes).map_err(|failure| {
        if pinned.role == SNAPSHOT_ROLE {
            UpdaterError::SnapshotIntegrity(failure)
        } else {
            UpdaterError::MetadataIntegrity {
                role: pinned.role.to_string(),
                failure,
            }
        }
    })
}

fn fetch_failure(file: String, limit: u64, source: FetchError) -> UpdaterError {
    match source {
        FetchError::LengthExceeded { .. } => UpdaterError::EndlessData { file, limit },
        source => UpdaterError::Fetch { file, source },
    }
}

fn check_length(file: &str, bytes: &[u8], limit: u64) -> Result<()> {
    if bytes.len() as u64 > limit {
        return Err(UpdaterError::EndlessData {
            file: file.to_string(),
            limit,
        });
    }
    Ok(())
}

/// `expires <= now` is expired.
fn check_expiry<T: Metadata>(envelope: &Envelope<T>, role: &str, now: DateTime<Utc>) -> Result<()> {
    if envelope.is_expired(now) {
        return Err(UpdaterError::ExpiredMetadata {
            role: role.to_string(),
            expires: envelope.expires(),
        });
    }
    Ok(())
}
