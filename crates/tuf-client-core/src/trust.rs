//! Last-verified metadata and the copy-on-write cell that publishes it.
//!
//! A [`TrustedSet`] is never mutated once published. Refresh works on a
//! private clone and swaps the whole set in when a stage completes, so a
//! reader holding an `Arc<TrustedSet>` always sees one consistent state.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::metadata::{
    Envelope, MetadataKind, Root, Snapshot, Targets, Timestamp, TARGETS_ROLE,
};

/// What callers get back from a refresh.
pub type TrustedSnapshot = Arc<TrustedSet>;

#[derive(Debug, Clone)]
pub struct TrustedSet {
    root: Arc<Envelope<Root>>,
    timestamp: Option<Arc<Envelope<Timestamp>>>,
    snapshot: Option<Arc<Envelope<Snapshot>>>,
    targets: Option<Arc<Envelope<Targets>>>,
    /// Delegated targets verified against the current snapshot, by role name.
    delegated: BTreeMap<String, Arc<Envelope<Targets>>>,
}

impl TrustedSet {
    /// A set trusting only `root`.
    pub fn new(root: Envelope<Root>) -> Self {
        Self {
            root: Arc::new(root),
            timestamp: None,
            snapshot: None,
            targets: None,
            delegated: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Arc<Envelope<Root>> {
        &self.root
    }

    pub fn timestamp(&self) -> Option<&Arc<Envelope<Timestamp>>> {
        self.timestamp.as_ref()
    }

    pub fn snapshot(&self) -> Option<&Arc<Envelope<Snapshot>>> {
        self.snapshot.as_ref()
    }

    pub fn targets(&self) -> Option<&Arc<Envelope<Targets>>> {
        self.targets.as_ref()
    }

    pub fn delegated(&self, role: &str) -> Option<&Arc<Envelope<Targets>>> {
        self.delegated.get(role)
    }

    pub fn root_version(&self) -> u64 {
        self.root.signed.version
    }

    /// Version a targets role is pinned at by the trusted snapshot.
    pub fn pinned_version(&self, role: &str) -> Option<u64> {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.signed.role_pin(role))
            .map(|pin| pin.version)
    }

    /// Version of a document kind currently trusted, if any.
    pub fn version_of(&self, kind: MetadataKind) -> Option<u64> {
        match kind {
            MetadataKind::Root => Some(self.root.signed.version),
            MetadataKind::Timestamp => self.timestamp.as_ref().map(|m| m.signed.version),
            MetadataKind::Snapshot => self.snapshot.as_ref().map(|m| m.signed.version),
            MetadataKind::Targets => self.targets.as_ref().map(|m| m.signed.version),
        }
    }

    /// Top-level targets, provided the chain root → timestamp → snapshot →
    /// targets is complete, consistent and unexpired at `now`.
    pub fn fresh_targets(&self, now: DateTime<Utc>) -> Option<&Arc<Envelope<Targets>>> {
        let timestamp = self.timestamp.as_ref()?;
        let snapshot = self.snapshot.as_ref()?;
        let targets = self.targets.as_ref()?;
        if timestamp.signed.snapshot.version != snapshot.signed.version
            || self.pinned_version(TARGETS_ROLE) != Some(targets.signed.version)
        {
            return None;
        }
        let expired = self.root.is_expired(now)
            || timestamp.is_expired(now)
            || snapshot.is_expired(now)
            || targets.is_expired(now);
        (!expired).then_some(targets)
    }

    /// Replaces the root. When the keys or threshold of the timestamp or
    /// snapshot role change, the corresponding trusted documents are dropped
    /// so their successors are not held to versions signed by replaced keys.
    /// Returns the roles whose signing keys changed.
    pub(crate) fn promote_root(&mut self, root: Envelope<Root>) -> Vec<MetadataKind> {
        let previous = &self.root.signed.roles;
        let next = &root.signed.roles;
        let mut changed = Vec::new();
        if previous.timestamp.keyids != next.timestamp.keyids
            || previous.timestamp.threshold != next.timestamp.threshold
        {
            changed.push(MetadataKind::Timestamp);
        }
        if previous.snapshot.keyids != next.snapshot.keyids
            || previous.snapshot.threshold != next.snapshot.threshold
        {
            changed.push(MetadataKind::Snapshot);
        }
        for kind in &changed {
            match kind {
                MetadataKind::Timestamp => self.timestamp = None,
                MetadataKind::Snapshot => self.snapshot = None,
                _ => {}
            }
        }
        self.root = Arc::new(root);
        changed
    }

    pub(crate) fn promote_timestamp(&mut self, timestamp: Arc<Envelope<Timestamp>>) {
        self.timestamp = Some(timestamp);
    }

    /// Replaces the snapshot and forgets delegated targets whose pin moved.
    pub(crate) fn promote_snapshot(&mut self, snapshot: Arc<Envelope<Snapshot>>) {
        self.delegated.retain(|role, targets| {
            snapshot.signed.role_pin(role).map(|pin| pin.version) == Some(targets.signed.version)
        });
        self.snapshot = Some(snapshot);
    }

    pub(crate) fn promote_targets(&mut self, targets: Arc<Envelope<Targets>>) {
        self.targets = Some(targets);
    }

    pub(crate) fn promote_delegated(&mut self, role: String, targets: Arc<Envelope<Targets>>) {
        self.delegated.insert(role, targets);
    }

    /// Whether `other` trusts the same snapshot document as `self`.
    pub(crate) fn same_snapshot(&self, other: &TrustedSet) -> bool {
        match (&self.snapshot, &other.snapshot) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

/// Atomically published [`TrustedSet`].
#[derive(Debug)]
pub struct TrustStore {
    current: RwLock<Arc<TrustedSet>>,
}

impl TrustStore {
    pub fn new(initial: TrustedSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The currently published set.
    pub fn current(&self) -> Arc<TrustedSet> {
        // Writers only ever swap a complete Arc, so a poisoned lock still
        // holds a consistent value.
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publishes `set`, returning the published handle.
    pub fn publish(&self, set: TrustedSet) -> Arc<TrustedSet> {
        let set = Arc::new(set);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&set);
        set
    }

    /// Publishes `delegated` on top of the current set, provided it still
    /// trusts the snapshot those documents were verified against.
    pub(crate) fn extend_delegated(
        &self,
        verified_against: &TrustedSet,
        delegated: Vec<(String, Arc<Envelope<Targets>>)>,
    ) {
        if delegated.is_empty() {
            return;
        }
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.same_snapshot(verified_against) {
            return;
        }
        let mut next = (**guard).clone();
        for (role, targets) in delegated {
            next.promote_delegated(role, targets);
        }
        *guard = Arc::new(next);
    }
}
