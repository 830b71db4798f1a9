//! Pre-order search of the delegation graph for one target path.
//!
//! The walk keeps its own stack instead of recursing so the depth bound and
//! the terminating rule are plain data checks. Delegated documents are
//! obtained through a [`DelegateLoader`], which owns fetching and verifying.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, UpdaterError};
use crate::metadata::{DelegatedRole, Envelope, Key, KeyId, Targets, TARGETS_ROLE};
use crate::target::{ResolvedTarget, TargetLookup};

/// Supplies verified delegated targets documents.
#[async_trait]
pub trait DelegateLoader: Send + Sync {
    /// Loads the document for `role`, verified with the delegating
    /// document's `keys` and the role's own threshold.
    async fn load(
        &self,
        keys: &BTreeMap<KeyId, Key>,
        role: &DelegatedRole,
    ) -> Result<Arc<Envelope<Targets>>>;
}

struct Frame {
    role: String,
    targets: Arc<Envelope<Targets>>,
    /// Index of the next delegation to consider.
    next: usize,
    /// Whether the delegation that led here was terminating.
    terminating: bool,
}

/// Finds the first role, in pre-order, that lists `path`.
///
/// Only delegations whose path patterns match are followed. A terminating
/// delegation that does not resolve the path ends the whole search. Roles
/// more than `max_depth` levels below top-level targets are an error, and a
/// role already visited is not loaded again.
pub async fn resolve(
    top: &Arc<Envelope<Targets>>,
    path: &str,
    max_depth: usize,
    loader: &dyn DelegateLoader,
) -> Result<TargetLookup> {
    if let Some(info) = top.signed.targets.get(path) {
        return Ok(found(path, info.clone(), vec![TARGETS_ROLE.to_string()]));
    }

    let mut visited: HashSet<String> = HashSet::from([TARGETS_ROLE.to_string()]);
    let mut stack = vec![Frame {
        role: TARGETS_ROLE.to_string(),
        targets: Arc::clone(top),
        next: 0,
        terminating: false,
    }];

    while let Some(frame) = stack.last_mut() {
        let parent = Arc::clone(&frame.targets);
        let candidate = parent.signed.delegations.as_ref().and_then(|delegations| {
            delegations.roles[frame.next..]
                .iter()
                .position(|role| role.matches(path) && !visited.contains(role.name()))
                .map(|offset| (delegations, frame.next + offset))
        });

        let Some((delegations, index)) = candidate else {
            let finished = stack.pop();
            if finished.is_some_and(|frame| frame.terminating) {
                debug!(path, "tuf: terminating delegation did not list target");
                return Ok(TargetLookup::NotFound {
                    path: path.to_string(),
                });
            }
            continue;
        };
        frame.next = index + 1;
        let role = &delegations.roles[index];

        // Top-level targets is depth 0.
        let depth = stack.len();
        if depth > max_depth {
            return Err(UpdaterError::MaxDelegationDepthExceeded {
                role: role.name().to_string(),
                max_depth,
            });
        }

        visited.insert(role.name().to_string());
        let child = loader.load(&delegations.keys, role).await?;
        debug!(role = role.name(), depth, path, "tuf: searching delegated role");

        if let Some(info) = child.signed.targets.get(path) {
            let mut chain: Vec<String> = stack.iter().map(|frame| frame.role.clone()).collect();
            chain.push(role.name().to_string());
            return Ok(found(path, info.clone(), chain));
        }
        stack.push(Frame {
            role: role.name().to_string(),
            targets: child,
            next: 0,
            terminating: role.terminating,
        });
    }

    Ok(TargetLookup::NotFound {
        path: path.to_string(),
    })
}

fn found(path: &str, info: crate::metadata::FileInfo, chain: Vec<String>) -> TargetLookup {
    TargetLookup::Found(ResolvedTarget {
        path: path.to_string(),
        info,
        chain,
    })
}
