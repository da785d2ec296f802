//! The stability horizon.
//!
//! A version is stable once it is an ancestor-or-self of every anchor: every
//! observer and every frontier some peer is known to have reached. Only
//! stable versions may be collapsed or pruned; a peer can still send edges
//! from or into anything above the horizon.

use crate::dag::VersionDag;
use spacetime_core::VersionId;
use std::collections::BTreeSet;

/// `version` and all of its ancestors.
pub fn ancestors_of<D: VersionDag + ?Sized>(dag: &D, version: &VersionId) -> BTreeSet<VersionId> {
    let mut seen = BTreeSet::new();
    if !dag.contains(version) {
        return seen;
    }
    let mut stack = vec![version.clone()];
    while let Some(vid) = stack.pop() {
        if seen.insert(vid.clone()) {
            stack.extend(dag.parents(&vid));
        }
    }
    seen
}

/// Versions that are an ancestor-or-self of every anchor. Anchors the DAG
/// does not hold are ignored; without any anchor, everything is stable.
pub fn stable_versions<D: VersionDag + ?Sized>(
    dag: &D,
    anchors: &BTreeSet<VersionId>,
) -> BTreeSet<VersionId> {
    let mut stable: Option<BTreeSet<VersionId>> = None;
    for anchor in anchors.iter().filter(|a| dag.contains(a)) {
        let below = ancestors_of(dag, anchor);
        stable = Some(match stable {
            Some(current) => current.intersection(&below).cloned().collect(),
            None => below,
        });
    }
    stable.unwrap_or_else(|| dag.versions().into_iter().collect())
}

/// Versions above the horizon: everything not stable.
pub fn unstable_versions<D: VersionDag + ?Sized>(
    dag: &D,
    anchors: &BTreeSet<VersionId>,
) -> BTreeSet<VersionId> {
    let stable = stable_versions(dag, anchors);
    dag.versions()
        .into_iter()
        .filter(|vid| !stable.contains(vid))
        .collect()
}
