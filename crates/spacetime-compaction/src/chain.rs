//! Causal-chain labeling.
//!
//! Walks the DAG from the root in topological order and records, for every
//! version, the set of eids whose effect it contains, and for every eid the
//! eids it was applied on top of.

use crate::dag::VersionDag;
use spacetime_core::{Eid, VersionId};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Default)]
pub struct CausalChain {
    /// Eids reachable from the root to each version.
    pub eids_in_version: HashMap<VersionId, BTreeSet<Eid>>,
    /// Eids each eid depends on (union over every edge carrying it).
    pub eid_deps: HashMap<Eid, BTreeSet<Eid>>,
}

impl CausalChain {
    pub fn build<D: VersionDag + ?Sized>(dag: &D) -> Self {
        let mut chain = CausalChain::default();
        for version in dag.topological_order() {
            let mut seen = BTreeSet::new();
            for parent in dag.parents(&version) {
                let Some(eid) = dag.eid(&parent, &version) else {
                    continue;
                };
                let inherited = chain
                    .eids_in_version
                    .get(&parent)
                    .cloned()
                    .unwrap_or_default();
                chain
                    .eid_deps
                    .entry(eid.clone())
                    .or_default()
                    .extend(inherited.iter().cloned());
                seen.extend(inherited);
                seen.insert(eid);
            }
            chain.eids_in_version.insert(version, seen);
        }
        chain
    }

    /// Every eid known anywhere in the graph.
    pub fn all_eids(&self) -> BTreeSet<Eid> {
        self.eid_deps.keys().cloned().collect()
    }

    pub fn contains(&self, version: &VersionId, eid: &Eid) -> bool {
        self.eids_in_version
            .get(version)
            .map(|eids| eids.contains(eid))
            .unwrap_or(false)
    }

    /// Whether `later` was applied on top of `earlier`.
    pub fn depends_on(&self, later: &Eid, earlier: &Eid) -> bool {
        self.eid_deps
            .get(later)
            .map(|deps| deps.contains(earlier))
            .unwrap_or(false)
    }
}
