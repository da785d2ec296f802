//! Which observers are still missing which logical changes.

use crate::chain::CausalChain;
use spacetime_core::{Eid, VersionId};
use std::collections::{BTreeSet, HashMap};

/// A pinned reference: some observer (peer, pending offer, local heap) holds
/// `version`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Observer {
    pub label: String,
    pub version: VersionId,
}

impl Observer {
    pub fn new(label: impl Into<String>, version: VersionId) -> Self {
        Self {
            label: label.into(),
            version,
        }
    }
}

/// Eid → labels of observers whose pinned version lacks that eid.
#[derive(Clone, Debug, Default)]
pub struct RequirementMap {
    missing: HashMap<Eid, BTreeSet<String>>,
}

impl RequirementMap {
    pub fn build(chain: &CausalChain, observers: &[Observer]) -> Self {
        let mut missing: HashMap<Eid, BTreeSet<String>> = HashMap::new();
        for eid in chain.all_eids() {
            let lacking = observers
                .iter()
                .filter(|obs| !chain.contains(&obs.version, &eid))
                .map(|obs| obs.label.clone())
                .collect();
            missing.insert(eid, lacking);
        }
        RequirementMap { missing }
    }

    /// Observers missing `eid`. Unknown eids are missing for nobody.
    pub fn missing(&self, eid: &Eid) -> BTreeSet<String> {
        self.missing.get(eid).cloned().unwrap_or_default()
    }
}
