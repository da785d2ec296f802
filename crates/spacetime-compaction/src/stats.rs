use serde::{Deserialize, Serialize};

/// Outcome of one garbage-collection pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    /// Dead runs deleted outright.
    pub branches_pruned: usize,
    /// Eid groups collapsed into single edges.
    pub groups_collapsed: usize,
    pub versions_removed: usize,
    pub edges_removed: usize,
    pub edges_added: usize,
}

impl GcStats {
    pub fn is_noop(&self) -> bool {
        self.versions_removed == 0 && self.edges_removed == 0
    }
}
