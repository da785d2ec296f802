//! Read-only view of a version graph, as needed by the planners.

use spacetime_core::{Eid, VersionId};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Trait implemented by anything that can expose the shape of a version DAG.
pub trait VersionDag {
    /// The unique version without parents.
    fn root(&self) -> VersionId;

    /// The unique version without children.
    fn head(&self) -> VersionId;

    fn versions(&self) -> Vec<VersionId>;

    fn parents(&self, version: &VersionId) -> BTreeSet<VersionId>;

    fn children(&self, version: &VersionId) -> BTreeSet<VersionId>;

    /// Eid of the edge `from -> to`, if that edge exists.
    fn eid(&self, from: &VersionId, to: &VersionId) -> Option<Eid>;

    fn contains(&self, version: &VersionId) -> bool;

    /// All versions in topological order (parents before children).
    fn topological_order(&self) -> Vec<VersionId> {
        let mut in_degree: HashMap<VersionId, usize> = self
            .versions()
            .into_iter()
            .map(|v| {
                let degree = self.parents(&v).len();
                (v, degree)
            })
            .collect();

        let mut ready: Vec<VersionId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(v, _)| v.clone())
            .collect();
        ready.sort();
        let mut queue: VecDeque<VersionId> = ready.into();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(version) = queue.pop_front() {
            for child in self.children(&version) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
            order.push(version);
        }
        order
    }
}
