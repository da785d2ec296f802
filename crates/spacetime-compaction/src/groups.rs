//! Eid groups: runs of edges that no observer can tell apart.

use crate::branches::is_interior;
use crate::chain::CausalChain;
use crate::dag::VersionDag;
use crate::error::CompactionError;
use crate::requirements::RequirementMap;
use spacetime_core::{Eid, VersionId};
use std::collections::BTreeSet;

/// A contiguous path of edges whose eids are missing for exactly the same
/// set of observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EidGroup {
    pub missing: BTreeSet<String>,
    /// Versions along the path, first to last.
    pub path: Vec<VersionId>,
    /// Eid of each edge along the path.
    pub eids: Vec<Eid>,
}

impl EidGroup {
    pub fn first(&self) -> Option<&VersionId> {
        self.path.first()
    }

    pub fn last(&self) -> Option<&VersionId> {
        self.path.last()
    }

    pub fn interior(&self) -> &[VersionId] {
        if self.path.len() < 2 {
            return &[];
        }
        &self.path[1..self.path.len() - 1]
    }

    pub fn edge_count(&self) -> usize {
        self.eids.len()
    }

    /// Check that the group is a single chain of edges with no branching
    /// inside, and that each eid was applied on top of the previous one.
    pub fn verify_linear<D: VersionDag + ?Sized>(
        &self,
        dag: &D,
        chain: &CausalChain,
    ) -> Result<(), CompactionError> {
        let fail = |reason: String| CompactionError::NonLinearGroup {
            path: self.path.clone(),
            reason,
        };
        if self.path.len() != self.eids.len() + 1 || self.eids.len() < 2 {
            return Err(fail("path and eid counts disagree".to_string()));
        }
        for (i, pair) in self.path.windows(2).enumerate() {
            match dag.eid(&pair[0], &pair[1]) {
                Some(eid) if eid == self.eids[i] => {}
                Some(_) => return Err(fail(format!("edge {} -> {} changed eid", pair[0], pair[1]))),
                None => return Err(fail(format!("no edge {} -> {}", pair[0], pair[1]))),
            }
        }
        for version in self.interior() {
            if dag.parents(version).len() != 1 || dag.children(version).len() != 1 {
                return Err(fail(format!("{} branches inside the group", version)));
            }
        }
        for pair in self.eids.windows(2) {
            if !chain.depends_on(&pair[1], &pair[0]) {
                return Err(fail(format!("{} is not applied on top of {}", pair[1], pair[0])));
            }
        }
        Ok(())
    }
}

/// Split every maximal straight run of collapsible versions into groups of
/// identical requirement sets. Only groups with at least two edges are
/// returned.
pub fn eid_groups<D: VersionDag + ?Sized>(
    dag: &D,
    requirements: &RequirementMap,
    protected: &BTreeSet<VersionId>,
) -> Vec<EidGroup> {
    let mut groups = Vec::new();
    for start in dag.topological_order() {
        if is_interior(dag, &start, protected) {
            continue;
        }
        for child in dag.children(&start) {
            if !is_interior(dag, &child, protected) {
                continue;
            }
            let mut path = vec![start.clone(), child.clone()];
            let mut cursor = child;
            while is_interior(dag, &cursor, protected) {
                match dag.children(&cursor).into_iter().next() {
                    Some(next) => {
                        path.push(next.clone());
                        cursor = next;
                    }
                    None => break,
                }
            }
            split_by_requirements(dag, requirements, &path, &mut groups);
        }
    }
    groups
}

fn split_by_requirements<D: VersionDag + ?Sized>(
    dag: &D,
    requirements: &RequirementMap,
    path: &[VersionId],
    out: &mut Vec<EidGroup>,
) {
    let mut current: Option<EidGroup> = None;
    for pair in path.windows(2) {
        let Some(eid) = dag.eid(&pair[0], &pair[1]) else {
            break;
        };
        let missing = requirements.missing(&eid);
        match current.as_mut() {
            Some(group) if group.missing == missing => {
                group.path.push(pair[1].clone());
                group.eids.push(eid);
            }
            _ => {
                if let Some(done) = current.take() {
                    if done.edge_count() > 1 {
                        out.push(done);
                    }
                }
                current = Some(EidGroup {
                    missing,
                    path: vec![pair[0].clone(), pair[1].clone()],
                    eids: vec![eid],
                });
            }
        }
    }
    if let Some(done) = current {
        if done.edge_count() > 1 {
            out.push(done);
        }
    }
}
