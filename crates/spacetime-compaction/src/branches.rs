//! Dead-branch planning.
//!
//! After merges the DAG contains diamond-shaped regions: a fork version whose
//! children each run in a straight line until they meet again at a join. If
//! nobody references anything inside one of those straight runs, the run can
//! be deleted outright. The fork keeps another child and the join keeps
//! another parent, so every remaining version still reaches the head and the
//! state of every remaining version is unchanged.

use crate::dag::VersionDag;
use spacetime_core::VersionId;
use std::collections::{BTreeSet, HashMap};

/// A straight run `fork -> interior.. -> join` that can be dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadRun {
    pub fork: VersionId,
    pub interior: Vec<VersionId>,
    pub join: VersionId,
}

impl DeadRun {
    /// Edges removed together with the run, in path order.
    pub fn edges(&self) -> Vec<(VersionId, VersionId)> {
        let mut path = Vec::with_capacity(self.interior.len() + 2);
        path.push(self.fork.clone());
        path.extend(self.interior.iter().cloned());
        path.push(self.join.clone());
        path.windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

/// A version may sit inside a collapsible run when nobody pins it and it has
/// exactly one parent and one child.
pub(crate) fn is_interior<D: VersionDag + ?Sized>(
    dag: &D,
    version: &VersionId,
    protected: &BTreeSet<VersionId>,
) -> bool {
    version != &dag.root()
        && version != &dag.head()
        && !protected.contains(version)
        && dag.parents(version).len() == 1
        && dag.children(version).len() == 1
}

/// Plan the dead runs to delete. Runs are chosen greedily in topological
/// order; the degree bookkeeping makes the plan safe to apply as a whole.
pub fn plan_dead_branches<D: VersionDag + ?Sized>(
    dag: &D,
    protected: &BTreeSet<VersionId>,
) -> Vec<DeadRun> {
    let mut out_degree: HashMap<VersionId, usize> = HashMap::new();
    let mut in_degree: HashMap<VersionId, usize> = HashMap::new();
    let mut claimed: BTreeSet<VersionId> = BTreeSet::new();
    let mut runs = Vec::new();

    for fork in dag.topological_order() {
        let children = dag.children(&fork);
        if children.len() < 2 {
            continue;
        }
        for child in children {
            if claimed.contains(&child) {
                continue;
            }
            let mut interior = Vec::new();
            let mut cursor = child;
            while is_interior(dag, &cursor, protected) && !claimed.contains(&cursor) {
                let next = dag.children(&cursor).into_iter().next();
                interior.push(cursor.clone());
                match next {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
            if interior.is_empty() {
                continue;
            }
            let join = cursor;
            let fork_out = *out_degree
                .entry(fork.clone())
                .or_insert_with(|| dag.children(&fork).len());
            let join_in = *in_degree
                .entry(join.clone())
                .or_insert_with(|| dag.parents(&join).len());
            if fork_out < 2 || join_in < 2 {
                continue;
            }
            out_degree.insert(fork.clone(), fork_out - 1);
            in_degree.insert(join.clone(), join_in - 1);
            claimed.extend(interior.iter().cloned());
            runs.push(DeadRun {
                fork: fork.clone(),
                interior,
                join,
            });
        }
    }
    runs
}
