//! Applying garbage-collection plans to the arena.

use crate::arena::Arena;
use crate::error::{GraphError, Result};
use crate::version::Edge;
use spacetime_compaction::{
    eid_groups, plan_dead_branches, unstable_versions, CausalChain, EidGroup, GcStats, Observer,
    RequirementMap, VersionDag,
};
use spacetime_core::{Eid, Schema, VersionId};
use spacetime_delta::compose_all;
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

impl Arena {
    /// One collection pass.
    ///
    /// `observers` pin the versions they hold and, together with `ignore`
    /// and the head, anchor the stability horizon. Only versions below every
    /// anchor are pruned or collapsed. An anchor that cannot be placed in the
    /// graph leaves nothing stable and the pass does nothing.
    pub fn collect(
        &mut self,
        schema: &Schema,
        observers: &[Observer],
        ignore: &BTreeSet<VersionId>,
    ) -> Result<GcStats> {
        let mut stats = GcStats::default();

        let mut live = Vec::with_capacity(observers.len());
        for observer in observers {
            let version = self.resolve(&observer.version);
            if self.version(&version).is_none() {
                warn!(observer = %observer.label, version = %observer.version, "Observer holds an unknown version, skipping collection");
                return Ok(stats);
            }
            live.push(Observer::new(observer.label.clone(), version));
        }

        let mut anchors: BTreeSet<VersionId> = live.iter().map(|o| o.version.clone()).collect();
        anchors.extend(ignore.iter().map(|v| self.resolve(v)));
        anchors.insert(self.head_id().clone());

        let mut protected = unstable_versions(&*self, &anchors);
        protected.extend(anchors);
        protected.insert(VersionId::root());
        if !self.has_collectible(&protected) {
            trace!(protected = protected.len(), "Nothing below the stability horizon");
            return Ok(stats);
        }

        for run in plan_dead_branches(&*self, &protected) {
            for (from, to) in run.edges() {
                if self.unlink(&from, &to).is_some() {
                    stats.edges_removed += 1;
                }
            }
            for vid in &run.interior {
                self.remove_version(vid);
                stats.versions_removed += 1;
            }
            debug!(fork = %run.fork, join = %run.join, removed = run.interior.len(), "Pruned dead branch");
            stats.branches_pruned += 1;
        }

        let chain = CausalChain::build(&*self);
        let requirements = RequirementMap::build(&chain, &live);
        for group in eid_groups(&*self, &requirements, &protected) {
            group.verify_linear(&*self, &chain)?;
            self.collapse(schema, &group, &mut stats)?;
        }

        Ok(stats)
    }

    /// Whether some unprotected version has a single parent and a single
    /// child, the only shape either planner removes.
    fn has_collectible(&self, protected: &BTreeSet<VersionId>) -> bool {
        self.versions().iter().any(|vid| {
            !protected.contains(vid) && self.parents(vid).len() == 1 && self.children(vid).len() == 1
        })
    }

    /// Replace the group's path by a single edge carrying the composed
    /// delta.
    fn collapse(&mut self, schema: &Schema, group: &EidGroup, stats: &mut GcStats) -> Result<()> {
        let (Some(first), Some(last)) = (group.first().cloned(), group.last().cloned()) else {
            return Ok(());
        };

        let mut removed = Vec::with_capacity(group.edge_count());
        for pair in group.path.windows(2) {
            let edge = self
                .unlink(&pair[0], &pair[1])
                .ok_or_else(|| GraphError::MissingEdge(pair[0].clone(), pair[1].clone()))?;
            removed.push(edge);
        }
        stats.edges_removed += removed.len();

        let delta = compose_all(schema, removed.iter().map(|edge| &edge.delta))?;
        for vid in group.interior() {
            self.remove_version(vid);
            stats.versions_removed += 1;
        }
        if self.edge(&first, &last).is_none() {
            self.link(Edge {
                from: first.clone(),
                to: last.clone(),
                delta,
                eid: Eid::combine(&group.eids),
            });
            stats.edges_added += 1;
        }
        debug!(first = %first, last = %last, edges = group.edge_count(), "Collapsed eid group");
        stats.groups_collapsed += 1;
        Ok(())
    }
}
