//! The version/edge arena behind a [`VersionGraph`](crate::VersionGraph).
//!
//! The arena is plain data: all locking happens one level up. A `put` works
//! on a clone of the arena and the clone replaces the original only when the
//! whole batch integrated cleanly.

use crate::alias::AliasTable;
use crate::error::{GraphError, Result};
use crate::version::{Edge, Version};
use spacetime_compaction::VersionDag;
use spacetime_core::{Eid, Event, ObjectChange, ObjectState, PeerId, Schema, VersionId};
use spacetime_delta::{apply_change, AncestorView, ResolverRegistry, State, Transformer};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Schema and resolvers needed to merge branches.
#[derive(Clone, Copy)]
pub(crate) struct MergeContext<'a> {
    pub schema: &'a Schema,
    pub resolvers: &'a ResolverRegistry,
}

#[derive(Clone, Debug)]
pub(crate) struct Arena {
    versions: HashMap<VersionId, Version>,
    edges: HashMap<(VersionId, VersionId), Edge>,
    /// (from, eid) -> to: where a logical change leads from a given parent.
    forward: HashMap<(VersionId, Eid), VersionId>,
    pub(crate) aliases: AliasTable,
    head: VersionId,
    clock: u64,
}

impl Arena {
    pub fn new() -> Self {
        let root = VersionId::root();
        let mut versions = HashMap::new();
        versions.insert(root.clone(), Version::new(root.clone(), 0));
        Arena {
            versions,
            edges: HashMap::new(),
            forward: HashMap::new(),
            aliases: AliasTable::new(),
            head: root,
            clock: 0,
        }
    }

    pub fn head_id(&self) -> &VersionId {
        &self.head
    }

    pub fn version(&self, vid: &VersionId) -> Option<&Version> {
        self.versions.get(vid)
    }

    pub fn edge(&self, from: &VersionId, to: &VersionId) -> Option<&Edge> {
        self.edges.get(&(from.clone(), to.clone()))
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn resolve(&self, vid: &VersionId) -> VersionId {
        self.aliases.resolve(vid)
    }

    /// Versions without children, sorted.
    pub fn heads(&self) -> Vec<VersionId> {
        let mut heads: Vec<VersionId> = self
            .versions
            .values()
            .filter(|v| v.children.is_empty())
            .map(|v| v.vid.clone())
            .collect();
        heads.sort();
        heads
    }

    /// Versions without parents, sorted.
    pub fn roots(&self) -> Vec<VersionId> {
        let mut roots: Vec<VersionId> = self
            .versions
            .values()
            .filter(|v| v.parents.is_empty())
            .map(|v| v.vid.clone())
            .collect();
        roots.sort();
        roots
    }

    // ------------------------------------------------------------------
    // Low-level mutation
    // ------------------------------------------------------------------

    fn create_version(&mut self, vid: VersionId) {
        self.clock += 1;
        trace!(version = %vid, "Creating version");
        self.versions.insert(vid.clone(), Version::new(vid, self.clock));
    }

    pub(crate) fn remove_version(&mut self, vid: &VersionId) {
        self.versions.remove(vid);
        self.aliases.forget(vid);
    }

    pub(crate) fn link(&mut self, edge: Edge) {
        if let Some(from) = self.versions.get_mut(&edge.from) {
            from.children.insert(edge.to.clone());
        }
        if let Some(to) = self.versions.get_mut(&edge.to) {
            to.parents.insert(edge.from.clone());
        }
        self.forward
            .insert((edge.from.clone(), edge.eid.clone()), edge.to.clone());
        self.edges.insert(edge.key(), edge);
    }

    pub(crate) fn unlink(&mut self, from: &VersionId, to: &VersionId) -> Option<Edge> {
        let edge = self.edges.remove(&(from.clone(), to.clone()))?;
        let key = (from.clone(), edge.eid.clone());
        if self.forward.get(&key) == Some(to) {
            self.forward.remove(&key);
        }
        if let Some(version) = self.versions.get_mut(from) {
            version.children.remove(to);
        }
        if let Some(version) = self.versions.get_mut(to) {
            version.parents.remove(from);
        }
        Some(edge)
    }

    /// Whether `target` is `from` or one of its descendants.
    fn reaches(&self, from: &VersionId, target: &VersionId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(vid) = stack.pop() {
            if vid == target {
                return true;
            }
            if !seen.insert(vid) {
                continue;
            }
            if let Some(version) = self.versions.get(vid) {
                stack.extend(version.children.iter());
            }
        }
        false
    }

    fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if self.reaches(&edge.to, &edge.from) {
            return Err(GraphError::Cycle {
                from: edge.from,
                to: edge.to,
            });
        }
        self.link(edge);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Integrating remote edges
    // ------------------------------------------------------------------

    /// Integrate a batch of edges sent by `origin`.
    ///
    /// Edges whose source is not known yet are retried until a pass makes no
    /// progress. What is left then either leads to a version that exists by
    /// now, and is redundant (its source was collected here), or leaves a
    /// gap, which fails the batch. Returns the versions that gained a parent,
    /// in the order they were touched.
    pub fn add_edges(&mut self, origin: &PeerId, edges: Vec<Edge>) -> Result<Vec<VersionId>> {
        let mut touched = Vec::new();
        let mut pending = edges;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for edge in pending {
                let from = self.aliases.resolve(&edge.from);
                if !self.versions.contains_key(&from) {
                    deferred.push(edge);
                    continue;
                }
                self.integrate(origin, from, edge, &mut touched)?;
            }
            if deferred.len() == before {
                let (redundant, gaps): (Vec<Edge>, Vec<Edge>) = deferred
                    .into_iter()
                    .partition(|edge| self.versions.contains_key(&self.aliases.resolve(&edge.to)));
                if !gaps.is_empty() {
                    return Err(GraphError::CannotAddEdges(
                        gaps.iter().map(Edge::key).collect(),
                    ));
                }
                for edge in redundant {
                    debug!(from = %edge.from, to = %edge.to, "Skipping edge from a collected version");
                }
                break;
            }
            pending = deferred;
        }
        Ok(touched)
    }

    fn integrate(
        &mut self,
        origin: &PeerId,
        from: VersionId,
        edge: Edge,
        touched: &mut Vec<VersionId>,
    ) -> Result<()> {
        let to = self.aliases.resolve(&edge.to);
        let known = self.forward.get(&(from.clone(), edge.eid.clone())).cloned();
        match known {
            Some(target) if target == to => {
                trace!(from = %from, to = %to, "Edge already present");
            }
            Some(target) if self.versions.contains_key(&to) => {
                self.equate(origin, &target, &to)?;
                touched.retain(|vid| vid != &to);
                touched.push(target);
            }
            Some(target) => {
                debug!(alias = %to, canonical = %target, peer = %origin, "Aliasing version");
                self.aliases.record(to, &target, Some(origin));
            }
            None => {
                if !self.versions.contains_key(&to) {
                    self.create_version(to.clone());
                } else if self.edges.contains_key(&(from.clone(), to.clone())) {
                    // Same endpoints under another eid, e.g. a collapsed run.
                    trace!(from = %from, to = %to, eid = %edge.eid, "Keeping existing edge");
                    return Ok(());
                }
                self.add_edge(Edge {
                    from,
                    to: to.clone(),
                    delta: edge.delta,
                    eid: edge.eid,
                })?;
                touched.push(to);
            }
        }
        Ok(())
    }

    /// `original` and `alternate` denote the same version: move all of
    /// `alternate`'s edges onto `original` and delete it.
    fn equate(&mut self, origin: &PeerId, original: &VersionId, alternate: &VersionId) -> Result<()> {
        if original == alternate {
            return Ok(());
        }
        if self.reaches(original, alternate) || self.reaches(alternate, original) {
            return Err(GraphError::InvariantViolated(format!(
                "cannot equate {} with its ancestor or descendant {}",
                original, alternate
            )));
        }
        let version = self
            .versions
            .get(alternate)
            .cloned()
            .ok_or_else(|| GraphError::UnknownVersion(alternate.clone()))?;
        debug!(original = %original, alternate = %alternate, peer = %origin, "Equating versions");

        for parent in &version.parents {
            if let Some(edge) = self.unlink(parent, alternate) {
                let taken = self.edges.contains_key(&(parent.clone(), original.clone()))
                    || self.forward.contains_key(&(parent.clone(), edge.eid.clone()));
                if !taken {
                    self.link(Edge {
                        to: original.clone(),
                        ..edge
                    });
                }
            }
        }
        for child in &version.children {
            if let Some(edge) = self.unlink(alternate, child) {
                let taken = self.edges.contains_key(&(original.clone(), child.clone()))
                    || self.forward.contains_key(&(original.clone(), edge.eid.clone()));
                if !taken {
                    self.link(Edge {
                        from: original.clone(),
                        ..edge
                    });
                }
            }
        }

        self.versions.remove(alternate);
        self.aliases.record(alternate.clone(), original, Some(origin));
        if &self.head == alternate {
            self.head = original.clone();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completing the graph
    // ------------------------------------------------------------------

    /// Merge every fork introduced by `touched` until a single head remains,
    /// and return that head.
    pub fn complete(&mut self, ctx: MergeContext<'_>, touched: Vec<VersionId>) -> Result<VersionId> {
        let mut queue: VecDeque<VersionId> = touched.into();
        loop {
            while let Some(vid) = queue.pop_front() {
                let parents: Vec<VersionId> = match self.versions.get(&vid) {
                    Some(version) => version.parents.iter().cloned().collect(),
                    None => continue,
                };
                for parent in parents {
                    while let Some(sibling) = self.unjoined_sibling(&parent, &vid) {
                        let merged = self.merge(ctx, &parent, &sibling, &vid)?;
                        queue.push_back(merged);
                    }
                }
            }

            if self.heads().len() <= 1 {
                break;
            }
            match self.divergent_fork() {
                Some((parent, a, b)) => {
                    let merged = self.merge(ctx, &parent, &a, &b)?;
                    queue.push_back(merged);
                }
                None => {
                    return Err(GraphError::InvariantViolated(
                        "several heads but no divergent fork".to_string(),
                    ))
                }
            }
        }

        let heads = self.heads();
        match heads.as_slice() {
            [head] => {
                self.head = head.clone();
                Ok(head.clone())
            }
            _ => Err(GraphError::InvariantViolated(format!(
                "expected a single head, found {:?}",
                heads
            ))),
        }
    }

    /// Oldest child of `parent`, other than `vid`, sharing no descendant
    /// with `vid`.
    fn unjoined_sibling(&self, parent: &VersionId, vid: &VersionId) -> Option<VersionId> {
        let parent = self.versions.get(parent)?;
        let mut siblings: Vec<&Version> = parent
            .children
            .iter()
            .filter(|child| *child != vid)
            .filter_map(|child| self.versions.get(child))
            .collect();
        if siblings.is_empty() {
            return None;
        }
        siblings.sort_by(|a, b| (a.created, &a.vid).cmp(&(b.created, &b.vid)));

        let below = self.descendants(vid);
        siblings
            .into_iter()
            .find(|sibling| !self.meets(&sibling.vid, &below))
            .map(|sibling| sibling.vid.clone())
    }

    /// `vid` and everything below it.
    fn descendants(&self, vid: &VersionId) -> HashSet<VersionId> {
        let mut seen = HashSet::new();
        let mut stack = vec![vid.clone()];
        while let Some(next) = stack.pop() {
            if let Some(version) = self.versions.get(&next) {
                stack.extend(version.children.iter().cloned());
            }
            seen.insert(next);
        }
        seen
    }

    /// Whether `from` or any of its descendants is in `targets`.
    fn meets(&self, from: &VersionId, targets: &HashSet<VersionId>) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(vid) = stack.pop() {
            if targets.contains(vid) {
                return true;
            }
            if !seen.insert(vid) {
                continue;
            }
            if let Some(version) = self.versions.get(vid) {
                stack.extend(version.children.iter());
            }
        }
        false
    }

    /// A fork whose two children lead to different heads, picked as deep
    /// as possible.
    fn divergent_fork(&self) -> Option<(VersionId, VersionId, VersionId)> {
        let mut reach: HashMap<VersionId, BTreeSet<VersionId>> = HashMap::new();
        for vid in self.topological_order().into_iter().rev() {
            let version = self.versions.get(&vid)?;
            let heads: BTreeSet<VersionId> = if version.children.is_empty() {
                BTreeSet::from([vid.clone()])
            } else {
                version
                    .children
                    .iter()
                    .filter_map(|child| reach.get(child))
                    .flatten()
                    .cloned()
                    .collect()
            };
            if heads.len() >= 2 {
                // Every child reaches exactly one head, or it would have
                // been picked first.
                let mut by_head: BTreeMap<&VersionId, &VersionId> = BTreeMap::new();
                for child in &version.children {
                    if let Some(head) = reach.get(child).and_then(|hs| hs.iter().next()) {
                        by_head.entry(head).or_insert(child);
                    }
                }
                let mut picks = by_head.into_values();
                if let (Some(a), Some(b)) = (picks.next(), picks.next()) {
                    return Some((vid.clone(), a.clone(), b.clone()));
                }
            }
            reach.insert(vid, heads);
        }
        None
    }

    /// Three-way merge of the branches `parent -> a` and `parent -> b`.
    ///
    /// The edge with the greater eid is the current side and wins plain
    /// conflicts. Each merge edge carries the eid of the change it brings
    /// in, so replicas that merge the same pair recognise each other's
    /// merge version.
    fn merge(
        &mut self,
        ctx: MergeContext<'_>,
        parent: &VersionId,
        a: &VersionId,
        b: &VersionId,
    ) -> Result<VersionId> {
        let edge_a = self
            .edge(parent, a)
            .cloned()
            .ok_or_else(|| GraphError::MissingEdge(parent.clone(), a.clone()))?;
        let edge_b = self
            .edge(parent, b)
            .cloned()
            .ok_or_else(|| GraphError::MissingEdge(parent.clone(), b.clone()))?;
        let (current, conflicting) = if (&edge_a.eid, a) > (&edge_b.eid, b) {
            (edge_a, edge_b)
        } else {
            (edge_b, edge_a)
        };

        let deltas = {
            let ancestor = VersionView {
                arena: self,
                version: parent,
                schema: ctx.schema,
            };
            Transformer::new(ctx.schema, ctx.resolvers).transform(
                &ancestor,
                &current.delta,
                &conflicting.delta,
            )?
        };

        let target = self
            .forward
            .get(&(current.to.clone(), conflicting.eid.clone()))
            .or_else(|| self.forward.get(&(conflicting.to.clone(), current.eid.clone())))
            .cloned()
            .unwrap_or_else(|| VersionId::merge_of(parent, &current.to, &conflicting.to));
        if !self.versions.contains_key(&target) {
            self.create_version(target.clone());
        }
        if !self.edges.contains_key(&(current.to.clone(), target.clone())) {
            self.add_edge(Edge {
                from: current.to.clone(),
                to: target.clone(),
                delta: deltas.current_merge,
                eid: conflicting.eid.clone(),
            })?;
        }
        if !self.edges.contains_key(&(conflicting.to.clone(), target.clone())) {
            self.add_edge(Edge {
                from: conflicting.to.clone(),
                to: target.clone(),
                delta: deltas.conf_merge,
                eid: current.eid.clone(),
            })?;
        }

        debug!(
            parent = %parent,
            current = %current.to,
            conflicting = %conflicting.to,
            merged = %target,
            "Merged branches"
        );
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// `versions` and all their ancestors.
    fn ancestors(&self, versions: &BTreeSet<VersionId>) -> HashSet<&VersionId> {
        let mut seen: HashSet<&VersionId> = HashSet::new();
        let mut stack: Vec<&VersionId> = versions
            .iter()
            .filter_map(|vid| self.versions.get_key_value(vid).map(|(key, _)| key))
            .collect();
        while let Some(vid) = stack.pop() {
            if !seen.insert(vid) {
                continue;
            }
            if let Some(version) = self.versions.get(vid) {
                stack.extend(version.parents.iter());
            }
        }
        seen
    }

    /// Every edge a peer holding `known` is missing, parents before
    /// children. Holding a version implies holding its ancestors' states, so
    /// the walk back from the head stops at any of them.
    pub fn edges_since(&self, known: &BTreeSet<VersionId>) -> Vec<Edge> {
        let held = self.ancestors(known);
        if held.contains(&self.head) {
            return Vec::new();
        }
        let mut collected: Vec<&Edge> = Vec::new();
        let mut visited: HashSet<&VersionId> = HashSet::from([&self.head]);
        let mut queue: VecDeque<&VersionId> = VecDeque::from([&self.head]);
        while let Some(vid) = queue.pop_front() {
            let Some(version) = self.versions.get(vid) else {
                continue;
            };
            for parent in &version.parents {
                if let Some(edge) = self.edge(parent, vid) {
                    collected.push(edge);
                }
                if !held.contains(parent) && visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }

        let rank: HashMap<VersionId, usize> = self
            .topological_order()
            .into_iter()
            .enumerate()
            .map(|(i, vid)| (vid, i))
            .collect();
        let rank_of = |vid: &VersionId| rank.get(vid).copied().unwrap_or(usize::MAX);
        collected.sort_by_key(|edge| (rank_of(&edge.to), rank_of(&edge.from)));
        collected.into_iter().cloned().collect()
    }

    /// Edges along one path from ROOT to `version`.
    pub fn path_to_root(&self, version: &VersionId) -> Result<Vec<Edge>> {
        if !self.versions.contains_key(version) {
            return Err(GraphError::UnknownVersion(version.clone()));
        }
        let mut path = Vec::new();
        let mut cursor = version.clone();
        while let Some(parent) = self
            .versions
            .get(&cursor)
            .and_then(|v| v.parents.iter().next())
            .cloned()
        {
            let edge = self
                .edge(&parent, &cursor)
                .ok_or_else(|| GraphError::MissingEdge(parent.clone(), cursor.clone()))?;
            path.push(edge.clone());
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Edges along one path from `from` down to the head.
    pub fn path_to_head(&self, from: &VersionId) -> Result<Vec<Edge>> {
        if !self.versions.contains_key(from) {
            return Err(GraphError::UnknownVersion(from.clone()));
        }
        let mut path = Vec::new();
        let mut cursor = from.clone();
        while let Some(child) = self
            .versions
            .get(&cursor)
            .and_then(|v| v.children.iter().next())
            .cloned()
        {
            let edge = self
                .edge(&cursor, &child)
                .ok_or_else(|| GraphError::MissingEdge(cursor.clone(), child.clone()))?;
            path.push(edge.clone());
            cursor = child;
        }
        Ok(path)
    }

    /// Full state at `version`.
    pub fn state_at(&self, schema: &Schema, version: &VersionId) -> Result<State> {
        let mut state = State::new();
        for edge in self.path_to_root(version)? {
            state.apply(schema, &edge.delta)?;
        }
        Ok(state)
    }

    /// Changes to one object walking back from `version`, newest first,
    /// stopping at the change that created or deleted it.
    fn object_history(&self, version: &VersionId, type_name: &str, oid: &str) -> Vec<&ObjectChange> {
        let mut changes = Vec::new();
        let mut cursor = version;
        while let Some(parent) = self.versions.get(cursor).and_then(|v| v.parents.iter().next()) {
            if let Some(change) = self
                .edge(parent, cursor)
                .and_then(|edge| edge.delta.get(type_name, oid))
            {
                changes.push(change);
                if matches!(change.event(type_name), Some(Event::New) | Some(Event::Delete)) {
                    break;
                }
            }
            cursor = parent;
        }
        changes
    }

    fn replay_object(
        &self,
        schema: &Schema,
        version: &VersionId,
        type_name: &str,
        oid: &str,
    ) -> spacetime_core::Result<Option<ObjectState>> {
        let history = self.object_history(version, type_name, oid);
        if history.first().map_or(false, |latest| latest.is_delete(type_name)) {
            return Ok(None);
        }
        let mut object = None;
        for change in history.into_iter().rev() {
            object = apply_change(schema, type_name, oid, object, change)?;
        }
        Ok(object)
    }

    /// One object as of `version`, or `None` when it does not exist there.
    pub fn object_at(
        &self,
        schema: &Schema,
        version: &VersionId,
        type_name: &str,
        oid: &str,
    ) -> Result<Option<ObjectState>> {
        if !self.versions.contains_key(version) {
            return Err(GraphError::UnknownVersion(version.clone()));
        }
        Ok(self.replay_object(schema, version, type_name, oid)?)
    }

    /// Check single root, single head, edge bookkeeping and acyclicity.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(GraphError::InvariantViolated(msg));

        let roots = self.roots();
        if roots != [VersionId::root()] {
            return fail(format!("expected ROOT as the only root, found {:?}", roots));
        }
        let heads = self.heads();
        if heads != [self.head.clone()] {
            return fail(format!("expected {} as the only head, found {:?}", self.head, heads));
        }
        for ((from, to), edge) in &self.edges {
            if &edge.from != from || &edge.to != to {
                return fail(format!("edge {} -> {} stored under the wrong key", edge.from, edge.to));
            }
            let linked = self.versions.get(from).map_or(false, |v| v.children.contains(to))
                && self.versions.get(to).map_or(false, |v| v.parents.contains(from));
            if !linked {
                return fail(format!("edge {} -> {} is not linked", from, to));
            }
        }
        for version in self.versions.values() {
            for child in &version.children {
                if !self.edges.contains_key(&(version.vid.clone(), child.clone())) {
                    return fail(format!("{} lists child {} without an edge", version.vid, child));
                }
            }
        }
        if self.topological_order().len() != self.versions.len() {
            return fail("the graph has a cycle".to_string());
        }
        Ok(())
    }
}

impl VersionDag for Arena {
    fn root(&self) -> VersionId {
        VersionId::root()
    }

    fn head(&self) -> VersionId {
        self.head.clone()
    }

    fn versions(&self) -> Vec<VersionId> {
        self.versions.keys().cloned().collect()
    }

    fn parents(&self, version: &VersionId) -> BTreeSet<VersionId> {
        self.versions
            .get(version)
            .map(|v| v.parents.clone())
            .unwrap_or_default()
    }

    fn children(&self, version: &VersionId) -> BTreeSet<VersionId> {
        self.versions
            .get(version)
            .map(|v| v.children.clone())
            .unwrap_or_default()
    }

    fn eid(&self, from: &VersionId, to: &VersionId) -> Option<Eid> {
        self.edge(from, to).map(|edge| edge.eid.clone())
    }

    fn contains(&self, version: &VersionId) -> bool {
        self.versions.contains_key(version)
    }
}

/// The merge ancestor as seen by resolvers.
struct VersionView<'a> {
    arena: &'a Arena,
    version: &'a VersionId,
    schema: &'a Schema,
}

impl AncestorView for VersionView<'_> {
    fn object_at_ancestor(&self, type_name: &str, oid: &str) -> spacetime_core::Result<Option<ObjectState>> {
        self.arena
            .replay_object(self.schema, self.version, type_name, oid)
    }
}
