//! The dataframe: a local working copy of the objects at one version of a
//! shared [`VersionGraph`].
//!
//! Reads and writes only touch the local copy. `commit` turns the staged
//! changes into one edge and hands it to the graph; `checkout` pulls
//! whatever the graph gained since the copy's version.

use crate::error::{HeapError, Result};
use crate::staging::StagedDiff;
use parking_lot::RwLock;
use spacetime_core::{Delta, Eid, ObjectState, PeerId, Value, VersionId};
use spacetime_delta::{compose_all, State};
use spacetime_graph::{Edge, VersionGraph};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Heap {
    objects: State,
    staged: StagedDiff,
    version: VersionId,
}

/// Managed object heap bound to a version graph.
///
/// `name` is the peer name the heap commits and checks out under. It must
/// differ from the graph's own name, since the graph declares both to
/// remotes.
pub struct Dataframe {
    name: PeerId,
    graph: Arc<VersionGraph>,
    heap: RwLock<Heap>,
}

impl Dataframe {
    pub fn new(name: impl Into<PeerId>, graph: Arc<VersionGraph>) -> Self {
        let name = name.into();
        if &name == graph.name() {
            warn!(name = %name, "Dataframe shares its name with the graph");
        }
        Dataframe {
            name,
            graph,
            heap: RwLock::new(Heap {
                objects: State::new(),
                staged: StagedDiff::new(),
                version: VersionId::root(),
            }),
        }
    }

    pub fn name(&self) -> &PeerId {
        &self.name
    }

    pub fn graph(&self) -> &Arc<VersionGraph> {
        &self.graph
    }

    /// Version the local copy was last committed or checked out at.
    pub fn version(&self) -> VersionId {
        self.heap.read().version.clone()
    }

    /// Whether there are local changes not committed yet.
    pub fn has_staged_changes(&self) -> bool {
        !self.heap.read().staged.is_empty()
    }

    /// The staged delta, as the next commit would send it.
    pub fn staged(&self) -> Delta {
        self.heap.read().staged.delta().clone()
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn add(&self, object: ObjectState) -> Result<()> {
        self.add_many(vec![object])
    }

    /// Add objects atomically: if any of them exists already, none is added.
    pub fn add_many(&self, objects: Vec<ObjectState>) -> Result<()> {
        let mut heap = self.heap.write();
        for object in &objects {
            if heap.objects.object(&object.type_name, &object.oid).is_some() {
                return Err(HeapError::already_exists(&object.type_name, &object.oid));
            }
        }
        let schema = self.graph.schema();
        for object in objects {
            heap.staged.add(schema, &object);
            heap.objects.insert(object);
        }
        Ok(())
    }

    pub fn read_one(&self, type_name: &str, oid: &str) -> Option<ObjectState> {
        self.heap.read().objects.object(type_name, oid).cloned()
    }

    pub fn read_all(&self, type_name: &str) -> Vec<ObjectState> {
        self.heap.read().objects.objects(type_name).cloned().collect()
    }

    pub fn read_dimension(&self, type_name: &str, oid: &str, dim: &str) -> Option<Value> {
        self.heap
            .read()
            .objects
            .object(type_name, oid)
            .and_then(|object| object.get_dimension(dim).cloned())
    }

    /// Set one dimension of a live object.
    ///
    /// Writes to an object staged for deletion are ignored.
    pub fn write_dimension(&self, type_name: &str, oid: &str, dim: &str, value: Value) -> Result<()> {
        let mut heap = self.heap.write();
        let heap = &mut *heap;
        if heap.staged.is_deleted(type_name, oid) {
            debug!(type_name, oid, dim, "Ignoring write to deleted object");
            return Ok(());
        }
        let object = heap
            .objects
            .object(type_name, oid)
            .cloned()
            .ok_or_else(|| HeapError::not_found(type_name, oid))?;

        heap.staged.write_dimension(
            self.graph.schema(),
            type_name,
            oid,
            dim,
            object.get_dimension(dim),
            value.clone(),
        )?;
        let mut object = object;
        object.set_dimension(dim, value);
        heap.objects.insert(object);
        Ok(())
    }

    /// Delete an object. Returns whether it existed.
    pub fn delete(&self, type_name: &str, oid: &str) -> bool {
        let mut heap = self.heap.write();
        let existed = heap.objects.remove(type_name, oid).is_some();
        if existed {
            heap.staged.delete(type_name, oid, true);
        }
        existed
    }

    /// Delete every object of `type_name`. Returns how many there were.
    pub fn delete_all(&self, type_name: &str) -> usize {
        let mut heap = self.heap.write();
        let oids: Vec<String> = heap
            .objects
            .objects(type_name)
            .map(|object| object.oid.clone())
            .collect();
        for oid in &oids {
            heap.objects.remove(type_name, oid);
            heap.staged.delete(type_name, oid, true);
        }
        oids.len()
    }

    // ------------------------------------------------------------------
    // Commit / checkout
    // ------------------------------------------------------------------

    /// Send the staged changes to the graph as one edge from the current
    /// version. Returns the new version, or `None` when nothing was staged.
    ///
    /// On failure the changes stay staged.
    pub fn commit(&self) -> Result<Option<VersionId>> {
        let mut heap = self.heap.write();
        if heap.staged.is_empty() {
            return Ok(None);
        }
        let next = VersionId::generate();
        let edge = Edge::new(
            heap.version.clone(),
            next.clone(),
            heap.staged.delta().clone(),
            Eid::generate(),
        );
        let refs = BTreeMap::from([(self.name.clone(), next.clone())]);
        let head = self.graph.put(&self.name, &refs, vec![edge])?;

        heap.staged.take();
        info!(heap = %self.name, from = %heap.version, version = %next, head = %head, "Committed");
        heap.version = next.clone();
        Ok(Some(next))
    }

    /// Bring the local copy up to the graph's head and return it.
    ///
    /// Uncommitted changes stay staged, and the incoming changes overwrite
    /// the dimensions they touch in the local copy.
    pub fn checkout(&self) -> Result<VersionId> {
        let mut heap = self.heap.write();
        let (path, head) = self.graph.checkout_path(&self.name, &heap.version)?;
        if !path.is_empty() {
            let schema = self.graph.schema();
            let change = compose_all(schema, path.iter().map(|edge| &edge.delta))?;
            heap.objects.apply(schema, &change)?;
            debug!(heap = %self.name, from = %heap.version, to = %head, edges = path.len(), "Checked out");
        }
        heap.version = head.clone();
        Ok(head)
    }

    /// Like [`checkout`](Self::checkout), after waiting up to `timeout` for
    /// the graph to move past the local version.
    pub fn checkout_await(&self, timeout: Duration) -> Result<VersionId> {
        let version = self.version();
        self.graph.wait_for_change(&[version], timeout)?;
        self.checkout()
    }

    /// Commit, then check out.
    pub fn sync(&self) -> Result<VersionId> {
        self.commit()?;
        self.checkout()
    }
}

impl std::fmt::Debug for Dataframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let heap = self.heap.read();
        f.debug_struct("Dataframe")
            .field("name", &self.name)
            .field("version", &heap.version)
            .field("objects", &heap.objects.len())
            .field("staged", &!heap.staged.is_empty())
            .finish()
    }
}
