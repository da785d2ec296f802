//! Alias table: version ids known to denote the same version.
//!
//! When two replicas record the same change under different version ids,
//! one id stays canonical and the other becomes an alias. Peers keep using
//! the names they introduced, so the table also remembers which name each
//! peer uses for a canonical version.

use spacetime_core::{PeerId, VersionId};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    /// alias -> canonical
    canonical: HashMap<VersionId, VersionId>,
    /// canonical -> aliases
    aliases: HashMap<VersionId, BTreeSet<VersionId>>,
    /// (peer, canonical) -> the name that peer uses
    peer_names: HashMap<(PeerId, VersionId), VersionId>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical id for `vid`. Ids without an alias resolve to themselves.
    pub fn resolve(&self, vid: &VersionId) -> VersionId {
        let mut current = vid;
        // Bounded walk; chains are flattened on insert.
        for _ in 0..=self.canonical.len() {
            match self.canonical.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current.clone()
    }

    /// Record that `alias` denotes `canonical`. When `peer` introduced the
    /// alias, remember it as that peer's name for the version.
    pub fn record(&mut self, alias: VersionId, canonical: &VersionId, peer: Option<&PeerId>) {
        let canonical = self.resolve(canonical);
        if alias == canonical {
            return;
        }

        // Anything that pointed at `alias` now points at `canonical`.
        if let Some(previous) = self.aliases.remove(&alias) {
            for old in previous {
                self.canonical.insert(old.clone(), canonical.clone());
                self.aliases.entry(canonical.clone()).or_default().insert(old);
            }
        }
        let renamed: Vec<(PeerId, VersionId)> = self
            .peer_names
            .keys()
            .filter(|(_, v)| *v == alias)
            .cloned()
            .collect();
        for key in renamed {
            if let Some(name) = self.peer_names.remove(&key) {
                self.peer_names.insert((key.0, canonical.clone()), name);
            }
        }

        self.canonical.insert(alias.clone(), canonical.clone());
        self.aliases
            .entry(canonical.clone())
            .or_default()
            .insert(alias.clone());
        if let Some(peer) = peer {
            self.peer_names.insert((peer.clone(), canonical), alias);
        }
    }

    /// The id `peer` uses for `canonical`.
    pub fn name_for(&self, peer: &PeerId, canonical: &VersionId) -> VersionId {
        self.peer_names
            .get(&(peer.clone(), canonical.clone()))
            .cloned()
            .unwrap_or_else(|| canonical.clone())
    }

    /// Drop every alias of a version that no longer exists.
    pub fn forget(&mut self, canonical: &VersionId) {
        if let Some(aliases) = self.aliases.remove(canonical) {
            for alias in aliases {
                self.canonical.remove(&alias);
            }
        }
        self.peer_names.retain(|(_, v), _| v != canonical);
    }

    pub fn aliases_of(&self, canonical: &VersionId) -> BTreeSet<VersionId> {
        self.aliases.get(canonical).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionId {
        VersionId::from(s)
    }

    #[test]
    fn test_unknown_ids_resolve_to_themselves() {
        let table = AliasTable::new();
        assert_eq!(table.resolve(&v("x")), v("x"));
    }

    #[test]
    fn test_chains_are_flattened() {
        let mut table = AliasTable::new();
        table.record(v("a"), &v("b"), None);
        table.record(v("b"), &v("c"), None);
        assert_eq!(table.resolve(&v("a")), v("c"));
        assert_eq!(table.resolve(&v("b")), v("c"));
        assert_eq!(table.aliases_of(&v("c")), [v("a"), v("b")].into_iter().collect());
    }

    #[test]
    fn test_peer_names_follow_canonical() {
        let peer = PeerId::from("remote");
        let mut table = AliasTable::new();
        table.record(v("theirs"), &v("mine"), Some(&peer));
        assert_eq!(table.name_for(&peer, &v("mine")), v("theirs"));
        assert_eq!(table.name_for(&PeerId::from("other"), &v("mine")), v("mine"));

        table.record(v("mine"), &v("final"), None);
        assert_eq!(table.name_for(&peer, &v("final")), v("theirs"));
    }

    #[test]
    fn test_forget_drops_aliases() {
        let peer = PeerId::from("remote");
        let mut table = AliasTable::new();
        table.record(v("theirs"), &v("mine"), Some(&peer));
        table.forget(&v("mine"));
        assert!(table.is_empty());
        assert_eq!(table.resolve(&v("theirs")), v("theirs"));
        assert_eq!(table.name_for(&peer, &v("mine")), v("mine"));
    }
}
