//! Per-type custom merge functions.

use spacetime_core::ObjectState;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a user-supplied merge function.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ResolverError(pub String);

/// `(original, yours, theirs) -> merged`. `None` on input means the object
/// does not exist on that side; `None` on output resolves to a delete.
pub type MergeFn = dyn Fn(
        Option<&ObjectState>,
        Option<&ObjectState>,
        Option<&ObjectState>,
    ) -> Result<Option<ObjectState>, ResolverError>
    + Send
    + Sync;

/// Custom merge functions keyed by type name.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<MergeFn>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: impl Into<String>, merge: F)
    where
        F: Fn(
                Option<&ObjectState>,
                Option<&ObjectState>,
                Option<&ObjectState>,
            ) -> Result<Option<ObjectState>, ResolverError>
            + Send
            + Sync
            + 'static,
    {
        self.resolvers.insert(type_name.into(), Arc::new(merge));
    }

    pub fn with<F>(mut self, type_name: impl Into<String>, merge: F) -> Self
    where
        F: Fn(
                Option<&ObjectState>,
                Option<&ObjectState>,
                Option<&ObjectState>,
            ) -> Result<Option<ObjectState>, ResolverError>
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, merge);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<MergeFn>> {
        self.resolvers.get(type_name)
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.resolvers.keys().collect();
        names.sort();
        f.debug_struct("ResolverRegistry").field("types", &names).finish()
    }
}
