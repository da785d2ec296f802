//! # spacetime-delta
//!
//! Pure delta algebra for the spacetime version graph:
//! - [`compose`]: sequential merge of deltas (used by GC and checkout)
//! - [`State`]: materialising deltas into objects and diffing objects back
//! - [`Transformer`]: the three-way transform reconciling two branches
//! - [`ResolverRegistry`]: per-type custom merge functions

pub mod compose;
pub mod diff;
pub mod resolver;
pub mod state;
pub mod transform;

pub use compose::{compose, compose_all, compose_object};
pub use diff::{dim_diff, dim_not_present};
pub use resolver::{MergeFn, ResolverError, ResolverRegistry};
pub use state::{apply_change, delete_change, object_change, State};
pub use transform::{AncestorView, MergeDeltas, Transformer};
