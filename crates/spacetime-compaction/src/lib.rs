//! # spacetime-compaction
//!
//! Planning for the version graph's garbage collector. Everything here works
//! on a read-only [`VersionDag`] view; the graph applies the resulting plans
//! under its write lock.
//!
//! A collection pass runs in this order:
//! 0. [`unstable_versions`]: everything above the stability horizon is kept
//! 1. [`plan_dead_branches`]: straight runs nobody references, deleted outright
//! 2. [`CausalChain::build`]: eids contained in every version
//! 3. [`RequirementMap::build`]: which observers miss which eids
//! 4. [`eid_groups`]: runs no observer can tell apart, collapsed into one edge

mod branches;
mod chain;
mod dag;
mod error;
mod groups;
mod horizon;
mod requirements;
mod stats;

pub use branches::{plan_dead_branches, DeadRun};
pub use chain::CausalChain;
pub use dag::VersionDag;
pub use error::CompactionError;
pub use groups::{eid_groups, EidGroup};
pub use horizon::{ancestors_of, stable_versions, unstable_versions};
pub use requirements::{Observer, RequirementMap};
pub use stats::GcStats;
