//! Version graph configuration.

use serde::{Deserialize, Serialize};

/// Behaviour switches for a [`VersionGraph`](crate::VersionGraph).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Run a garbage-collection pass at the end of every `put`.
    pub auto_gc: bool,
    /// Verify single root, single head and acyclicity before committing a
    /// `put` or a collection.
    pub check_invariants: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            auto_gc: true,
            check_invariants: true,
        }
    }
}

/// Builder for [`GraphConfig`].
#[derive(Debug, Default)]
pub struct GraphConfigBuilder {
    config: GraphConfig,
}

impl GraphConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_gc(mut self, enabled: bool) -> Self {
        self.config.auto_gc = enabled;
        self
    }

    pub fn check_invariants(mut self, enabled: bool) -> Self {
        self.config.check_invariants = enabled;
        self
    }

    pub fn build(self) -> GraphConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = GraphConfigBuilder::new().auto_gc(false).build();
        assert!(!config.auto_gc);
        assert!(config.check_invariants);
    }

    #[test]
    fn test_config_serde() {
        let config = GraphConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GraphConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
