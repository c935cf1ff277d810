//! Layer path layout in the store namespace.

use crate::core::LayerScope;

/// Store paths of the three layers a node merges.
///
/// ```text
/// <base>/global/config
/// <base>/cluster/<cluster>/config
/// <base>/cluster/<cluster>/nodes/<node>/config
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPaths {
    base: String,
    cluster: String,
    node_id: String,
}

impl LayerPaths {
    /// Default namespace root.
    pub const DEFAULT_BASE: &'static str = "/xnta/yaf-config";

    /// Create the layout for `cluster`/`node_id` under `base`.
    pub fn new(
        base: impl Into<String>,
        cluster: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            cluster: cluster.into(),
            node_id: node_id.into(),
        }
    }

    /// Path of the layer for `scope`.
    pub fn path(&self, scope: LayerScope) -> String {
        match scope {
            LayerScope::Global => format!("{}/global/config", self.base),
            LayerScope::Cluster => format!("{}/cluster/{}/config", self.base, self.cluster),
            LayerScope::Node => format!(
                "{}/cluster/{}/nodes/{}/config",
                self.base, self.cluster, self.node_id
            ),
        }
    }

    /// All three paths in merge order.
    pub fn all(&self) -> [(LayerScope, String); 3] {
        LayerScope::ALL.map(|scope| (scope, self.path(scope)))
    }

    /// Cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = LayerPaths::new("/xnta/yaf-config/", "edge", "probe-3");
        assert_eq!(paths.path(LayerScope::Global), "/xnta/yaf-config/global/config");
        assert_eq!(paths.path(LayerScope::Cluster), "/xnta/yaf-config/cluster/edge/config");
        assert_eq!(
            paths.path(LayerScope::Node),
            "/xnta/yaf-config/cluster/edge/nodes/probe-3/config"
        );
    }

    #[test]
    fn test_all_in_merge_order() {
        let paths = LayerPaths::new(LayerPaths::DEFAULT_BASE, "default", "node-1");
        let scopes: Vec<_> = paths.all().iter().map(|(scope, _)| *scope).collect();
        assert_eq!(scopes, LayerScope::ALL.to_vec());
    }
}
