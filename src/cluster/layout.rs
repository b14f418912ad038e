//! Per-database replication layout
//!
//! Describes, for every cluster of a database, which partitions of nodes own
//! its records, the write quorum, and the partitioning strategy to resolve
//! them with. A partition slot may hold the `$newNode` placeholder, reserved
//! for the next node that joins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::common::Result;

/// Placeholder token filled in by the membership reconciler (matched
/// case-insensitively).
pub const NEW_NODE_TAG: &str = "$newNode";

/// Default partitioning strategy name
pub const DEFAULT_STRATEGY: &str = "all";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationLayout {
    /// Database-wide write quorum, unless a cluster overrides it
    #[serde(default = "default_write_quorum")]
    pub write_quorum: usize,

    /// Database-wide strategy name, unless a cluster overrides it
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterLayout>,
}

fn default_write_quorum() -> usize {
    2
}
fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterLayout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_quorum: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Ordered lists of node names; one inner list per partition
    #[serde(default)]
    pub partitions: Vec<Vec<String>>,
}

impl Default for ReplicationLayout {
    fn default() -> Self {
        Self {
            write_quorum: default_write_quorum(),
            strategy: default_strategy(),
            clusters: BTreeMap::new(),
        }
    }
}

impl ReplicationLayout {
    /// Layout with a single cluster holding one partition of `nodes`.
    pub fn single_cluster(
        cluster: impl Into<String>,
        nodes: Vec<String>,
        write_quorum: usize,
    ) -> Self {
        let mut layout = Self {
            write_quorum,
            ..Self::default()
        };
        layout.clusters.insert(
            cluster.into(),
            ClusterLayout {
                partitions: vec![nodes],
                ..ClusterLayout::default()
            },
        );
        layout
    }

    /// Write quorum for `cluster`; `None` targets the database default.
    pub fn write_quorum(&self, cluster: Option<&str>) -> usize {
        cluster
            .and_then(|c| self.clusters.get(c))
            .and_then(|c| c.write_quorum)
            .unwrap_or(self.write_quorum)
    }

    /// Strategy name for `cluster`; `None` targets the database default.
    pub fn partition_strategy(&self, cluster: Option<&str>) -> &str {
        cluster
            .and_then(|c| self.clusters.get(c))
            .and_then(|c| c.strategy.as_deref())
            .unwrap_or(&self.strategy)
    }

    pub fn cluster_names(&self) -> Vec<&str> {
        self.clusters.keys().map(String::as_str).collect()
    }

    pub fn partitions(&self, cluster: &str) -> Option<&[Vec<String>]> {
        self.clusters.get(cluster).map(|c| c.partitions.as_slice())
    }

    /// Does `node` already appear in any partition of any cluster?
    pub fn contains_node(&self, node: &str) -> bool {
        self.clusters
            .values()
            .flat_map(|c| c.partitions.iter())
            .any(|partition| partition.iter().any(|slot| slot == node))
    }

    /// Fill one `$newNode` slot per partition with `node`.
    ///
    /// Returns the (cluster, partition index) pairs that changed; empty means
    /// the layout had no open slots.
    pub fn fill_new_node_slots(&mut self, node: &str) -> Vec<(String, usize)> {
        let mut filled = Vec::new();
        for (cluster_name, cluster) in &mut self.clusters {
            for (index, partition) in cluster.partitions.iter_mut().enumerate() {
                if let Some(slot) = partition
                    .iter_mut()
                    .find(|slot| slot.eq_ignore_ascii_case(NEW_NODE_TAG))
                {
                    *slot = node.to_string();
                    filled.push((cluster_name.clone(), index));
                }
            }
        }
        filled
    }

    /// Serialize to the document form published in the configuration map.
    pub fn serialize(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_document(document: &Value) -> Result<Self> {
        Ok(serde_json::from_value(document.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ReplicationLayout {
        let mut layout = ReplicationLayout::single_cluster(
            "cl0",
            vec!["a".into(), "b".into(), NEW_NODE_TAG.into()],
            2,
        );
        layout.clusters.insert(
            "cl1".to_string(),
            ClusterLayout {
                write_quorum: Some(3),
                strategy: Some("round-robin".into()),
                partitions: vec![vec!["a".into()], vec!["b".into()]],
            },
        );
        layout
    }

    #[test]
    fn test_quorum_fallback() {
        let layout = layout();
        assert_eq!(layout.write_quorum(None), 2);
        assert_eq!(layout.write_quorum(Some("cl0")), 2);
        assert_eq!(layout.write_quorum(Some("cl1")), 3);
        assert_eq!(layout.write_quorum(Some("missing")), 2);
    }

    #[test]
    fn test_strategy_fallback() {
        let layout = layout();
        assert_eq!(layout.partition_strategy(None), "all");
        assert_eq!(layout.partition_strategy(Some("cl1")), "round-robin");
    }

    #[test]
    fn test_contains_node_ignores_sentinel() {
        let layout = layout();
        assert!(layout.contains_node("a"));
        assert!(!layout.contains_node("d"));
    }

    #[test]
    fn test_fill_new_node_slots() {
        let mut layout = layout();
        let filled = layout.fill_new_node_slots("d");
        assert_eq!(filled, vec![("cl0".to_string(), 0)]);
        assert_eq!(
            layout.partitions("cl0").unwrap()[0],
            vec!["a".to_string(), "b".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn test_fill_new_node_slot_case_insensitive() {
        let mut layout =
            ReplicationLayout::single_cluster("cl0", vec!["a".into(), "$NEWNODE".into()], 1);
        let filled = layout.fill_new_node_slots("d");
        assert_eq!(filled.len(), 1);
        assert!(layout.contains_node("d"));
    }

    #[test]
    fn test_fill_without_slots_is_noop() {
        let mut layout = ReplicationLayout::single_cluster("cl0", vec!["a".into()], 1);
        assert!(layout.fill_new_node_slots("d").is_empty());
        assert!(!layout.contains_node("d"));
    }

    #[test]
    fn test_serialize_round_trip() {
        let layout = layout();
        let document = layout.serialize();
        let parsed = ReplicationLayout::from_document(&document).unwrap();
        assert_eq!(parsed.write_quorum(Some("cl1")), 3);
        assert_eq!(parsed.cluster_names(), vec!["cl0", "cl1"]);
    }
}
