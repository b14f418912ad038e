//! Partition resolution
//!
//! A partitioning strategy answers "which nodes own this (database, cluster)"
//! from the replication layout. Availability is deliberately not its concern;
//! the sender decides who it waits for.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cluster::layout::{ReplicationLayout, NEW_NODE_TAG};
use crate::common::{Error, Result};

/// Ordered, deduplicated set of node names owning a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    nodes: Vec<String>,
}

impl Partition {
    /// Build from an ordered iterator, dropping duplicates and the
    /// `$newNode` placeholder.
    pub fn new(nodes: impl IntoIterator<Item = String>) -> Self {
        let mut seen = Vec::new();
        for node in nodes {
            if node.eq_ignore_ascii_case(NEW_NODE_TAG) {
                continue;
            }
            if !seen.contains(&node) {
                seen.push(node);
            }
        }
        Self { nodes: seen }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.nodes.join(","))
    }
}

/// Pluggable node-set resolution, looked up by name.
pub trait PartitioningStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Nodes owning `(database, cluster)`; `cluster = None` targets the
    /// whole database.
    fn partition(
        &self,
        layout: &ReplicationLayout,
        database: &str,
        cluster: Option<&str>,
    ) -> Result<Partition>;
}

fn cluster_partitions<'a>(
    layout: &'a ReplicationLayout,
    database: &str,
    cluster: Option<&str>,
) -> Result<Vec<&'a Vec<String>>> {
    let partitions: Vec<&Vec<String>> = match cluster {
        Some(name) => layout
            .partitions(name)
            .map(|p| p.iter().collect())
            .unwrap_or_default(),
        None => layout
            .cluster_names()
            .into_iter()
            .filter_map(|name| layout.partitions(name))
            .flatten()
            .collect(),
    };

    if partitions.is_empty() {
        return Err(Error::NoPartition {
            database: database.to_string(),
            cluster: cluster.unwrap_or("*").to_string(),
        });
    }
    Ok(partitions)
}

/// Default strategy: the union of every partition of the target cluster(s).
#[derive(Debug, Default)]
pub struct AllPartitionsStrategy;

impl PartitioningStrategy for AllPartitionsStrategy {
    fn name(&self) -> &str {
        "all"
    }

    fn partition(
        &self,
        layout: &ReplicationLayout,
        database: &str,
        cluster: Option<&str>,
    ) -> Result<Partition> {
        let partitions = cluster_partitions(layout, database, cluster)?;
        let partition = Partition::new(partitions.into_iter().flatten().cloned());
        if partition.is_empty() {
            return Err(Error::NoPartition {
                database: database.to_string(),
                cluster: cluster.unwrap_or("*").to_string(),
            });
        }
        Ok(partition)
    }
}

/// Rotates across the target cluster's partitions, one per request.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl PartitioningStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn partition(
        &self,
        layout: &ReplicationLayout,
        database: &str,
        cluster: Option<&str>,
    ) -> Result<Partition> {
        let partitions = cluster_partitions(layout, database, cluster)?;
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % partitions.len();
        let partition = Partition::new(partitions[index].iter().cloned());
        if partition.is_empty() {
            return Err(Error::NoPartition {
                database: database.to_string(),
                cluster: cluster.unwrap_or("*").to_string(),
            });
        }
        Ok(partition)
    }
}
