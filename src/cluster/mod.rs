//! Cluster substrate, membership, and partition layout

pub mod admin;
pub mod layout;
pub mod memory;
pub mod partition;
pub mod substrate;

pub use admin::{ClusterAdmin, ClusterDirectory, NodeAdmin, NodeStatus};
pub use layout::{ClusterLayout, ReplicationLayout, DEFAULT_STRATEGY, NEW_NODE_TAG};
pub use memory::{MemoryQueue, MemorySubstrate};
pub use partition::{AllPartitionsStrategy, Partition, PartitioningStrategy, RoundRobinStrategy};
pub use substrate::{DistributedLock, KeyedMap, Queue, QueueSubstrate};
