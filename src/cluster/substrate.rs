//! Queue substrate contracts
//!
//! The cluster transport is a set of named, cluster-visible primitives:
//! FIFO queues with bounded-time offers, keyed maps, and cluster-wide locks.
//! Queues persist across process restarts of individual nodes; the undo map
//! is the crash-durable cell recovery reads at startup.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::common::Result;
use crate::replication::{ReplicationRequest, ReplicationResponse};

/// Named FIFO queue.
#[async_trait]
pub trait Queue<T: Send + 'static>: Send + Sync {
    /// Enqueue within `timeout`. Returns false when the queue stayed full.
    async fn offer(&self, value: T, timeout: Duration) -> Result<bool>;

    /// Dequeue, waiting as long as it takes. Cancel-safe.
    async fn take(&self) -> Result<T>;

    /// Dequeue, waiting at most `timeout`.
    async fn poll(&self, timeout: Duration) -> Result<Option<T>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named, cluster-visible keyed cell store.
#[async_trait]
pub trait KeyedMap<V: Send + 'static>: Send + Sync {
    async fn put(&self, key: &str, value: V) -> Result<()>;

    /// Atomically remove and return the value under `key`.
    async fn remove(&self, key: &str) -> Result<Option<V>>;

    async fn get(&self, key: &str) -> Result<Option<V>>;
}

/// Named cluster-wide lock. Fairness is unspecified.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn lock(&self);
    fn unlock(&self);
}

/// Resolves the named primitives a coordinator talks through.
///
/// Looking up the same name twice yields handles onto the same underlying
/// object, on any node of the cluster.
pub trait QueueSubstrate: Send + Sync {
    fn request_queue(&self, name: &str) -> Arc<dyn Queue<ReplicationRequest>>;

    fn response_queue(&self, name: &str) -> Arc<dyn Queue<ReplicationResponse>>;

    fn undo_map(&self, name: &str) -> Arc<dyn KeyedMap<ReplicationRequest>>;

    fn config_map(&self, name: &str) -> Arc<dyn KeyedMap<Value>>;

    fn lock(&self, name: &str) -> Arc<dyn DistributedLock>;
}
