//! Replication wire model: requests, responses, task payloads

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::common::Result;
use crate::store::DocumentStore;

/// Base unit the default task timeouts scale from
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Globally unique request identifier: originating node plus a local counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    pub node: String,
    pub seq: u64,
}

impl RequestId {
    pub fn new(node: impl Into<String>, seq: u64) -> Self {
        Self {
            node: node.into(),
            seq,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.node, self.seq)
    }
}

/// Whether the sender waits for responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Response,
    NoResponse,
}

/// How collected response payloads reduce to one result.
///
/// The task declares the strategy; the response manager applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStrategy {
    /// First response received wins
    First,
    /// Most frequent payload wins, ties broken by arrival order
    Majority,
    /// All payloads combined into one object keyed by responder
    Merge,
}

/// Whether an execution runs on the replication path or a user session.
///
/// Local hooks and triggers inspect this instead of a thread-local scenario
/// flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Default,
    Distributed,
}

/// Per-execution context threaded through the receiver and recovery paths.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_mode: RunMode,
    pub database: String,
    /// Node this execution runs on
    pub local_node: String,
    /// Node that originated the request, when running distributed
    pub node_source: Option<String>,
}

impl ExecutionContext {
    pub fn distributed(
        database: impl Into<String>,
        local_node: impl Into<String>,
        node_source: impl Into<String>,
    ) -> Self {
        Self {
            run_mode: RunMode::Distributed,
            database: database.into(),
            local_node: local_node.into(),
            node_source: Some(node_source.into()),
        }
    }

    pub fn local(database: impl Into<String>, local_node: impl Into<String>) -> Self {
        Self {
            run_mode: RunMode::Default,
            database: database.into(),
            local_node: local_node.into(),
            node_source: None,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.run_mode == RunMode::Distributed
    }
}

/// Opaque, self-describing operation carried by a replication request.
///
/// Payload identity is preserved across enqueue/dequeue; the wire format of
/// a payload is the substrate's concern, not the coordinator's.
pub trait TaskPayload: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Writes are gated by the cluster write quorum; reads wait for everyone.
    fn is_write_operation(&self) -> bool;

    /// Bound on asynchronous accounting for the whole request
    fn total_timeout(&self, nodes: usize) -> Duration {
        DEFAULT_TASK_TIMEOUT * nodes.max(1) as u32
    }

    /// Bound on the caller-visible quorum wait
    fn synchronous_timeout(&self, expected: usize) -> Duration {
        DEFAULT_TASK_TIMEOUT * expected.max(1) as u32
    }

    fn result_strategy(&self) -> ResultStrategy {
        ResultStrategy::First
    }

    /// Execute locally against the database. Runs on the receiver worker.
    fn execute(&self, ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value>;

    /// Best-effort compensation after a quorum shortfall.
    fn undo(&self);
}

/// A request broadcast to every replica owning the target partition.
#[derive(Debug, Clone)]
pub struct ReplicationRequest {
    pub id: RequestId,
    pub sender_node: String,
    /// Identifies the sender inbox the responses route back to
    pub sender_session: u64,
    pub database: String,
    /// Target cluster; `None` targets the whole database
    pub cluster: Option<String>,
    pub mode: ExecutionMode,
    pub task: Arc<dyn TaskPayload>,
}

impl ReplicationRequest {
    /// A request ready for [`send`](crate::replication::ReplicatedDatabase::send);
    /// id and sender fields are stamped at send time.
    pub fn new(
        database: impl Into<String>,
        cluster: Option<String>,
        mode: ExecutionMode,
        task: Arc<dyn TaskPayload>,
    ) -> Self {
        Self {
            id: RequestId::new("", 0),
            sender_node: String::new(),
            sender_session: 0,
            database: database.into(),
            cluster,
            mode,
            task,
        }
    }
}

impl fmt::Display for ReplicationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) from {}#{}",
            self.task.name(),
            self.id,
            self.sender_node,
            self.sender_session
        )
    }
}

/// A single node's answer to a replication request.
#[derive(Debug, Clone)]
pub struct ReplicationResponse {
    pub request_id: RequestId,
    /// Responding node
    pub sender_node: String,
    pub destination_node: String,
    pub destination_session: u64,
    pub payload: Value,
}
