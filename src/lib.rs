//! # repliq
//!
//! A per-database distributed replication coordinator for clustered document
//! databases:
//! - quorum-gated write fan-out over named, cluster-visible queues
//! - per-sender response inboxes demultiplexed from one response queue per node
//! - a crash-durable undo slot covering the in-flight inbound request
//! - membership reconciliation of `$newNode` partition placeholders
//!
//! ## Architecture
//!
//! ```text
//!  sender                     queue substrate                   each replica
//! ┌──────────┐   offer   ┌──────────────────────┐   take   ┌────────────────┐
//! │  send()  ├──────────►│ orientdb.node.<n>.   ├─────────►│ receiver worker│
//! │ (locked  │  ×N nodes │   <db>.request       │          │ undo slot, then│
//! │  fan-out)│           └──────────────────────┘          │ execute locally│
//! └────▲─────┘                                             └───────┬────────┘
//!      │ poll    ┌──────────────────────┐  route by session        │ offer
//!      └─────────┤ per-sender inboxes   │◄─────────────────────────┘
//!        quorum  │ (message service)    │  orientdb.node.<n>.response
//!                └──────────────────────┘
//! ```
//!
//! The cluster-wide request lock (`orientdb.reqlock.<db>`) linearizes the
//! fan-out, so every receiver drains concurrent senders' requests in the same
//! global order.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use repliq::cluster::{ClusterDirectory, MemorySubstrate, ReplicationLayout};
//! use repliq::common::{ReplicationConfig, ReplicationMetrics};
//! use repliq::replication::{ExecutionMode, MessageService, ReplicatedDatabase,
//!     ReplicationRequest};
//! use repliq::tasks::CreateRecordTask;
//!
//! # async fn example() -> repliq::Result<()> {
//! let substrate = Arc::new(MemorySubstrate::new());
//! let directory = ClusterDirectory::new();
//! directory.put_layout(
//!     "orders",
//!     ReplicationLayout::single_cluster("cl0", vec!["a".into()], 1),
//! );
//!
//! let config = ReplicationConfig::default();
//! let metrics = ReplicationMetrics::new();
//! let messages = MessageService::new("a", substrate.clone(), config.clone(), metrics.clone());
//! messages.start();
//!
//! let database = ReplicatedDatabase::new(
//!     "orders", directory.node("a"), messages.clone(), substrate, config, metrics,
//! );
//! database.configure_database().await?;
//!
//! let inbox = messages.sender_inbox();
//! let task = Arc::new(CreateRecordTask::new("r1", serde_json::json!({"qty": 2})));
//! let request = ReplicationRequest::new("orders", None, ExecutionMode::Response, task);
//! let response = database.send(&inbox, request).await?;
//! assert!(response.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod common;
pub mod replication;
pub mod store;
pub mod tasks;

// Re-export commonly used types
pub use common::{Error, ReplicationConfig, ReplicationMetrics, Result};
pub use replication::{MessageService, ReplicatedDatabase, ReplicationRequest};
pub use store::{DocumentStore, MemoryStore};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
