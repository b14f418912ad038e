//! Record-level replication tasks
//!
//! One task type per record operation. Writes declare themselves as such so
//! the sender gates them on the cluster write quorum; reads wait for every
//! replica. `undo()` here only flags the compensation; reversing the store
//! mutation is the conflict resolver's job, driven by the responses.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::Result;
use crate::replication::request::{ExecutionContext, TaskPayload};
use crate::store::DocumentStore;

macro_rules! undo_counter {
    () => {
        /// How many times the sender compensated this task
        pub fn undo_count(&self) -> u64 {
            self.undone.load(Ordering::Relaxed)
        }
    };
}

/// Create a record under `rid`
#[derive(Debug)]
pub struct CreateRecordTask {
    rid: String,
    content: Value,
    undone: AtomicU64,
}

impl CreateRecordTask {
    pub fn new(rid: impl Into<String>, content: Value) -> Self {
        Self {
            rid: rid.into(),
            content,
            undone: AtomicU64::new(0),
        }
    }

    undo_counter!();
}

impl TaskPayload for CreateRecordTask {
    fn name(&self) -> &str {
        "record_create"
    }

    fn is_write_operation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value> {
        tracing::debug!(
            node = %ctx.local_node,
            rid = %self.rid,
            "creating record"
        );
        let version = db.create(&self.rid, self.content.clone())?;
        Ok(json!({ "version": version }))
    }

    fn undo(&self) {
        self.undone.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(rid = %self.rid, "create under quorum, compensation required");
    }
}

/// Read a record
#[derive(Debug)]
pub struct ReadRecordTask {
    rid: String,
}

impl ReadRecordTask {
    pub fn new(rid: impl Into<String>) -> Self {
        Self { rid: rid.into() }
    }
}

impl TaskPayload for ReadRecordTask {
    fn name(&self) -> &str {
        "record_read"
    }

    fn is_write_operation(&self) -> bool {
        false
    }

    fn execute(&self, _ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value> {
        match db.read(&self.rid)? {
            Some(record) => Ok(json!({
                "version": record.version,
                "content": record.content,
            })),
            None => Ok(Value::Null),
        }
    }

    fn undo(&self) {}
}

/// Update a record, optionally at an expected version
#[derive(Debug)]
pub struct UpdateRecordTask {
    rid: String,
    content: Value,
    version: Option<u64>,
    undone: AtomicU64,
}

impl UpdateRecordTask {
    pub fn new(rid: impl Into<String>, content: Value, version: Option<u64>) -> Self {
        Self {
            rid: rid.into(),
            content,
            version,
            undone: AtomicU64::new(0),
        }
    }

    undo_counter!();
}

impl TaskPayload for UpdateRecordTask {
    fn name(&self) -> &str {
        "record_update"
    }

    fn is_write_operation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value> {
        tracing::debug!(
            node = %ctx.local_node,
            rid = %self.rid,
            "updating record"
        );
        let version = db.update(&self.rid, self.content.clone(), self.version)?;
        Ok(json!({ "version": version }))
    }

    fn undo(&self) {
        self.undone.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(rid = %self.rid, "update under quorum, compensation required");
    }
}

/// Delete a record, optionally at an expected version
#[derive(Debug)]
pub struct DeleteRecordTask {
    rid: String,
    version: Option<u64>,
    undone: AtomicU64,
}

impl DeleteRecordTask {
    pub fn new(rid: impl Into<String>, version: Option<u64>) -> Self {
        Self {
            rid: rid.into(),
            version,
            undone: AtomicU64::new(0),
        }
    }

    undo_counter!();
}

impl TaskPayload for DeleteRecordTask {
    fn name(&self) -> &str {
        "record_delete"
    }

    fn is_write_operation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value> {
        tracing::debug!(
            node = %ctx.local_node,
            rid = %self.rid,
            "deleting record"
        );
        let deleted = db.delete(&self.rid, self.version)?;
        Ok(json!({ "deleted": deleted }))
    }

    fn undo(&self) {
        self.undone.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(rid = %self.rid, "delete under quorum, compensation required");
    }
}

/// Force a record to known content at a known version, resolving a
/// synchronization conflict. Idempotent by construction.
#[derive(Debug)]
pub struct FixRecordTask {
    rid: String,
    content: Value,
    version: u64,
    undone: AtomicU64,
}

impl FixRecordTask {
    pub fn new(rid: impl Into<String>, content: Value, version: u64) -> Self {
        Self {
            rid: rid.into(),
            content,
            version,
            undone: AtomicU64::new(0),
        }
    }

    undo_counter!();
}

impl Clone for FixRecordTask {
    fn clone(&self) -> Self {
        Self::new(self.rid.clone(), self.content.clone(), self.version)
    }
}

impl TaskPayload for FixRecordTask {
    fn name(&self) -> &str {
        "record_fix"
    }

    fn is_write_operation(&self) -> bool {
        true
    }

    fn execute(&self, ctx: &ExecutionContext, db: &dyn DocumentStore) -> Result<Value> {
        tracing::debug!(
            node = %ctx.local_node,
            source = ctx.node_source.as_deref().unwrap_or("-"),
            rid = %self.rid,
            version = self.version,
            "fixing record"
        );
        db.force_save(&self.rid, self.content.clone(), self.version)?;
        Ok(json!({ "version": self.version }))
    }

    fn undo(&self) {
        self.undone.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(rid = %self.rid, "fix under quorum, compensation required");
    }
}
