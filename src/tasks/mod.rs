//! Replication task payloads

pub mod record;

pub use record::{
    CreateRecordTask, DeleteRecordTask, FixRecordTask, ReadRecordTask, UpdateRecordTask,
};
