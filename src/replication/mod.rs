//! Replication coordinator: requests, responses, routing, and the
//! per-database sender/receiver pair

pub mod database;
pub mod messages;
pub mod request;
pub mod responses;

pub use database::ReplicatedDatabase;
pub use messages::{
    request_lock_name, request_queue_name, response_queue_name, undo_map_name, MessageService,
    RequestRegistration, SenderInbox, CONFIG_DATABASE_PREFIX, CONFIG_MAP_NAME,
};
pub use request::{
    ExecutionContext, ExecutionMode, ReplicationRequest, ReplicationResponse, RequestId,
    ResultStrategy, RunMode, TaskPayload,
};
pub use responses::ResponseManager;
