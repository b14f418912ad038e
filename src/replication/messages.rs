//! Node-level message plumbing
//!
//! Owns everything request/response routing needs on one node: the
//! wire-visible queue names, the per-sender response inboxes, the registry of
//! outstanding requests, and the demultiplexer worker that drains the node's
//! shared response queue into the right inbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cluster::memory::MemoryQueue;
use crate::cluster::substrate::{Queue, QueueSubstrate};
use crate::common::{ReplicationConfig, ReplicationMetrics, Result};
use crate::replication::request::{ReplicationRequest, ReplicationResponse, RequestId};
use crate::replication::responses::ResponseManager;

pub const NODE_QUEUE_PREFIX: &str = "orientdb.node.";
pub const NODE_QUEUE_REQUEST_POSTFIX: &str = ".request";
pub const NODE_QUEUE_RESPONSE_POSTFIX: &str = ".response";
pub const NODE_QUEUE_UNDO_POSTFIX: &str = ".undo";
pub const NODE_LOCK_PREFIX: &str = "orientdb.reqlock.";

/// Cluster-visible map the reconciler publishes layouts into
pub const CONFIG_MAP_NAME: &str = "orientdb.config";
pub const CONFIG_DATABASE_PREFIX: &str = "database.";

pub fn request_queue_name(node: &str, database: &str) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}.{database}{NODE_QUEUE_REQUEST_POSTFIX}")
}

pub fn response_queue_name(node: &str) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}{NODE_QUEUE_RESPONSE_POSTFIX}")
}

pub fn undo_map_name(node: &str, database: &str) -> String {
    format!("{NODE_QUEUE_PREFIX}{node}.{database}{NODE_QUEUE_UNDO_POSTFIX}")
}

pub fn request_lock_name(database: &str) -> String {
    format!("{NODE_LOCK_PREFIX}{database}")
}

struct DispatcherHandle {
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Per-node message service. One instance per node, shared by every
/// replicated database hosted there.
pub struct MessageService {
    node_name: String,
    substrate: Arc<dyn QueueSubstrate>,
    config: ReplicationConfig,
    metrics: Arc<ReplicationMetrics>,
    next_seq: AtomicU64,
    next_session: AtomicU64,
    inboxes: Mutex<HashMap<u64, Arc<MemoryQueue<ReplicationResponse>>>>,
    requests: Mutex<HashMap<RequestId, Arc<ResponseManager>>>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

impl MessageService {
    pub fn new(
        node_name: impl Into<String>,
        substrate: Arc<dyn QueueSubstrate>,
        config: ReplicationConfig,
        metrics: Arc<ReplicationMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_name: node_name.into(),
            substrate,
            config,
            metrics,
            next_seq: AtomicU64::new(0),
            next_session: AtomicU64::new(0),
            inboxes: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Next cluster-unique request id for this node
    pub fn next_request_id(&self) -> RequestId {
        RequestId::new(
            self.node_name.clone(),
            self.next_seq.fetch_add(1, Ordering::SeqCst),
        )
    }

    /// Start the response demultiplexer for this node's shared response
    /// queue. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock().unwrap();
        if dispatcher.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let service = self.clone();
        let worker = tokio::spawn(service.run_dispatcher(stop_rx));
        *dispatcher = Some(DispatcherHandle {
            stop: stop_tx,
            worker,
        });
    }

    /// Stop the demultiplexer and wait for it to exit.
    pub async fn shutdown(&self) {
        let handle = self.dispatcher.lock().unwrap().take();
        if let Some(DispatcherHandle { stop, worker }) = handle {
            let _ = stop.send(true);
            let _ = worker.await;
        }
    }

    async fn run_dispatcher(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let queue = self
            .substrate
            .response_queue(&response_queue_name(&self.node_name));
        tracing::debug!(node = %self.node_name, "response dispatcher started");

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                taken = queue.take() => match taken {
                    Ok(response) => self.route_response(response).await,
                    Err(e) => {
                        tracing::error!(node = %self.node_name, error = %e,
                            "error taking from response queue");
                        // back off so a failing substrate does not spin the worker
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        tracing::debug!(node = %self.node_name, "response dispatcher stopped");
    }

    /// Deliver a response to the inbox its `destination_session` names (I3);
    /// responses for senders that already returned are reconciled against
    /// the request registry instead.
    async fn route_response(&self, response: ReplicationResponse) {
        let inbox = self
            .inboxes
            .lock()
            .unwrap()
            .get(&response.destination_session)
            .cloned();

        if let Some(inbox) = inbox {
            match inbox
                .offer(response.clone(), self.config.queue_timeout())
                .await
            {
                Ok(true) => {
                    self.metrics.record_response_routed();
                    return;
                }
                Ok(false) => {
                    tracing::warn!(
                        node = %self.node_name,
                        session = response.destination_session,
                        request = %response.request_id,
                        "inbox full, response dropped"
                    );
                    self.metrics.record_response_dropped();
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        node = %self.node_name,
                        session = response.destination_session,
                        error = %e,
                        "failed to hand response to inbox"
                    );
                    self.metrics.record_response_dropped();
                    return;
                }
            }
        }

        let manager = self
            .requests
            .lock()
            .unwrap()
            .get(&response.request_id)
            .cloned();
        match manager {
            Some(manager) if !manager.is_expired() => {
                tracing::debug!(
                    node = %self.node_name,
                    request = %response.request_id,
                    from = %response.sender_node,
                    "late response reconciled asynchronously"
                );
                manager.record(&response.sender_node, response.payload);
            }
            _ => {
                tracing::debug!(
                    node = %self.node_name,
                    request = %response.request_id,
                    from = %response.sender_node,
                    "dropping unroutable response"
                );
                self.metrics.record_response_dropped();
            }
        }
    }

    /// Create a response inbox for one logical sender. Removed from the
    /// registry when the returned handle drops.
    pub fn sender_inbox(self: &Arc<Self>) -> SenderInbox {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(MemoryQueue::bounded(self.config.inbox_capacity));
        self.inboxes.lock().unwrap().insert(session, queue.clone());
        SenderInbox {
            session,
            queue,
            service: Arc::downgrade(self),
        }
    }

    fn remove_inbox(&self, session: u64) {
        self.inboxes.lock().unwrap().remove(&session);
    }

    /// Track an outstanding request for the duration of the returned guard.
    pub fn register_request(
        self: &Arc<Self>,
        manager: Arc<ResponseManager>,
    ) -> RequestRegistration {
        let id = manager.request_id().clone();
        self.requests.lock().unwrap().insert(id.clone(), manager);
        RequestRegistration {
            id,
            service: Arc::downgrade(self),
        }
    }

    pub fn outstanding_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Startup walk of the local request queue: anything already there is
    /// valid work-in-progress for the receiver, not a failure.
    pub fn check_pending_messages(&self, queue: &Arc<dyn Queue<ReplicationRequest>>, name: &str) {
        let pending = queue.len();
        if pending > 0 {
            tracing::info!(
                node = %self.node_name,
                queue = name,
                pending,
                "found pending requests on startup, processing as normal work"
            );
        }
    }
}

/// One logical sender's bounded response inbox (the source keyed these by
/// thread id; here the session id is explicit).
pub struct SenderInbox {
    session: u64,
    queue: Arc<MemoryQueue<ReplicationResponse>>,
    service: Weak<MessageService>,
}

impl SenderInbox {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub async fn poll(&self, timeout: Duration) -> Result<Option<ReplicationResponse>> {
        self.queue.poll(timeout).await
    }
}

impl Drop for SenderInbox {
    fn drop(&mut self) {
        if let Some(service) = self.service.upgrade() {
            service.remove_inbox(self.session);
        }
    }
}

/// RAII registration of an outstanding request
pub struct RequestRegistration {
    id: RequestId,
    service: Weak<MessageService>,
}

impl Drop for RequestRegistration {
    fn drop(&mut self) {
        if let Some(service) = self.service.upgrade() {
            service.requests.lock().unwrap().remove(&self.id);
        }
    }
}
