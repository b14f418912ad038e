//! Per-database replication coordinator
//!
//! One [`ReplicatedDatabase`] exists per database per node. Outbound, it
//! broadcasts a request to every replica owning the target partition under
//! the cluster-wide request lock, then blocks on the sender inbox until the
//! write quorum is met or the synchronous timeout expires. Inbound, a single
//! long-lived worker drains this node's request queue, persists the in-flight
//! request to the crash-durable undo slot, executes it locally, and ships the
//! response back to the originator.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cluster::admin::ClusterAdmin;
use crate::cluster::substrate::{KeyedMap, Queue, QueueSubstrate};
use crate::common::{Error, ReplicationConfig, ReplicationMetrics, Result};
use crate::replication::messages::{
    request_lock_name, request_queue_name, response_queue_name, undo_map_name, MessageService,
    SenderInbox, CONFIG_DATABASE_PREFIX, CONFIG_MAP_NAME,
};
use crate::replication::request::{
    ExecutionContext, ExecutionMode, ReplicationRequest, ReplicationResponse,
};
use crate::replication::responses::ResponseManager;
use crate::store::DocumentStore;

struct ReceiverHandle {
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Replication coordinator for one database on one node.
pub struct ReplicatedDatabase {
    database_name: String,
    admin: Arc<dyn ClusterAdmin>,
    messages: Arc<MessageService>,
    substrate: Arc<dyn QueueSubstrate>,
    config: ReplicationConfig,
    metrics: Arc<ReplicationMetrics>,
    store: Mutex<Option<Arc<dyn DocumentStore>>>,
    receiver: Mutex<Option<ReceiverHandle>>,
}

impl ReplicatedDatabase {
    pub fn new(
        database_name: impl Into<String>,
        admin: Arc<dyn ClusterAdmin>,
        messages: Arc<MessageService>,
        substrate: Arc<dyn QueueSubstrate>,
        config: ReplicationConfig,
        metrics: Arc<ReplicationMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            database_name: database_name.into(),
            admin,
            messages,
            substrate,
            config,
            metrics,
            store: Mutex::new(None),
            receiver: Mutex::new(None),
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The local database session, once [`configure_database`] ran.
    ///
    /// [`configure_database`]: ReplicatedDatabase::configure_database
    pub fn database(&self) -> Option<Arc<dyn DocumentStore>> {
        self.store.lock().unwrap().clone()
    }

    /// Broadcast `request` to every replica owning its target partition and
    /// wait for the write quorum.
    ///
    /// Returns `Ok(None)` for [`ExecutionMode::NoResponse`] requests.
    pub async fn send(
        &self,
        inbox: &SenderInbox,
        mut request: ReplicationRequest,
    ) -> Result<Option<ReplicationResponse>> {
        let local_node = self.admin.local_node_name().to_string();
        let cluster = request.cluster.clone();
        let layout = self.admin.database_configuration(&request.database)?;

        let (strategy_name, write_quorum) = {
            let layout = layout.read().unwrap();
            (
                layout.partition_strategy(cluster.as_deref()).to_string(),
                layout.write_quorum(cluster.as_deref()),
            )
        };

        let strategy = self.admin.partitioning_strategy(&strategy_name)?;
        let partition = {
            let layout = layout.read().unwrap();
            strategy.partition(&layout, &request.database, cluster.as_deref())?
        };
        let nodes = partition.nodes();

        let quorum = if request.task.is_write_operation() {
            write_quorum
        } else {
            nodes.len()
        };

        let queues: Vec<(String, Arc<dyn Queue<ReplicationRequest>>)> = nodes
            .iter()
            .map(|node| {
                let name = request_queue_name(node, &request.database);
                let queue = self.substrate.request_queue(&name);
                (name, queue)
            })
            .collect();

        request.id = self.messages.next_request_id();
        request.sender_node = local_node.clone();
        request.sender_session = inbox.session();

        let mut available = 0;
        for node in nodes {
            if self.admin.is_node_available(node) {
                available += 1;
            } else {
                tracing::debug!(
                    node = %node,
                    request = %request.id,
                    "node is offline, skip listening for its response"
                );
            }
        }

        let expected_synchronous = available.min(quorum);
        let execute_on_local = partition.contains(&local_node);

        let manager = Arc::new(ResponseManager::new(
            request.id.clone(),
            nodes.to_vec(),
            expected_synchronous,
            quorum,
            execute_on_local,
            local_node.clone(),
            request.task.total_timeout(nodes.len()),
        ));
        let _registration = self.messages.register_request(manager.clone());

        tracing::debug!(
            node = %local_node,
            to = %partition,
            request = %request,
            "out: broadcasting request"
        );

        let timeout = self.config.queue_timeout();
        let lock = self.substrate.lock(&request_lock_name(&request.database));

        // The lock linearizes the fan-out: every receiver sees requests from
        // concurrent senders in the same global order.
        lock.lock().await;
        let fan_out = self.offer_to_all(&queues, &request, timeout).await;
        lock.unlock();
        fan_out?;

        self.metrics.record_sent();

        self.collect_responses(inbox, &request, &manager).await
    }

    async fn offer_to_all(
        &self,
        queues: &[(String, Arc<dyn Queue<ReplicationRequest>>)],
        request: &ReplicationRequest,
        timeout: Duration,
    ) -> Result<()> {
        for (name, queue) in queues {
            let offered =
                queue
                    .offer(request.clone(), timeout)
                    .await
                    .map_err(|e| Error::SendFailed {
                        database: request.database.clone(),
                        reason: format!("offer to '{}' failed: {}", name, e),
                    })?;
            if !offered {
                return Err(Error::SendFailed {
                    database: request.database.clone(),
                    reason: format!("offer to '{}' timed out after {:?}", name, timeout),
                });
            }
        }
        Ok(())
    }

    /// Drain the sender inbox until the synchronous phase completes or the
    /// synchronous timeout expires, then reduce per the task's strategy.
    async fn collect_responses(
        &self,
        inbox: &SenderInbox,
        request: &ReplicationRequest,
        manager: &ResponseManager,
    ) -> Result<Option<ReplicationResponse>> {
        if request.mode == ExecutionMode::NoResponse {
            return Ok(None);
        }

        let begin = Instant::now();
        let synch_timeout = request
            .task
            .synchronous_timeout(manager.expected_synchronous());

        let mut first_arrived = false;

        // Wait for the minimum synchronous responses (write quorum)
        while manager.should_wait_for_sync() {
            let remaining = synch_timeout.saturating_sub(begin.elapsed());
            match inbox.poll(remaining).await? {
                Some(response) => {
                    if response.request_id != request.id {
                        // Cross-talk for another outstanding request on this
                        // inbox, discard it
                        tracing::debug!(
                            request = %request.id,
                            received = %response.request_id,
                            "discarding response for another request"
                        );
                        continue;
                    }

                    tracing::debug!(
                        request = %request.id,
                        from = %response.sender_node,
                        "in: received response"
                    );
                    manager.record(&response.sender_node, response.payload);
                    first_arrived = true;
                }
                None => {
                    tracing::warn!(
                        request = %request.id,
                        elapsed_ms = begin.elapsed().as_millis() as u64,
                        expected = ?manager.expected_nodes(),
                        responded = ?manager.responding_nodes(),
                        "timeout waiting for synchronous responses"
                    );
                    break;
                }
            }
        }

        if manager.is_execute_on_local() && !manager.received_current_node() {
            tracing::warn!(
                request = %request.id,
                "no response received from the local node"
            );
        }

        if !manager.quorum_reached() && manager.mark_undo_fired() {
            tracing::warn!(
                request = %request.id,
                received = manager.received_count(),
                quorum = manager.quorum(),
                "quorum shortfall, undoing request"
            );
            self.metrics.record_undo_compensation();
            request.task.undo();
        }

        if !first_arrived && manager.received_count() == 0 {
            return Err(Error::NoResponse {
                request: request.id.to_string(),
                nodes: manager.expected_nodes().join(","),
            });
        }

        let (responder, payload) = manager
            .result(request.task.result_strategy())
            .ok_or_else(|| Error::NoResponse {
                request: request.id.to_string(),
                nodes: manager.expected_nodes().join(","),
            })?;

        self.metrics.observe_send_latency(begin.elapsed());

        Ok(Some(ReplicationResponse {
            request_id: request.id.clone(),
            sender_node: responder,
            destination_node: request.sender_node.clone(),
            destination_session: request.sender_session,
            payload,
        }))
    }

    /// Bring this database online: open the local session, re-execute any
    /// crashed in-flight request from the undo slot, surface pending queue
    /// work, start the receiver worker, and reconcile the local node into
    /// the partition layout.
    pub async fn configure_database(self: &Arc<Self>) -> Result<()> {
        if self.receiver.lock().unwrap().is_some() {
            return Ok(());
        }

        let local_node = self.admin.local_node_name().to_string();

        let store = self
            .admin
            .open_database(&self.database_name, &self.config.replicator_user)?;
        *self.store.lock().unwrap() = Some(store);

        let queue_name = request_queue_name(&local_node, &self.database_name);
        let queue = self.substrate.request_queue(&queue_name);
        tracing::debug!(
            node = %local_node,
            queue = %queue_name,
            "listening for incoming requests"
        );

        // Undo slot first: recovery must finish before normal draining begins
        let undo_map = self.restore_request_before_failure(&local_node).await;

        self.messages.check_pending_messages(&queue, &queue_name);

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(self.clone().run_receiver(queue, undo_map, stop_rx));
        *self.receiver.lock().unwrap() = Some(ReceiverHandle {
            stop: stop_tx,
            worker,
        });

        self.reconcile_local_node().await?;

        Ok(())
    }

    /// Stop the receiver and close the database session.
    ///
    /// Ordered as interrupt, join, close: the store is only dropped once the
    /// worker acknowledged the stop.
    pub async fn shutdown(&self) {
        let handle = self.receiver.lock().unwrap().take();
        if let Some(ReceiverHandle { stop, worker }) = handle {
            let _ = stop.send(true);
            let _ = worker.await;
        }
        *self.store.lock().unwrap() = None;
        tracing::debug!(database = %self.database_name, "replicated database shut down");
    }

    async fn run_receiver(
        self: Arc<Self>,
        queue: Arc<dyn Queue<ReplicationRequest>>,
        undo_map: Arc<dyn KeyedMap<ReplicationRequest>>,
        mut stop: watch::Receiver<bool>,
    ) {
        let local_node = self.admin.local_node_name().to_string();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                taken = queue.take() => match taken {
                    Ok(message) => {
                        let sender = message.sender_node.clone();
                        if let Err(e) = self.process_inbound(&undo_map, message).await {
                            tracing::error!(
                                node = %local_node,
                                from = %sender,
                                error = %e,
                                "error on reading distributed request"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(node = %local_node, error = %e,
                            "error taking from request queue");
                        // back off so a failing substrate does not spin the worker
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        tracing::debug!(
            node = %local_node,
            database = %self.database_name,
            "receiver worker stopped"
        );
    }

    /// One receive-execute-acknowledge cycle. The undo slot is written
    /// before execution and cleared only after the response was dispatched,
    /// so a crash anywhere in between leaves the request recoverable.
    async fn process_inbound(
        &self,
        undo_map: &Arc<dyn KeyedMap<ReplicationRequest>>,
        message: ReplicationRequest,
    ) -> Result<()> {
        undo_map.put(&self.database_name, message.clone()).await?;
        self.on_message(&message).await?;
        undo_map.remove(&self.database_name).await?;
        Ok(())
    }

    /// Execute the remote call on the local node and send back the result.
    async fn on_message(&self, request: &ReplicationRequest) -> Result<()> {
        self.metrics.record_received();
        let local_node = self.admin.local_node_name().to_string();

        let store = self
            .database()
            .ok_or_else(|| Error::NotConfigured(self.database_name.clone()))?;

        tracing::debug!(
            node = %local_node,
            from = %request.sender_node,
            request = %request,
            "in: executing request"
        );

        let ctx = ExecutionContext::distributed(
            &self.database_name,
            local_node.clone(),
            request.sender_node.clone(),
        );

        // Always leave a clean read-through cache, even when execution fails
        let executed = request.task.execute(&ctx, store.as_ref());
        store.clear_cache();
        let payload = executed?;

        tracing::debug!(
            node = %local_node,
            to = %request.sender_node,
            request = %request.id,
            "out: sending back response"
        );

        let response = ReplicationResponse {
            request_id: request.id.clone(),
            sender_node: local_node,
            destination_node: request.sender_node.clone(),
            destination_session: request.sender_session,
            payload,
        };

        let queue = self
            .substrate
            .response_queue(&response_queue_name(&request.sender_node));
        let offered = queue
            .offer(response, self.config.queue_timeout())
            .await
            .map_err(|e| Error::DispatchFailed {
                node: request.sender_node.clone(),
                session: request.sender_session,
                reason: e.to_string(),
            })?;
        if !offered {
            return Err(Error::DispatchFailed {
                node: request.sender_node.clone(),
                session: request.sender_session,
                reason: format!(
                    "offer timed out after {:?}",
                    self.config.queue_timeout()
                ),
            });
        }

        Ok(())
    }

    /// Re-execute the request the previous process incarnation took but never
    /// acknowledged. Failures are logged and swallowed; the receiver must
    /// still start.
    async fn restore_request_before_failure(
        &self,
        local_node: &str,
    ) -> Arc<dyn KeyedMap<ReplicationRequest>> {
        let undo_map = self
            .substrate
            .undo_map(&undo_map_name(local_node, &self.database_name));

        match undo_map.remove(&self.database_name).await {
            Ok(Some(request)) => {
                tracing::warn!(
                    database = %self.database_name,
                    request = %request,
                    "restoring last replication request taken before the crash"
                );
                self.metrics.record_crash_restore();
                if let Err(e) = self.on_message(&request).await {
                    tracing::error!(
                        database = %self.database_name,
                        error = %e,
                        "error on executing restored request"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    database = %self.database_name,
                    error = %e,
                    "cannot read undo slot"
                );
            }
        }

        undo_map
    }

    /// Guarantee the local node appears in the partition layout of every
    /// cluster of this database, filling `$newNode` placeholders and
    /// republishing the configuration when it changed.
    async fn reconcile_local_node(&self) -> Result<()> {
        let local_node = self.admin.local_node_name().to_string();

        let layout = match self.admin.database_configuration(&self.database_name) {
            Ok(layout) => layout,
            Err(Error::NotConfigured(_)) => {
                tracing::debug!(
                    database = %self.database_name,
                    "no replication layout to reconcile"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let document = {
            let mut layout = layout.write().unwrap();
            if layout.contains_node(&local_node) {
                return Ok(());
            }

            let filled = layout.fill_new_node_slots(&local_node);
            if filled.is_empty() {
                tracing::debug!(
                    database = %self.database_name,
                    node = %local_node,
                    "no open partition slot for the local node"
                );
                return Ok(());
            }

            for (cluster, index) in &filled {
                tracing::info!(
                    node = %local_node,
                    partition = format!("{}.{}.{}", self.database_name, cluster, index),
                    "adding local node to partition"
                );
            }
            layout.serialize()
        };

        let config_map = self.substrate.config_map(CONFIG_MAP_NAME);
        config_map
            .put(
                &format!("{CONFIG_DATABASE_PREFIX}{}", self.database_name),
                document.clone(),
            )
            .await?;
        self.admin
            .apply_configuration(&self.database_name, &document)?;

        Ok(())
    }
}
