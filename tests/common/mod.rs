//! Shared in-process cluster harness for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use repliq::cluster::{ClusterDirectory, MemorySubstrate, NodeStatus, ReplicationLayout};
use repliq::common::{ReplicationConfig, ReplicationMetrics};
use repliq::replication::{MessageService, ReplicatedDatabase};

pub struct TestNode {
    pub name: String,
    pub messages: Arc<MessageService>,
    pub database: Arc<ReplicatedDatabase>,
    pub metrics: Arc<ReplicationMetrics>,
}

pub struct TestCluster {
    pub database_name: String,
    pub substrate: Arc<MemorySubstrate>,
    pub directory: ClusterDirectory,
    pub config: ReplicationConfig,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// One cluster `cl0` with a single partition of `node_names`, all nodes
    /// configured and draining.
    pub async fn start(database: &str, node_names: &[&str], write_quorum: usize) -> Self {
        let layout = ReplicationLayout::single_cluster(
            "cl0",
            node_names.iter().map(|n| n.to_string()).collect(),
            write_quorum,
        );
        Self::start_with_layout(database, node_names, layout).await
    }

    /// Custom layout; only `node_names` get configured.
    pub async fn start_with_layout(
        database: &str,
        node_names: &[&str],
        layout: ReplicationLayout,
    ) -> Self {
        let directory = ClusterDirectory::new();
        directory.put_layout(database, layout);

        let mut cluster = Self {
            database_name: database.to_string(),
            substrate: Arc::new(MemorySubstrate::new()),
            directory,
            config: ReplicationConfig::default(),
            nodes: Vec::new(),
        };

        for name in node_names {
            cluster.spawn_node(name).await;
        }
        cluster
    }

    /// Start (or restart) one node's message service and database.
    pub async fn spawn_node(&mut self, name: &str) -> &TestNode {
        let metrics = ReplicationMetrics::new();
        let messages = MessageService::new(
            name,
            self.substrate.clone(),
            self.config.clone(),
            metrics.clone(),
        );
        messages.start();

        let database = ReplicatedDatabase::new(
            self.database_name.clone(),
            self.directory.node(name),
            messages.clone(),
            self.substrate.clone(),
            self.config.clone(),
            metrics.clone(),
        );
        database
            .configure_database()
            .await
            .expect("configure_database failed");

        self.nodes.push(TestNode {
            name: name.to_string(),
            messages,
            database,
            metrics,
        });
        self.nodes.last().unwrap()
    }

    pub fn node(&self, name: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("unknown node {}", name))
    }

    /// Stop a node without touching the shared substrate, simulating a
    /// process exit.
    pub async fn stop_node(&mut self, name: &str) {
        if let Some(index) = self.nodes.iter().position(|n| n.name == name) {
            let node = self.nodes.remove(index);
            node.database.shutdown().await;
            node.messages.shutdown().await;
            self.directory.set_node_status(name, NodeStatus::Offline);
        }
    }

    pub async fn shutdown(mut self) {
        while let Some(node) = self.nodes.pop() {
            node.database.shutdown().await;
            node.messages.shutdown().await;
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
