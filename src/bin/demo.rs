//! In-process cluster demo
//!
//! Wires N nodes over the in-memory substrate, replicates a handful of
//! documents through the coordinator, and prints per-node metrics.

use clap::Parser;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repliq::cluster::{ClusterDirectory, MemorySubstrate, ReplicationLayout};
use repliq::common::{ReplicationConfig, ReplicationMetrics};
use repliq::replication::{
    ExecutionMode, MessageService, ReplicatedDatabase, ReplicationRequest,
};
use repliq::tasks::CreateRecordTask;

#[derive(Parser)]
#[command(name = "repliq-demo")]
#[command(about = "replicate documents across an in-process cluster")]
struct Cli {
    /// Number of nodes
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// Write quorum
    #[arg(long, default_value_t = 2)]
    quorum: usize,

    /// Documents to replicate
    #[arg(long, default_value_t = 5)]
    docs: usize,

    /// Database name
    #[arg(long, default_value = "demo")]
    database: String,
}

struct Node {
    name: String,
    messages: Arc<MessageService>,
    database: Arc<ReplicatedDatabase>,
    metrics: Arc<ReplicationMetrics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = repliq::BUILD_INFO, "starting demo cluster");

    let node_names: Vec<String> = (0..cli.nodes).map(|i| format!("node{}", i)).collect();

    let substrate = Arc::new(MemorySubstrate::new());
    let directory = ClusterDirectory::new();
    directory.put_layout(
        &cli.database,
        ReplicationLayout::single_cluster("cl0", node_names.clone(), cli.quorum),
    );

    let config = ReplicationConfig::default();
    let mut nodes = Vec::new();
    for name in &node_names {
        let metrics = ReplicationMetrics::new();
        let messages = MessageService::new(
            name.clone(),
            substrate.clone(),
            config.clone(),
            metrics.clone(),
        );
        messages.start();

        let database = ReplicatedDatabase::new(
            cli.database.clone(),
            directory.node(name.clone()),
            messages.clone(),
            substrate.clone(),
            config.clone(),
            metrics.clone(),
        );
        database.configure_database().await?;

        nodes.push(Node {
            name: name.clone(),
            messages,
            database,
            metrics,
        });
    }

    let origin = &nodes[0];
    let inbox = origin.messages.sender_inbox();

    for i in 0..cli.docs {
        let task = Arc::new(CreateRecordTask::new(
            format!("doc{}", i),
            json!({ "seq": i, "origin": origin.name }),
        ));
        let request = ReplicationRequest::new(
            cli.database.clone(),
            Some("cl0".to_string()),
            ExecutionMode::Response,
            task,
        );

        let response = origin.database.send(&inbox, request).await?;
        if let Some(response) = response {
            tracing::info!(
                doc = i,
                responder = %response.sender_node,
                payload = %response.payload,
                "replicated"
            );
        }
    }

    // Let the slowest replicas catch up before reading metrics
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    for node in &nodes {
        tracing::info!(node = %node.name, metrics = %node.metrics.summary(), "node metrics");
        node.database.shutdown().await;
        node.messages.shutdown().await;
    }

    Ok(())
}
