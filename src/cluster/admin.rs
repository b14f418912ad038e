//! Cluster administration seam
//!
//! [`ClusterAdmin`] is the narrow capability interface the coordinator sees:
//! node identity, availability, layout lookup, strategy registry, and
//! configuration publication. [`ClusterDirectory`] is the in-process wiring
//! of it, shared by every simulated node; real deployments plug their
//! membership substrate in here.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cluster::layout::ReplicationLayout;
use crate::cluster::partition::{AllPartitionsStrategy, PartitioningStrategy, RoundRobinStrategy};
use crate::common::{Error, ReplicatorUser, Result};
use crate::store::{DocumentStore, MemoryStore};

/// Node health as seen by the membership substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, NodeStatus::Online)
    }
}

/// What the coordinator is allowed to ask the cluster plugin.
pub trait ClusterAdmin: Send + Sync {
    fn local_node_name(&self) -> &str;

    fn is_node_available(&self, node: &str) -> bool;

    /// Shared, mutable layout for `database`
    fn database_configuration(&self, database: &str) -> Result<Arc<RwLock<ReplicationLayout>>>;

    fn partitioning_strategy(&self, name: &str) -> Result<Arc<dyn PartitioningStrategy>>;

    /// Apply a layout document republished by the reconciler
    fn apply_configuration(&self, database: &str, document: &Value) -> Result<()>;

    /// Open the local database session the receiver executes against
    fn open_database(&self, database: &str, user: &ReplicatorUser)
        -> Result<Arc<dyn DocumentStore>>;
}

#[derive(Default)]
struct DirectoryState {
    nodes: RwLock<HashMap<String, NodeStatus>>,
    layouts: RwLock<HashMap<String, Arc<RwLock<ReplicationLayout>>>>,
    strategies: RwLock<HashMap<String, Arc<dyn PartitioningStrategy>>>,
    /// One store per (node, database); created on first open
    stores: RwLock<HashMap<(String, String), Arc<dyn DocumentStore>>>,
}

/// Shared in-process cluster state. Cloning yields a handle onto the same
/// directory; [`ClusterDirectory::node`] derives the per-node view.
#[derive(Clone)]
pub struct ClusterDirectory {
    state: Arc<DirectoryState>,
}

impl Default for ClusterDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterDirectory {
    pub fn new() -> Self {
        let directory = Self {
            state: Arc::new(DirectoryState::default()),
        };
        directory.register_strategy(Arc::new(AllPartitionsStrategy));
        directory.register_strategy(Arc::new(RoundRobinStrategy::default()));
        directory
    }

    /// Mark a node online
    pub fn register_node(&self, node: impl Into<String>) {
        self.state
            .nodes
            .write()
            .unwrap()
            .insert(node.into(), NodeStatus::Online);
    }

    pub fn set_node_status(&self, node: &str, status: NodeStatus) {
        self.state
            .nodes
            .write()
            .unwrap()
            .insert(node.to_string(), status);
    }

    pub fn register_strategy(&self, strategy: Arc<dyn PartitioningStrategy>) {
        self.state
            .strategies
            .write()
            .unwrap()
            .insert(strategy.name().to_string(), strategy);
    }

    /// Plug a concrete store in as node's database, ahead of
    /// [`ClusterAdmin::open_database`]
    pub fn register_store(&self, node: &str, database: &str, store: Arc<dyn DocumentStore>) {
        self.state
            .stores
            .write()
            .unwrap()
            .insert((node.to_string(), database.to_string()), store);
    }

    pub fn put_layout(&self, database: impl Into<String>, layout: ReplicationLayout) {
        self.state
            .layouts
            .write()
            .unwrap()
            .insert(database.into(), Arc::new(RwLock::new(layout)));
    }

    /// Per-node view implementing [`ClusterAdmin`]
    pub fn node(&self, name: impl Into<String>) -> Arc<NodeAdmin> {
        let name = name.into();
        self.register_node(name.clone());
        Arc::new(NodeAdmin {
            directory: self.clone(),
            node: name,
        })
    }

    fn layout(&self, database: &str) -> Result<Arc<RwLock<ReplicationLayout>>> {
        self.state
            .layouts
            .read()
            .unwrap()
            .get(database)
            .cloned()
            .ok_or_else(|| Error::NotConfigured(database.to_string()))
    }
}

/// One node's view of the [`ClusterDirectory`]
pub struct NodeAdmin {
    directory: ClusterDirectory,
    node: String,
}

impl ClusterAdmin for NodeAdmin {
    fn local_node_name(&self) -> &str {
        &self.node
    }

    fn is_node_available(&self, node: &str) -> bool {
        self.directory
            .state
            .nodes
            .read()
            .unwrap()
            .get(node)
            .map(NodeStatus::is_available)
            .unwrap_or(false)
    }

    fn database_configuration(&self, database: &str) -> Result<Arc<RwLock<ReplicationLayout>>> {
        self.directory.layout(database)
    }

    fn partitioning_strategy(&self, name: &str) -> Result<Arc<dyn PartitioningStrategy>> {
        self.directory
            .state
            .strategies
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    fn apply_configuration(&self, database: &str, document: &Value) -> Result<()> {
        let parsed = ReplicationLayout::from_document(document)?;
        let layout = self.directory.layout(database)?;
        *layout.write().unwrap() = parsed;
        tracing::info!(database, node = %self.node, "applied updated replication layout");
        Ok(())
    }

    fn open_database(
        &self,
        database: &str,
        user: &ReplicatorUser,
    ) -> Result<Arc<dyn DocumentStore>> {
        if user.name.is_empty() {
            return Err(Error::InvalidConfig("replicator user is required".into()));
        }

        let key = (self.node.clone(), database.to_string());
        let mut stores = self.directory.state.stores.write().unwrap();
        let store = stores
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryStore::new(database)) as Arc<dyn DocumentStore>)
            .clone();
        tracing::debug!(database, node = %self.node, user = %user.name, "opened replication session");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability() {
        let directory = ClusterDirectory::new();
        let admin = directory.node("a");
        directory.register_node("b");

        assert!(admin.is_node_available("a"));
        assert!(admin.is_node_available("b"));
        assert!(!admin.is_node_available("c"));

        directory.set_node_status("b", NodeStatus::Offline);
        assert!(!admin.is_node_available("b"));
    }

    #[test]
    fn test_unknown_strategy() {
        let directory = ClusterDirectory::new();
        let admin = directory.node("a");
        assert!(admin.partitioning_strategy("all").is_ok());
        assert!(matches!(
            admin.partitioning_strategy("nope"),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_layout_lookup() {
        let directory = ClusterDirectory::new();
        let admin = directory.node("a");
        assert!(matches!(
            admin.database_configuration("db"),
            Err(Error::NotConfigured(_))
        ));

        directory.put_layout(
            "db",
            ReplicationLayout::single_cluster("cl0", vec!["a".into()], 1),
        );
        assert!(admin.database_configuration("db").is_ok());
    }

    #[test]
    fn test_apply_configuration_replaces_layout() {
        let directory = ClusterDirectory::new();
        let admin = directory.node("a");
        directory.put_layout(
            "db",
            ReplicationLayout::single_cluster("cl0", vec!["a".into()], 1),
        );

        let updated =
            ReplicationLayout::single_cluster("cl0", vec!["a".into(), "b".into()], 2);
        admin.apply_configuration("db", &updated.serialize()).unwrap();

        let layout = admin.database_configuration("db").unwrap();
        assert!(layout.read().unwrap().contains_node("b"));
    }

    #[test]
    fn test_open_database_is_per_node() {
        let directory = ClusterDirectory::new();
        let user = ReplicatorUser::default();

        let a = directory.node("a").open_database("db", &user).unwrap();
        let a_again = directory.node("a").open_database("db", &user).unwrap();
        let b = directory.node("b").open_database("db", &user).unwrap();

        a.create("r1", serde_json::json!(1)).unwrap();
        assert!(a_again.read("r1").unwrap().is_some());
        assert!(b.read("r1").unwrap().is_none());
    }
}
