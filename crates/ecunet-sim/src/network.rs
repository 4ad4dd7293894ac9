//! Network bootstrap: stores, channels and every configured node

use std::sync::Arc;

use ecunet_uds::dtc::dtc_path;
use ecunet_uds::store::DidMap;
use ecunet_uds::{
    BackingStore, BusChannel, DataStore, FileBackingStore, FileStore, Node, NodeError, NodeId,
    ResetStrategy, ServiceContext, StoreError, VirtualBus,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{NodeSpec, SimConfig, SimConfigError};
use crate::reset::NodeRestart;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Config(#[from] SimConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to start {node}: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },
}

/// Every running node plus the two channels they share
pub struct Network {
    bus: Arc<VirtualBus>,
    api: Arc<VirtualBus>,
    store: Arc<dyn DataStore>,
    nodes: Vec<Node>,
}

impl Network {
    /// Start the network on file-backed stores under the configured paths
    pub async fn start(config: &SimConfig) -> Result<Self, NetworkError> {
        let store = Arc::new(FileStore::new(&config.data_dir)?);
        let backing = Arc::new(FileBackingStore::open(
            &config.backing_file,
            config.partition_size(),
        )?);
        info!(
            data_dir = %config.data_dir.display(),
            backing = %config.backing_file.display(),
            "Opened stores"
        );
        Self::start_with(config, store, backing, Arc::new(NodeRestart)).await
    }

    /// Start the network on caller-provided collaborators
    pub async fn start_with(
        config: &SimConfig,
        store: Arc<dyn DataStore>,
        backing: Arc<dyn BackingStore>,
        reset: Arc<dyn ResetStrategy>,
    ) -> Result<Self, NetworkError> {
        config.validate()?;

        let bus = Arc::new(VirtualBus::new("bus"));
        let api = Arc::new(VirtualBus::new("api"));

        // Coordinator first so it sees the peripherals announce themselves
        let mut specs = config.node_specs();
        specs.sort_by_key(|s| s.address);

        let mut nodes = Vec::with_capacity(specs.len());
        for spec in &specs {
            let id = spec.id()?;
            seed_defaults(store.as_ref(), id, spec)?;

            let ctx = ServiceContext::new(id, config.node.clone(), store.clone(), backing.clone())
                .with_writable_dids(spec.writable_dids.iter().copied())
                .with_reset_strategy(reset.clone());

            let started = if id.is_coordinator() {
                Node::start_coordinator(ctx, bus.clone(), api.clone()).await
            } else {
                Node::start_peripheral(ctx, bus.clone()).await
            };
            match started {
                Ok(node) => {
                    info!(node = %id, label = %spec.label(), "Node running");
                    nodes.push(node);
                }
                Err(source) => {
                    for node in nodes.iter().rev() {
                        node.shutdown().await;
                    }
                    return Err(NetworkError::Node { node: id, source });
                }
            }
        }

        Ok(Self {
            bus,
            api,
            store,
            nodes,
        })
    }

    /// Channel shared by the nodes
    pub fn bus(&self) -> Arc<dyn BusChannel> {
        self.bus.clone()
    }

    /// Channel the API actor talks to the coordinator on
    pub fn api(&self) -> Arc<dyn BusChannel> {
        self.api.clone()
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Stop a single node, e.g. to watch the coordinator notice it is gone
    pub async fn stop_node(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(node) => {
                node.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Stop peripherals first, the coordinator last
    pub async fn shutdown(&self) {
        for node in self.nodes.iter().rev() {
            node.shutdown().await;
        }
        info!("Network stopped");
    }
}

/// Write the node's default identifiers and DTCs where none are stored yet
fn seed_defaults(store: &dyn DataStore, id: NodeId, spec: &NodeSpec) -> Result<(), NetworkError> {
    let mut values = store.read_all(id.name())?;
    let mut added = 0;
    for (did, value) in spec.parsed_dids()? {
        values.entry(did).or_insert_with(|| {
            added += 1;
            value
        });
    }
    if added > 0 {
        store.write_all(id.name(), &values)?;
        debug!(node = %id, added, "Seeded default identifiers");
    }

    let path = dtc_path(id);
    if !spec.dtcs.is_empty() && store.read_all(&path)?.is_empty() {
        let dtcs: DidMap = spec
            .dtcs
            .iter()
            .map(|d| (d.code, vec![d.status]))
            .collect();
        store.write_all(&path, &dtcs)?;
        debug!(node = %id, count = spec.dtcs.len(), "Seeded DTCs");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ecunet_uds::uds::did;
    use ecunet_uds::LoggingReset;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DtcSpec;

    #[test]
    fn test_seeding_keeps_existing_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.write("hvac", did::SOFTWARE_VERSION, &[0x21]).unwrap();

        let mut spec = crate::config::builtin_nodes().remove(4);
        spec.dtcs = vec![DtcSpec { code: 0x4A10, status: 0x09 }];
        seed_defaults(&store, NodeId::Hvac, &spec).unwrap();

        assert_eq!(store.read("hvac", did::SOFTWARE_VERSION).unwrap(), vec![0x21]);
        assert_eq!(store.read("hvac", 0x04B0).unwrap(), vec![0x16]);
        assert_eq!(store.read("hvac.dtc", 0x4A10).unwrap(), vec![0x09]);

        // DTCs are only seeded into an empty store
        store
            .write_all("hvac.dtc", &DidMap::from([(0x1111, vec![0x01])]))
            .unwrap();
        seed_defaults(&store, NodeId::Hvac, &spec).unwrap();
        assert!(store.read("hvac.dtc", 0x4A10).is_err());
    }

    #[tokio::test]
    async fn test_file_backed_network_starts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimConfig {
            data_dir: dir.path().join("data"),
            backing_file: dir.path().join("partition.img"),
            ..SimConfig::default()
        };

        let network = Network::start(&config).await.unwrap();
        assert_eq!(network.nodes().len(), 5);
        assert!(network.node(NodeId::Mcu).unwrap().is_running());
        assert!(dir.path().join("data/mcu.toml").exists());

        network.shutdown().await;
        assert!(network.nodes().iter().all(|n| !n.is_running()));
    }

    #[tokio::test]
    async fn test_network_without_coordinator_is_rejected() {
        let config: SimConfig = toml::from_str("[[nodes]]\naddress = 0x11\n").unwrap();
        let result = Network::start_with(
            &config,
            Arc::new(ecunet_uds::MemoryStore::new()),
            Arc::new(ecunet_uds::MemoryBackingStore::new(config.partition_size())),
            Arc::new(LoggingReset),
        )
        .await;
        assert!(matches!(result, Err(NetworkError::Config(_))));
    }
}
