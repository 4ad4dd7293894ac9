//! Full-network integration tests for ecunet
//!
//! [`NetworkHarness`] starts the coordinator and all four peripherals on an
//! in-process bus and plays the external API actor (0xFA).
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p ecunet-tests
//! ```
//!
//! # Test Structure
//!
//! - `network_test.rs` - routing, security mirroring and liveness
//! - `ota_test.rs` - firmware update of a peripheral through the coordinator

use std::sync::Arc;
use std::time::Duration;

use ecunet_sim::{ApiClient, ClientError, Network, NetworkError, NodeRestart, SimConfig};
use ecunet_uds::address::address;
use ecunet_uds::frame::CanFrame;
use ecunet_uds::security::compute_key;
use ecunet_uds::uds::{security_level, service_id};
use ecunet_uds::{
    DataStore, FileBackingStore, FileStore, Frame, MemoryBackingStore, MemoryStore,
    NodeId, StoreError,
};
use tempfile::TempDir;
use tracing::debug;

/// Default wait for a reply
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the harness keeps node data
pub enum Storage {
    Memory {
        store: Arc<MemoryStore>,
        backing: Arc<MemoryBackingStore>,
    },
    Disk(TempDir),
}

/// A running network plus the API actor driving it
pub struct NetworkHarness {
    network: Network,
    client: ApiClient,
    storage: Storage,
}

impl NetworkHarness {
    /// Built-in vehicle on in-memory stores
    pub async fn start() -> Result<Self, NetworkError> {
        Self::start_with(SimConfig::default()).await
    }

    /// In-memory network with a custom configuration
    pub async fn start_with(config: SimConfig) -> Result<Self, NetworkError> {
        let store = Arc::new(MemoryStore::new());
        let backing = Arc::new(MemoryBackingStore::new(config.partition_size()));
        let network = Network::start_with(
            &config,
            store.clone(),
            backing.clone(),
            Arc::new(NodeRestart),
        )
        .await?;
        Ok(Self::attach(network, Storage::Memory { store, backing }))
    }

    /// Built-in vehicle on file-backed stores in a temporary directory
    pub async fn start_on_disk() -> Result<Self, NetworkError> {
        let dir = tempfile::tempdir().map_err(StoreError::from)?;
        let config = SimConfig {
            data_dir: dir.path().join("data"),
            backing_file: dir.path().join("partition.img"),
            ..SimConfig::default()
        };
        let store = Arc::new(FileStore::new(&config.data_dir)?);
        let backing = Arc::new(FileBackingStore::open(
            &config.backing_file,
            config.partition_size(),
        )?);
        let network =
            Network::start_with(&config, store, backing, Arc::new(NodeRestart)).await?;
        Ok(Self::attach(network, Storage::Disk(dir)))
    }

    fn attach(network: Network, storage: Storage) -> Self {
        let client = ApiClient::new(network.api());
        Self {
            network,
            client,
            storage,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Data store shared by every node
    pub fn store(&self) -> &Arc<dyn DataStore> {
        self.network.store()
    }

    /// Partition in use, if the harness runs in memory
    pub fn memory_backing(&self) -> Option<&Arc<MemoryBackingStore>> {
        match &self.storage {
            Storage::Memory { backing, .. } => Some(backing),
            Storage::Disk(_) => None,
        }
    }

    /// Send `data` to `receiver` and wait for its final answer
    pub async fn request(&mut self, receiver: u8, data: &[u8]) -> Result<Frame, ClientError> {
        self.client.drain();
        let reply = self.client.request(receiver, data, REPLY_TIMEOUT).await?;
        debug!(reply = %reply, "Harness received");
        Ok(reply)
    }

    /// Send without waiting
    pub async fn send(&self, receiver: u8, data: &[u8]) -> Result<(), ClientError> {
        self.client.send(receiver, data).await
    }

    /// Put a raw physical frame on the API channel
    pub async fn send_raw(&self, can: CanFrame) -> Result<(), ClientError> {
        self.network.api().send(can).await?;
        Ok(())
    }

    /// Next frame for the API actor, if one arrives within `wait`
    pub async fn next_reply(&mut self, wait: Duration) -> Option<Frame> {
        tokio::time::timeout(wait, self.client.recv())
            .await
            .ok()
            .and_then(Result::ok)
    }

    /// Seed/key exchange with the coordinator; returns the key reply
    pub async fn unlock(&mut self) -> Result<Frame, ClientError> {
        let seed = self
            .request(
                address::MCU,
                &[service_id::SECURITY_ACCESS, security_level::REQUEST_SEED],
            )
            .await?;
        let mut key = vec![service_id::SECURITY_ACCESS, security_level::SEND_KEY];
        key.extend(compute_key(seed.data.get(2..).unwrap_or_default()));
        self.request(address::MCU, &key).await
    }

    /// Stop one node while the rest keep running
    pub async fn stop_node(&self, id: NodeId) -> bool {
        self.network.stop_node(id).await
    }

    pub async fn shutdown(self) {
        self.network.shutdown().await;
    }
}
