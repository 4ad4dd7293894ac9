//! Simulator configuration
//!
//! Describes the whole network: where node data lives, the simulated disk
//! partition, the protocol settings shared by every node and the per-node
//! identifier defaults. An empty file yields the stock five-node vehicle.
//!
//! ```toml
//! data_dir = "./ecunet-data"
//!
//! [node.security]
//! max_attempts = 3
//!
//! [[nodes]]
//! address = 0x10
//! writable_dids = [0xF1A0, 0xF1A2]
//! [nodes.default_dids]
//! F190 = "3148474D"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use ecunet_uds::dtc::status_bit;
use ecunet_uds::uds::did;
use ecunet_uds::{ConfigError, NodeConfig, NodeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Node(#[from] ConfigError),

    #[error("Invalid network: {0}")]
    Invalid(String),
}

/// Complete simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Directory holding one identifier file per node
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// File standing in for the disk partition updates are written to
    #[serde(default = "default_backing_file")]
    pub backing_file: PathBuf,

    /// Size of the partition file; defaults to what the OTA layout needs
    #[serde(default)]
    pub backing_size: Option<u64>,

    /// Protocol settings shared by every node
    #[serde(default)]
    pub node: NodeConfig,

    /// Nodes to run; empty means the built-in vehicle
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./ecunet-data")
}

fn default_backing_file() -> PathBuf {
    PathBuf::from("./ecunet-data/partition.img")
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backing_file: default_backing_file(),
            backing_size: None,
            node: NodeConfig::default(),
            nodes: Vec::new(),
        }
    }
}

/// One node of the simulated network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Bus address; must belong to a known node
    pub address: u8,

    /// Label used in logs; defaults to the node's own name
    #[serde(default)]
    pub name: Option<String>,

    /// Identifier -> value, both hex, written when the identifier is missing
    #[serde(default)]
    pub default_dids: BTreeMap<String, String>,

    /// Identifiers WriteDataByIdentifier may change
    #[serde(default)]
    pub writable_dids: Vec<u16>,

    /// DTCs seeded when the node has none stored
    #[serde(default)]
    pub dtcs: Vec<DtcSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtcSpec {
    pub code: u16,
    pub status: u8,
}

impl SimConfig {
    /// Load configuration; `.yaml`/`.yml` files are read as YAML, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimConfigError> {
        self.node.validate()?;

        let mut seen = HashSet::new();
        for spec in &self.nodes {
            let id = spec.id()?;
            if !seen.insert(id) {
                return Err(SimConfigError::Invalid(format!("{} listed twice", id)));
            }
            spec.parsed_dids()?;
        }
        if !self.nodes.is_empty() && !seen.contains(&NodeId::Mcu) {
            return Err(SimConfigError::Invalid(
                "the coordinator (0x10) must be part of the network".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured nodes, or the built-in vehicle when none are listed
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        if self.nodes.is_empty() {
            builtin_nodes()
        } else {
            self.nodes.clone()
        }
    }

    pub fn partition_size(&self) -> u64 {
        self.backing_size
            .unwrap_or_else(|| self.node.ota.partition_size())
    }
}

impl NodeSpec {
    pub fn id(&self) -> Result<NodeId, SimConfigError> {
        NodeId::from_address(self.address).ok_or_else(|| {
            SimConfigError::Invalid(format!("unknown node address 0x{:02X}", self.address))
        })
    }

    pub fn label(&self) -> String {
        match (&self.name, NodeId::from_address(self.address)) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => id.name().to_string(),
            (None, None) => format!("0x{:02X}", self.address),
        }
    }

    /// Default identifiers decoded to raw bytes
    pub fn parsed_dids(&self) -> Result<BTreeMap<u16, Vec<u8>>, SimConfigError> {
        self.default_dids
            .iter()
            .map(|(key, value)| {
                let key = key.trim_start_matches("0x").trim_start_matches("0X");
                let id = u16::from_str_radix(key, 16).map_err(|_| {
                    SimConfigError::Invalid(format!("bad identifier {:?} in node 0x{:02X}", key, self.address))
                })?;
                let bytes = hex::decode(value.replace(' ', "")).map_err(|e| {
                    SimConfigError::Invalid(format!("bad value for 0x{:04X}: {}", id, e))
                })?;
                Ok((id, bytes))
            })
            .collect()
    }
}

fn spec(id: NodeId, dids: &[(u16, &str)], writable: &[u16], dtcs: &[DtcSpec]) -> NodeSpec {
    NodeSpec {
        address: id.address(),
        name: None,
        default_dids: dids
            .iter()
            .map(|(id, value)| (format!("{:04X}", id), value.to_string()))
            .collect(),
        writable_dids: writable.to_vec(),
        dtcs: dtcs.to_vec(),
    }
}

/// The stock vehicle: MCU plus Battery, Engine, Doors and HVAC
pub fn builtin_nodes() -> Vec<NodeSpec> {
    let confirmed = status_bit::CONFIRMED_DTC | status_bit::TEST_FAILED;
    let pending = status_bit::PENDING_DTC | status_bit::TEST_FAILED_THIS_OPERATION_CYCLE;

    vec![
        spec(
            NodeId::Mcu,
            &[
                (did::VIN, "31484743 4D383236 333A3132 33343536"),
                (0xF17F, "45435531 32333435 36373839 303132"),
                (0xF18C, "48573030 31373835 32303232"),
                (did::SOFTWARE_VERSION, "00"),
                (0xF1A0, "53574543 55343536 37"),
                (0xF187, "32304C20 54757262 6F204934"),
                (0xF1A1, "4856342E 352E36"),
                (0xF1A4, "32303232 2D30352D 3135"),
                (0xF1A5, "43464739 38373635 34"),
                (0xF1A8, "43414C32 33343536 37"),
                (0xF1A9, "43564E31 31323233 33"),
                (0xF1AA, "424F4F54 33333434 35"),
                (0xF1AB, "41505035 35363637 37"),
                (0xF1AC, "44415441 37383930 3132"),
                (0xF1AD, "464C4153 48322E33 2E34"),
            ],
            &[0xF1A0, did::SOFTWARE_VERSION, 0xF1A5, 0xF1A8, 0xF1A9],
            &[],
        ),
        spec(
            NodeId::Battery,
            &[
                (did::SOFTWARE_VERSION, "10"),
                (0x01B0, "30"),
                (0x01C0, "64"),
                (0x01D0, "19"),
            ],
            &[],
            &[DtcSpec { code: 0x9600, status: confirmed }],
        ),
        spec(
            NodeId::Engine,
            &[
                (did::SOFTWARE_VERSION, "10"),
                (0x0100, "0320"),
                (0x0110, "5A"),
                (0x0120, "00"),
            ],
            &[0x0120],
            &[
                DtcSpec { code: 0x0100, status: pending },
                DtcSpec { code: 0xC073, status: confirmed },
            ],
        ),
        spec(
            NodeId::Doors,
            &[
                (did::SOFTWARE_VERSION, "10"),
                (0x03A0, "00"),
                (0x03B0, "01"),
                (0x03C0, "00"),
            ],
            &[0x03B0],
            &[],
        ),
        spec(
            NodeId::Hvac,
            &[
                (did::SOFTWARE_VERSION, "10"),
                (0x04A0, "14"),
                (0x04B0, "16"),
                (0x04C0, "03"),
                (0x04D0, "01"),
            ],
            &[0x04B0, 0x04C0, 0x04D0],
            &[DtcSpec { code: 0x4A10, status: pending }],
        ),
    ]
}
