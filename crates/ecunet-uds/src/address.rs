//! Node addressing on the diagnostic network

use std::fmt;

use serde::{Deserialize, Serialize};

/// 8-bit address of a participant on the bus
pub type NodeAddress = u8;

/// Reserved addresses
pub mod address {
    use super::NodeAddress;

    pub const MCU: NodeAddress = 0x10;
    pub const BATTERY: NodeAddress = 0x11;
    pub const ENGINE: NodeAddress = 0x12;
    pub const DOORS: NodeAddress = 0x13;
    pub const HVAC: NodeAddress = 0x14;
    /// External API actor (tester)
    pub const API: NodeAddress = 0xFA;
    /// Broadcast to every node
    pub const BROADCAST: NodeAddress = 0xFF;
}

/// Nodes that run the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeId {
    Mcu,
    Battery,
    Engine,
    Doors,
    Hvac,
}

impl NodeId {
    /// All peripherals, in address order
    pub const PERIPHERALS: [NodeId; 4] = [NodeId::Battery, NodeId::Engine, NodeId::Doors, NodeId::Hvac];

    /// Every node on the network, coordinator first
    pub const ALL: [NodeId; 5] = [
        NodeId::Mcu,
        NodeId::Battery,
        NodeId::Engine,
        NodeId::Doors,
        NodeId::Hvac,
    ];

    pub fn address(&self) -> NodeAddress {
        match self {
            NodeId::Mcu => address::MCU,
            NodeId::Battery => address::BATTERY,
            NodeId::Engine => address::ENGINE,
            NodeId::Doors => address::DOORS,
            NodeId::Hvac => address::HVAC,
        }
    }

    pub fn from_address(addr: NodeAddress) -> Option<Self> {
        match addr {
            address::MCU => Some(NodeId::Mcu),
            address::BATTERY => Some(NodeId::Battery),
            address::ENGINE => Some(NodeId::Engine),
            address::DOORS => Some(NodeId::Doors),
            address::HVAC => Some(NodeId::Hvac),
            _ => None,
        }
    }

    /// Short lowercase name, also used as the data store path
    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Mcu => "mcu",
            NodeId::Battery => "battery",
            NodeId::Engine => "engine",
            NodeId::Doors => "doors",
            NodeId::Hvac => "hvac",
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, NodeId::Mcu)
    }

    /// Position of a peripheral in the liveness status vector
    pub fn peripheral_index(&self) -> Option<usize> {
        Self::PERIPHERALS.iter().position(|p| p == self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.address())
    }
}

/// True if `addr` belongs to a node running the protocol engine
pub fn is_known_node(addr: NodeAddress) -> bool {
    NodeId::from_address(addr).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip_for_every_node() {
        for node in NodeId::ALL {
            assert_eq!(NodeId::from_address(node.address()), Some(node));
        }
        assert_eq!(NodeId::from_address(address::API), None);
        assert_eq!(NodeId::from_address(0x15), None);
    }

    #[test]
    fn test_peripheral_index() {
        assert_eq!(NodeId::Mcu.peripheral_index(), None);
        assert_eq!(NodeId::Battery.peripheral_index(), Some(0));
        assert_eq!(NodeId::Hvac.peripheral_index(), Some(3));
    }

    #[test]
    fn test_display_includes_hex_address() {
        assert_eq!(NodeId::Doors.to_string(), "doors(0x13)");
    }
}
