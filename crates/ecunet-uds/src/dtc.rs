//! Diagnostic trouble codes
//!
//! DTCs are kept in the node's data store under the path `"<node>.dtc"`,
//! keyed by the 16-bit code with a one-byte status as value.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::NodeId;
use crate::store::{DataStore, StoreError};

/// DTC status byte bits
pub mod status_bit {
    pub const TEST_FAILED: u8 = 0x01;
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
    pub const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR: u8 = 0x10;
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;
    pub const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE: u8 = 0x40;
    pub const WARNING_INDICATOR_REQUESTED: u8 = 0x80;
}

/// Group selecting every DTC in a clear request
pub const GROUP_ALL: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// DTC category, encoded in bits 7-6 of the high byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcCategory {
    Powertrain,
    Chassis,
    Body,
    Network,
}

impl DtcCategory {
    pub fn from_dtc_high_byte(high_byte: u8) -> Self {
        match (high_byte >> 6) & 0x03 {
            0 => DtcCategory::Powertrain,
            1 => DtcCategory::Chassis,
            2 => DtcCategory::Body,
            _ => DtcCategory::Network,
        }
    }

    /// Category byte used by clear requests (01 P, 02 B, 03 C, 04 U)
    pub fn from_group_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(DtcCategory::Powertrain),
            0x02 => Some(DtcCategory::Body),
            0x03 => Some(DtcCategory::Chassis),
            0x04 => Some(DtcCategory::Network),
            _ => None,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            DtcCategory::Powertrain => 'P',
            DtcCategory::Chassis => 'C',
            DtcCategory::Body => 'B',
            DtcCategory::Network => 'U',
        }
    }
}

/// One stored DTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtc {
    pub code: u16,
    pub status: u8,
}

impl Dtc {
    pub fn category(&self) -> DtcCategory {
        DtcCategory::from_dtc_high_byte((self.code >> 8) as u8)
    }

    /// `[hi, lo, status]` as reported by ReadDTCInformation
    pub fn to_record(&self) -> [u8; 3] {
        let [hi, lo] = self.code.to_be_bytes();
        [hi, lo, self.status]
    }
}

impl fmt::Display for Dtc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04X}", self.category().prefix(), self.code & 0x3FFF)
    }
}

/// Which DTCs a clear request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearGroup {
    All,
    Category(DtcCategory),
    Single(DtcCategory, u16),
}

impl ClearGroup {
    /// Parse the 3-byte group of a ClearDiagnosticInformation request
    pub fn parse(group: [u8; 3]) -> Option<Self> {
        if group == GROUP_ALL {
            return Some(ClearGroup::All);
        }
        let category = DtcCategory::from_group_code(group[0])?;
        let code = u16::from_be_bytes([group[1], group[2]]);
        if code == 0 {
            Some(ClearGroup::Category(category))
        } else {
            Some(ClearGroup::Single(category, code))
        }
    }

    fn matches(&self, dtc: &Dtc) -> bool {
        match self {
            ClearGroup::All => true,
            ClearGroup::Category(category) => dtc.category() == *category,
            ClearGroup::Single(category, code) => {
                dtc.code == *code && dtc.category() == *category
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DtcError {
    #[error("No stored DTC matches {0:?}")]
    NotFound(ClearGroup),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store path for a node's DTCs
pub fn dtc_path(node: NodeId) -> String {
    format!("{}.dtc", node.name())
}

/// Every DTC stored for `node`, ordered by code
pub fn load(store: &dyn DataStore, node: NodeId) -> Result<Vec<Dtc>, StoreError> {
    Ok(store
        .read_all(&dtc_path(node))?
        .into_iter()
        .filter_map(|(code, value)| value.first().map(|&status| Dtc { code, status }))
        .collect())
}

/// DTCs whose status shares a bit with `mask`
pub fn matching(dtcs: &[Dtc], mask: u8) -> Vec<Dtc> {
    dtcs.iter().filter(|d| d.status & mask != 0).copied().collect()
}

/// Union of the statuses of `dtcs`, restricted to the supported bits
pub fn availability(dtcs: &[Dtc], supported: u8) -> u8 {
    dtcs.iter().fold(0u8, |acc, d| acc | d.status) & supported
}

/// Remove the DTCs selected by `group`; returns how many were cleared
pub fn clear(store: &dyn DataStore, node: NodeId, group: ClearGroup) -> Result<usize, DtcError> {
    let path = dtc_path(node);
    let mut values = store.read_all(&path)?;
    let before = values.len();

    values.retain(|&code, value| {
        let status = value.first().copied().unwrap_or_default();
        !group.matches(&Dtc { code, status })
    });

    let cleared = before - values.len();
    if cleared == 0 && matches!(group, ClearGroup::Single(..)) {
        return Err(DtcError::NotFound(group));
    }

    store.write_all(&path, &values)?;
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::new().with_values(
            "engine.dtc",
            [
                (0x0190, vec![0x24]),
                (0x0196, vec![0x2F]),
                (0x9A01, vec![0x08]),
                (0xC101, vec![0x00]),
            ],
        )
    }

    #[test]
    fn test_category_and_display() {
        let dtc = Dtc {
            code: 0x9A01,
            status: 0x08,
        };
        assert_eq!(dtc.category(), DtcCategory::Body);
        assert_eq!(dtc.to_string(), "B1A01");
        assert_eq!(dtc.to_record(), [0x9A, 0x01, 0x08]);
    }

    #[test]
    fn test_parse_clear_group() {
        assert_eq!(ClearGroup::parse([0xFF, 0xFF, 0xFF]), Some(ClearGroup::All));
        assert_eq!(
            ClearGroup::parse([0x02, 0x00, 0x00]),
            Some(ClearGroup::Category(DtcCategory::Body))
        );
        assert_eq!(
            ClearGroup::parse([0x01, 0x01, 0x90]),
            Some(ClearGroup::Single(DtcCategory::Powertrain, 0x0190))
        );
        assert_eq!(ClearGroup::parse([0x05, 0x00, 0x00]), None);
    }

    #[test]
    fn test_matching_and_availability() {
        let store = store();
        let dtcs = load(&store, NodeId::Engine).unwrap();
        assert_eq!(dtcs.len(), 4);

        let confirmed = matching(&dtcs, status_bit::CONFIRMED_DTC);
        assert_eq!(
            confirmed.iter().map(|d| d.code).collect::<Vec<_>>(),
            vec![0x0196, 0x9A01]
        );
        assert_eq!(availability(&confirmed, 0xFF), 0x2F);
        assert_eq!(availability(&[], 0xFF), 0x00);
        assert_eq!(availability(&confirmed, 0x0F), 0x0F);
    }

    #[test]
    fn test_clear_category_keeps_others() {
        let store = store();
        let cleared = clear(
            &store,
            NodeId::Engine,
            ClearGroup::Category(DtcCategory::Powertrain),
        )
        .unwrap();
        assert_eq!(cleared, 2);
        let left: Vec<u16> = load(&store, NodeId::Engine)
            .unwrap()
            .iter()
            .map(|d| d.code)
            .collect();
        assert_eq!(left, vec![0x9A01, 0xC101]);
    }

    #[test]
    fn test_clear_single_missing_dtc() {
        let store = store();
        assert!(matches!(
            clear(
                &store,
                NodeId::Engine,
                ClearGroup::Single(DtcCategory::Powertrain, 0x0777)
            ),
            Err(DtcError::NotFound(_))
        ));
        // Right code, wrong category
        assert!(matches!(
            clear(
                &store,
                NodeId::Engine,
                ClearGroup::Single(DtcCategory::Network, 0x0190)
            ),
            Err(DtcError::NotFound(_))
        ));
    }

    #[test]
    fn test_clear_all() {
        let store = store();
        assert_eq!(clear(&store, NodeId::Engine, ClearGroup::All).unwrap(), 4);
        assert!(load(&store, NodeId::Engine).unwrap().is_empty());
    }
}
