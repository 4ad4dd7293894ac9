//! Persistence collaborators
//!
//! - [`DataStore`]: identifier/value maps, one per node path
//! - [`BackingStore`]: the flat partition firmware updates are written to

pub mod backing;
pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use thiserror::Error;

pub use backing::{BackingStore, FileBackingStore, MemoryBackingStore};
pub use file::FileStore;
pub use memory::MemoryStore;

#[cfg(test)]
pub use backing::MockBackingStore;

/// Identifier -> raw value
pub type DidMap = BTreeMap<u16, Vec<u8>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Identifier 0x{id:04X} not found in {path}")]
    NotFound { path: String, id: u16 },

    #[error("Malformed store {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Address range 0x{address:X}+{size} is outside the partition")]
    OutOfRange { address: u64, size: u64 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value persistence of data identifiers
pub trait DataStore: Send + Sync {
    /// Every identifier stored under `path`; an unknown path is an empty map
    fn read_all(&self, path: &str) -> Result<DidMap, StoreError>;

    /// Replace the whole map stored under `path`
    fn write_all(&self, path: &str, values: &DidMap) -> Result<(), StoreError>;

    fn read(&self, path: &str, id: u16) -> Result<Vec<u8>, StoreError> {
        self.read_all(path)?
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
                id,
            })
    }

    fn write(&self, path: &str, id: u16, value: &[u8]) -> Result<(), StoreError> {
        let mut values = self.read_all(path)?;
        values.insert(id, value.to_vec());
        self.write_all(path, &values)
    }
}
