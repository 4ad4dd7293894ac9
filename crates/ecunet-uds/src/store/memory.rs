//! In-memory data store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{DataStore, DidMap, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<HashMap<String, DidMap>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `path` with initial values
    pub fn with_values(self, path: &str, values: impl IntoIterator<Item = (u16, Vec<u8>)>) -> Self {
        self.maps
            .write()
            .entry(path.to_string())
            .or_default()
            .extend(values);
        self
    }

    /// Make every read fail until cleared
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail until cleared
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl DataStore for MemoryStore {
    fn read_all(&self, path: &str) -> Result<DidMap, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("read of {}", path)));
        }
        Ok(self.maps.read().get(path).cloned().unwrap_or_default())
    }

    fn write_all(&self, path: &str, values: &DidMap) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("write of {}", path)));
        }
        self.maps.write().insert(path.to_string(), values.clone());
        Ok(())
    }
}
