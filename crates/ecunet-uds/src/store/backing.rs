//! Backing-store partition used by firmware updates

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::error;

use super::StoreError;

/// Flat, byte-addressed memory the update process reads and writes
#[cfg_attr(test, mockall::automock)]
pub trait BackingStore: Send + Sync {
    /// Human-readable location, for logs
    fn path(&self) -> String;

    /// Whether `address` lies inside the partition
    fn available_address(&self, address: u64) -> bool;

    /// Whether `size` bytes starting at `address` fit in the partition
    fn available_memory(&self, address: u64, size: u64) -> bool;

    fn read_from_address(&self, address: u64, size: u64) -> Result<Vec<u8>, StoreError>;

    fn write_to_address(&self, address: u64, data: &[u8]) -> Result<(), StoreError>;
}

fn fits(capacity: u64, address: u64, size: u64) -> bool {
    address
        .checked_add(size)
        .map(|end| end <= capacity)
        .unwrap_or(false)
}

// =============================================================================
// In-memory partition
// =============================================================================

pub struct MemoryBackingStore {
    memory: Mutex<Vec<u8>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryBackingStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            memory: Mutex::new(vec![0u8; capacity as usize]),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.memory.lock().len() as u64
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BackingStore for MemoryBackingStore {
    fn path(&self) -> String {
        "memory".to_string()
    }

    fn available_address(&self, address: u64) -> bool {
        address < self.capacity()
    }

    fn available_memory(&self, address: u64, size: u64) -> bool {
        fits(self.capacity(), address, size)
    }

    fn read_from_address(&self, address: u64, size: u64) -> Result<Vec<u8>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read fault".to_string()));
        }
        let memory = self.memory.lock();
        if !fits(memory.len() as u64, address, size) {
            return Err(StoreError::OutOfRange { address, size });
        }
        let start = address as usize;
        Ok(memory[start..start + size as usize].to_vec())
    }

    fn write_to_address(&self, address: u64, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write fault".to_string()));
        }
        let mut memory = self.memory.lock();
        let size = data.len() as u64;
        if !fits(memory.len() as u64, address, size) {
            return Err(StoreError::OutOfRange { address, size });
        }
        let start = address as usize;
        memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

// =============================================================================
// File-backed partition
// =============================================================================

/// Pre-sized file standing in for a disk partition
pub struct FileBackingStore {
    path: PathBuf,
    size: u64,
    io_lock: Mutex<()>,
}

impl FileBackingStore {
    /// Open `path`, creating or growing it to `size` bytes
    pub fn open(path: impl Into<PathBuf>, size: u64) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() < size {
            file.set_len(size)?;
        }
        Ok(Self {
            path,
            size,
            io_lock: Mutex::new(()),
        })
    }

    fn open_file(&self) -> Result<File, StoreError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                error!(path = %self.path.display(), error = %e, "Backing store unavailable");
                StoreError::Io(e)
            })
    }
}

impl BackingStore for FileBackingStore {
    fn path(&self) -> String {
        self.path.display().to_string()
    }

    fn available_address(&self, address: u64) -> bool {
        address < self.size
    }

    fn available_memory(&self, address: u64, size: u64) -> bool {
        fits(self.size, address, size)
    }

    fn read_from_address(&self, address: u64, size: u64) -> Result<Vec<u8>, StoreError> {
        if !fits(self.size, address, size) {
            return Err(StoreError::OutOfRange { address, size });
        }
        let _guard = self.io_lock.lock();
        let mut file = self.open_file()?;
        file.seek(SeekFrom::Start(address))?;
        let mut buffer = vec![0u8; size as usize];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_to_address(&self, address: u64, data: &[u8]) -> Result<(), StoreError> {
        let size = data.len() as u64;
        if !fits(self.size, address, size) {
            return Err(StoreError::OutOfRange { address, size });
        }
        let _guard = self.io_lock.lock();
        let mut file = self.open_file()?;
        file.seek(SeekFrom::Start(address))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_bounds() {
        let store = MemoryBackingStore::new(0x100);
        assert!(store.available_address(0xFF));
        assert!(!store.available_address(0x100));
        assert!(store.available_memory(0xF0, 0x10));
        assert!(!store.available_memory(0xF0, 0x11));
        assert!(!store.available_memory(u64::MAX, 2));
        assert!(matches!(
            store.write_to_address(0xFF, &[1, 2]),
            Err(StoreError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_memory_store_read_back() {
        let store = MemoryBackingStore::new(0x100);
        store.write_to_address(0x10, &[0xDE, 0xAD]).unwrap();
        assert_eq!(store.read_from_address(0x0F, 4).unwrap(), vec![0, 0xDE, 0xAD, 0]);
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partition.bin");
        {
            let store = FileBackingStore::open(&path, 0x1000).unwrap();
            store.write_to_address(0x0FF0, &[0x21]).unwrap();
        }
        let store = FileBackingStore::open(&path, 0x1000).unwrap();
        assert_eq!(store.read_from_address(0x0FF0, 1).unwrap(), vec![0x21]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0x1000);
        assert!(store.read_from_address(0x0FFF, 2).is_err());
    }
}
