//! File-backed data store: one TOML document per node path
//!
//! ```toml
//! F190 = "31484743383236333341313233343536"
//! F1A2 = "10"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::{DataStore, DidMap, StoreError};

pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Store files under `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, path: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", path))
    }
}

fn malformed(path: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Malformed {
        path: path.to_string(),
        reason: reason.into(),
    }
}

impl DataStore for FileStore {
    fn read_all(&self, path: &str) -> Result<DidMap, StoreError> {
        let file = self.file_for(path);
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DidMap::new()),
            Err(e) => {
                error!(file = %file.display(), error = %e, "Failed to read store");
                return Err(e.into());
            }
        };

        let raw: BTreeMap<String, String> =
            toml::from_str(&content).map_err(|e| malformed(path, e.to_string()))?;

        raw.into_iter()
            .map(|(key, value)| {
                let id = u16::from_str_radix(&key, 16)
                    .map_err(|_| malformed(path, format!("bad identifier {:?}", key)))?;
                let bytes = hex::decode(&value)
                    .map_err(|_| malformed(path, format!("bad value for {}", key)))?;
                Ok((id, bytes))
            })
            .collect()
    }

    fn write_all(&self, path: &str, values: &DidMap) -> Result<(), StoreError> {
        let raw: BTreeMap<String, String> = values
            .iter()
            .map(|(id, value)| (format!("{:04X}", id), hex::encode_upper(value)))
            .collect();
        let content = toml::to_string(&raw).map_err(|e| malformed(path, e.to_string()))?;

        let _guard = self.write_lock.lock();
        let file = self.file_for(path);
        let tmp = file.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &file)?;
        debug!(file = %file.display(), entries = values.len(), "Store written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            store.write("mcu", 0xF190, b"VIN123").unwrap();
            store.write("mcu", 0x01E0, &[0x00]).unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        let values = store.read_all("mcu").unwrap();
        assert_eq!(values.get(&0xF190), Some(&b"VIN123".to_vec()));
        assert_eq!(values.get(&0x01E0), Some(&vec![0x00]));
    }

    #[test]
    fn test_file_format_is_hex_toml() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.write("doors", 0x01A0, &[0xAB, 0x01]).unwrap();

        let content = std::fs::read_to_string(dir.path().join("doors.toml")).unwrap();
        assert_eq!(content.trim(), r#"01A0 = "AB01""#);
        assert!(!dir.path().join("doors.toml.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.read_all("hvac").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("engine.toml"), "ZZZZ = \"00\"\n").unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.read_all("engine"),
            Err(StoreError::Malformed { .. })
        ));
    }
}
