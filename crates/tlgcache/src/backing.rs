//! Backing-store strategies behind the memory tier

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tlgstore::DiskStore;

/// Durable tier contract over raw key/value bytes.
///
/// Access discipline (locking, file handles) is the implementation's
/// responsibility; the cache only calls these three operations.
pub trait BackingStore: Send + Sync {
    /// Read the value stored for a key
    fn get(&self, key: &[u8]) -> tlgstore::Result<Option<Vec<u8>>>;

    /// Write a value for a key
    fn put(&self, key: &[u8], value: &[u8]) -> tlgstore::Result<()>;

    /// Remove a key
    fn invalidate(&self, key: &[u8]) -> tlgstore::Result<()>;
}

impl BackingStore for DiskStore {
    fn get(&self, key: &[u8]) -> tlgstore::Result<Option<Vec<u8>>> {
        DiskStore::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> tlgstore::Result<()> {
        DiskStore::put(self, key, value)
    }

    fn invalidate(&self, key: &[u8]) -> tlgstore::Result<()> {
        DiskStore::invalidate(self, key).map(|_| ())
    }
}

/// Which topology a cache is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Memory tier over the on-disk record log
    #[default]
    Disk,
    /// Memory tier only
    Memory,
    /// Never stores anything
    Noop,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(BackendKind::Disk),
            "memory" | "mem" => Ok(BackendKind::Memory),
            "noop" | "none" | "fake" => Ok(BackendKind::Noop),
            other => Err(format!("unknown cache backend '{}'", other)),
        }
    }
}

/// Open the durable tier for a backend kind, if it has one
pub fn open_backing<P: AsRef<Path>>(
    kind: BackendKind,
    dir: P,
) -> tlgstore::Result<Option<Arc<dyn BackingStore>>> {
    match kind {
        BackendKind::Disk => {
            let store: Arc<dyn BackingStore> = Arc::new(DiskStore::open(dir)?);
            Ok(Some(store))
        }
        BackendKind::Memory | BackendKind::Noop => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("disk".parse::<BackendKind>().unwrap(), BackendKind::Disk);
        assert_eq!("Memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("fake".parse::<BackendKind>().unwrap(), BackendKind::Noop);
        assert!("redis".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_open_backing_disk_only() {
        let dir = TempDir::new().unwrap();

        let disk = open_backing(BackendKind::Disk, dir.path()).unwrap();
        assert!(disk.is_some());
        assert!(open_backing(BackendKind::Memory, dir.path()).unwrap().is_none());
        assert!(open_backing(BackendKind::Noop, dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_disk_backing_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_backing(BackendKind::Disk, dir.path()).unwrap().unwrap();

        store.put(b"id:1", b"payload").unwrap();
        assert_eq!(store.get(b"id:1").unwrap().unwrap(), b"payload");
        store.invalidate(b"id:1").unwrap();
        assert_eq!(store.get(b"id:1").unwrap(), None);
    }
}
