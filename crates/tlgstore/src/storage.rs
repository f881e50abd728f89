//! Storage engine implementation
//!
//! File layout:
//! - `cache.tlg`: header + append-only record log
//!
//! The key index lives in memory and is rebuilt on open by replaying the
//! memory-mapped log. Later records for a key shadow earlier ones.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_record, parse_header, parse_record, RecordOp, HEADER_LEN,
    RECORD_PREFIX_LEN, STORE_MAGIC, STORE_VERSION,
};

/// Maximum value size (1 MB)
const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Maximum key size (64 KB)
const MAX_KEY_SIZE: usize = 64 * 1024;

/// Maximum store size (1 GB)
const MAX_DB_SIZE: u64 = 1024 * 1024 * 1024;

const DATA_FILE: &str = "cache.tlg";
const COMPACT_FILE: &str = "cache.tlg.compact";

/// Location of a live value inside the log
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u32,
}

type Index = HashMap<Vec<u8>, Slot, RandomState>;

struct Inner {
    file: File,
    index: Index,
    size: u64,
    records: u32,
    closed: bool,
}

impl Inner {
    /// Append one encoded record at the end of the last whole record.
    ///
    /// Bytes past that point (left by an earlier failed write) are cut off
    /// first, and a failed write is rolled back, so the log never holds a
    /// partial record in front of a whole one.
    ///
    /// # Returns
    /// * `Result<u64>` - offset the record was written at
    fn append(&mut self, record: &[u8]) -> Result<u64> {
        let offset = self.size;
        if self.file.metadata()?.len() != offset {
            warn!(offset, "discarding bytes past the last whole record");
            self.file.set_len(offset)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = self.file.write_all(record) {
            if let Err(rollback) = self.file.set_len(offset) {
                warn!(offset, error = %rollback, "could not roll back failed append");
            }
            return Err(e.into());
        }

        self.size = offset + record.len() as u64;
        self.records += 1;
        Ok(offset)
    }
}

/// DiskStore is the durable key/value handle behind a cache
pub struct DiskStore {
    /// Directory holding the log
    path: PathBuf,

    inner: Mutex<Inner>,
}

impl DiskStore {
    /// Open or create a store in the given directory
    ///
    /// # Arguments
    /// * `path` - Directory path for the store files
    ///
    /// # Returns
    /// * `Result<DiskStore>` - Store handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let data_path = path.join(DATA_FILE);
        let has_data = data_path
            .metadata()
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);

        let inner = if has_data {
            Self::open_existing(&data_path)?
        } else {
            Self::create_new(&data_path)?
        };

        debug!(
            path = %path.display(),
            keys = inner.index.len(),
            records = inner.records,
            "store opened"
        );

        Ok(DiskStore {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    fn open_existing(data_path: &Path) -> Result<Inner> {
        let file = OpenOptions::new().read(true).write(true).open(data_path)?;

        // SAFETY: the map is read-only, dropped before this function returns,
        // and the file is only written through this process's handle.
        let map = unsafe { Mmap::map(&file)? };
        parse_header(&map)?;

        let mut index = Index::default();
        let mut records = 0u32;
        let mut offset = HEADER_LEN;

        while offset < map.len() {
            match parse_record(&map[offset..]) {
                Ok((rest, record)) => {
                    let consumed = map.len() - offset - rest.len();
                    match record.op {
                        RecordOp::Put => {
                            let value_offset = offset + RECORD_PREFIX_LEN + record.key.len();
                            index.insert(
                                record.key.to_vec(),
                                Slot {
                                    offset: value_offset as u64,
                                    len: record.value.len() as u32,
                                },
                            );
                        }
                        RecordOp::Invalidate => {
                            index.remove(record.key);
                        }
                    }
                    records += 1;
                    offset += consumed;
                }
                Err(nom::Err::Incomplete(_)) => {
                    warn!(
                        path = %data_path.display(),
                        offset,
                        "discarding torn record at end of log"
                    );
                    break;
                }
                Err(_) => {
                    return Err(Error::Parse(format!("Corrupt record at offset {}", offset)));
                }
            }
        }

        let map_len = map.len();
        drop(map);

        if offset < map_len {
            file.set_len(offset as u64)?;
        }

        Ok(Inner {
            file,
            index,
            size: offset as u64,
            records,
            closed: false,
        })
    }

    fn create_new(data_path: &Path) -> Result<Inner> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)?;

        let header = create_header(STORE_VERSION, 0);
        file.write_all(&header)?;

        Ok(Inner {
            file,
            index: Index::default(),
            size: header.len() as u64,
            records: 0,
            closed: false,
        })
    }

    /// Write a value for a key, shadowing any previous value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge(key.len()));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }

        let record = encode_record(RecordOp::Put, key, value);
        if inner.size + record.len() as u64 > MAX_DB_SIZE {
            return Err(Error::DatabaseFull(inner.size));
        }

        let offset = inner.append(&record)?;

        let value_offset = offset + (RECORD_PREFIX_LEN + key.len()) as u64;
        inner.index.insert(
            key.to_vec(),
            Slot {
                offset: value_offset,
                len: value.len() as u32,
            },
        );

        Ok(())
    }

    /// Read the live value for a key
    ///
    /// # Returns
    /// * `Ok(None)` if the key was never written or has been invalidated
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }

        let slot = match inner.index.get(key) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        inner.file.seek(SeekFrom::Start(slot.offset))?;
        let mut value = vec![0u8; slot.len as usize];
        inner.file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    /// Invalidate a key by appending a tombstone
    ///
    /// # Returns
    /// * `Result<bool>` - whether a live value was removed
    pub fn invalidate(&self, key: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        if !inner.index.contains_key(key) {
            return Ok(false);
        }

        let record = encode_record(RecordOp::Invalidate, key, &[]);
        inner.append(&record)?;
        inner.index.remove(key);

        Ok(true)
    }

    /// Keys with a live value, in no particular order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.lock().index.keys().cloned().collect()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Check if the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    /// Current log size in bytes, shadowed records included
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Directory holding the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log keeping only live values
    ///
    /// # Returns
    /// * `Result<u64>` - bytes reclaimed
    pub fn compact(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }

        let compact_path = self.path.join(COMPACT_FILE);
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&compact_path)?;

        let mut live: Vec<(Vec<u8>, Slot)> =
            inner.index.iter().map(|(k, s)| (k.clone(), *s)).collect();
        live.sort_by_key(|(_, slot)| slot.offset);

        out.write_all(&create_header(STORE_VERSION, live.len() as u32))?;

        let mut new_index = Index::default();
        let mut size = HEADER_LEN as u64;
        for (key, slot) in live {
            inner.file.seek(SeekFrom::Start(slot.offset))?;
            let mut value = vec![0u8; slot.len as usize];
            inner.file.read_exact(&mut value)?;

            let record = encode_record(RecordOp::Put, &key, &value);
            out.write_all(&record)?;
            new_index.insert(
                key.clone(),
                Slot {
                    offset: size + (RECORD_PREFIX_LEN + key.len()) as u64,
                    len: slot.len,
                },
            );
            size += record.len() as u64;
        }
        out.sync_all()?;

        std::fs::rename(&compact_path, self.path.join(DATA_FILE))?;

        let reclaimed = inner.size.saturating_sub(size);
        inner.records = new_index.len() as u32;
        inner.index = new_index;
        inner.size = size;
        inner.file = out;

        debug!(path = %self.path.display(), reclaimed, "store compacted");
        Ok(reclaimed)
    }

    /// Update the header record count and fsync the log
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        Self::sync_inner(&mut inner)
    }

    fn sync_inner(inner: &mut Inner) -> Result<()> {
        let records = inner.records;
        inner
            .file
            .seek(SeekFrom::Start(STORE_MAGIC.len() as u64 + 4))?;
        inner.file.write_all(&records.to_le_bytes())?;
        inner.file.sync_all()?;
        Ok(())
    }

    /// Close the store and fsync all changes
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }

        Self::sync_inner(&mut inner)?;
        inner.closed = true;

        Ok(())
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        assert_eq!(db.len(), 0);
        assert!(db.is_empty());

        db.close().unwrap();

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        db.put(b"id:1", b"{\"length\":420}").unwrap();

        assert_eq!(db.len(), 1);
        assert_eq!(db.get(b"id:1").unwrap().unwrap(), b"{\"length\":420}");
        assert_eq!(db.get(b"id:2").unwrap(), None);
    }

    #[test]
    fn test_overwrite_latest_wins() {
        let dir = TempDir::new().unwrap();
        {
            let db = DiskStore::open(dir.path()).unwrap();
            db.put(b"title:Foo", b"old").unwrap();
            db.put(b"title:Foo", b"new value").unwrap();
            assert_eq!(db.get(b"title:Foo").unwrap().unwrap(), b"new value");
            db.close().unwrap();
        }

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(b"title:Foo").unwrap().unwrap(), b"new value");
    }

    #[test]
    fn test_invalidate_persists() {
        let dir = TempDir::new().unwrap();
        {
            let db = DiskStore::open(dir.path()).unwrap();
            db.put(b"id:1", b"a").unwrap();
            db.put(b"id:2", b"b").unwrap();
            assert!(db.invalidate(b"id:1").unwrap());
            assert!(!db.invalidate(b"id:404").unwrap());
        }

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.get(b"id:1").unwrap(), None);
        assert_eq!(db.get(b"id:2").unwrap().unwrap(), b"b");
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        {
            let db = DiskStore::open(dir.path()).unwrap();
            db.put(b"id:1", b"whole").unwrap();
            db.close().unwrap();
        }

        // Simulate a crash in the middle of an append
        let data_path = dir.path().join(DATA_FILE);
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        let record = encode_record(RecordOp::Put, b"id:2", b"never finished");
        file.write_all(&record[..record.len() / 2]).unwrap();
        drop(file);

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(b"id:1").unwrap().unwrap(), b"whole");

        // Appends after recovery land on a clean record boundary
        db.put(b"id:3", b"after").unwrap();
        db.close().unwrap();
        drop(db);

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.get(b"id:3").unwrap().unwrap(), b"after");
    }

    #[test]
    fn test_garbage_after_last_record_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let data_path = dir.path().join(DATA_FILE);
        let db = DiskStore::open(dir.path()).unwrap();
        db.put(b"id:1", b"first").unwrap();
        let size = db.size();

        // Bytes of an append that failed halfway, still in the file
        let record = encode_record(RecordOp::Put, b"id:2", b"torn value that never landed");
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        file.write_all(&record[..RECORD_PREFIX_LEN + 2]).unwrap();
        drop(file);

        db.put(b"id:3", b"second").unwrap();
        assert!(db.invalidate(b"id:1").unwrap());
        db.close().unwrap();
        drop(db);

        let len = std::fs::metadata(&data_path).unwrap().len();
        let third = encode_record(RecordOp::Put, b"id:3", b"second").len() as u64;
        let tombstone = encode_record(RecordOp::Invalidate, b"id:1", &[]).len() as u64;
        assert_eq!(len, size + third + tombstone);

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.get(b"id:1").unwrap(), None);
        assert_eq!(db.get(b"id:3").unwrap().unwrap(), b"second");
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_compact_reclaims_space() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        for i in 0..10 {
            db.put(b"id:1", format!("version {}", i).as_bytes()).unwrap();
        }
        db.put(b"id:2", b"keep").unwrap();
        db.put(b"id:3", b"drop").unwrap();
        db.invalidate(b"id:3").unwrap();

        let before = db.size();
        let reclaimed = db.compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(db.size(), before - reclaimed);

        assert_eq!(db.get(b"id:1").unwrap().unwrap(), b"version 9");
        assert_eq!(db.get(b"id:2").unwrap().unwrap(), b"keep");
        assert_eq!(db.get(b"id:3").unwrap(), None);
        db.close().unwrap();
        drop(db);

        let db = DiskStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get(b"id:1").unwrap().unwrap(), b"version 9");
    }

    #[test]
    fn test_value_too_large() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        let large = vec![b'x'; MAX_VALUE_SIZE + 1];
        assert!(matches!(db.put(b"k", &large), Err(Error::ValueTooLarge(_))));
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DATA_FILE), b"not a store file at all").unwrap();

        assert!(matches!(DiskStore::open(dir.path()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        db.close().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn test_put_after_close() {
        let dir = TempDir::new().unwrap();
        let db = DiskStore::open(dir.path()).unwrap();

        db.close().unwrap();

        assert!(matches!(db.put(b"k", b"v"), Err(Error::Closed)));
        assert!(matches!(db.get(b"k"), Err(Error::Closed)));
    }
}
