//! Account store backends: in-memory and RocksDB

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::{EngineResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Pending mutation of a single key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put(Vec<u8>),
    Delete,
}

/// All writes of one action, applied together or not at all
pub type WriteSet = BTreeMap<Vec<u8>, WriteOp>;

/// Durable key-value store the ledger runs on
pub trait AccountStore: Send + Sync {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    /// Apply a write set atomically
    fn commit(&self, writes: WriteSet) -> EngineResult<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Open the backend selected by the storage configuration
pub fn open_store(config: &StorageConfig) -> EngineResult<Arc<dyn AccountStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::RocksDb => Ok(Arc::new(RocksStore::open(config)?)),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountStore for MemoryStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn commit(&self, writes: WriteSet) -> EngineResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        for (key, op) in writes {
            match op {
                WriteOp::Put(value) => {
                    entries.insert(key, value);
                }
                WriteOp::Delete => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// RocksDB-backed store; one `WriteBatch` per committed action
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    pub fn open(config: &StorageConfig) -> EngineResult<Self> {
        if config.clear_on_start {
            let _ = std::fs::remove_dir_all(&config.data_directory);
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        Self::open_with(&opts, &config.data_directory)
    }

    fn open_with<P: AsRef<Path>>(opts: &Options, path: P) -> EngineResult<Self> {
        let db = DB::open(opts, path.as_ref())
            .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl AccountStore for RocksStore {
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn commit(&self, writes: WriteSet) -> EngineResult<()> {
        let mut batch = WriteBatch::default();
        for (key, op) in writes {
            match op {
                WriteOp::Put(value) => batch.put(key, value),
                WriteOp::Delete => batch.delete(key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}
