//! Persistence layer: a `Storage` trait with a durable RocksDB-backed implementation and
//! an in-memory implementation for tests, mapping onto the four logical partitions
//! `blocks`, `balances`, `nonces`, `meta`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use log::{info, warn};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::error::StorageError;
use crate::types::Block;

const CF_BLOCKS: &str = "blocks";
const CF_BALANCES: &str = "balances";
const CF_NONCES: &str = "nonces";
const CF_META: &str = "meta";

/// Zero-padded 10-digit decimal block index, used as the RocksDB key in `blocks`.
fn block_key(index: u64) -> String {
    format!("{index:010}")
}

/// Durable K/V storage for blocks, balances, and per-account nonces, with an in-memory
/// variant for tests. Both backends implement the same contract.
pub trait Storage: Send + Sync {
    fn save_block(&self, block: &Block) -> Result<(), StorageError>;
    fn load_chain(&self) -> Result<Vec<Block>, StorageError>;
    fn save_balances(&self, balances: &HashMap<String, u64>) -> Result<(), StorageError>;
    fn load_balances(&self) -> Result<HashMap<String, u64>, StorageError>;
    fn save_nonces(&self, nonces: &HashMap<String, u64>) -> Result<(), StorageError>;
    fn load_nonces(&self) -> Result<HashMap<String, u64>, StorageError>;
    fn close(&self) -> Result<(), StorageError>;
}

/// Single-file embedded key-value store (RocksDB), one column family per logical
/// partition. `save_balances`/`save_nonces` fully rewrite their partition on every call.
pub struct RocksDbStorage {
    db: Mutex<Option<DB>>,
}

impl RocksDbStorage {
    /// Opens (or creates) `<data_dir>/blockchain.db`.
    pub fn open(data_dir: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = Path::new(data_dir).join("blockchain.db");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_NONCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, &db_path, cfs)?;
        info!("opened RocksDB storage at {}", db_path.display());
        Ok(RocksDbStorage {
            db: Mutex::new(Some(db)),
        })
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> Result<T, StorageError>) -> Result<T, StorageError> {
        let guard = self.db.lock().expect("storage mutex poisoned");
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(StorageError::Database("storage is closed".to_string())),
        }
    }

    fn rewrite_map_cf(&self, cf_name: &str, values: &HashMap<String, u64>) -> Result<(), StorageError> {
        self.with_db(|db| {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| StorageError::Database(format!("missing column family {cf_name}")))?;

            let existing: Vec<Vec<u8>> = db
                .iterator_cf(&cf, rocksdb::IteratorMode::Start)
                .map(|item| item.map(|(k, _)| k.to_vec()))
                .collect::<Result<_, _>>()?;

            let mut batch = rocksdb::WriteBatch::default();
            for key in existing {
                batch.delete_cf(&cf, key);
            }
            for (addr, value) in values {
                batch.put_cf(&cf, addr.as_bytes(), serde_json::to_vec(value)?);
            }
            db.write(batch)?;
            Ok(())
        })
    }

    fn load_map_cf(&self, cf_name: &str) -> Result<HashMap<String, u64>, StorageError> {
        self.with_db(|db| {
            let cf = db
                .cf_handle(cf_name)
                .ok_or_else(|| StorageError::Database(format!("missing column family {cf_name}")))?;
            let mut map = HashMap::new();
            for item in db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
                let (key, value) = item?;
                let addr = String::from_utf8_lossy(&key).to_string();
                let amount: u64 = serde_json::from_slice(&value)?;
                map.insert(addr, amount);
            }
            Ok(map)
        })
    }
}

impl Storage for RocksDbStorage {
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.with_db(|db| {
            let cf = db
                .cf_handle(CF_BLOCKS)
                .ok_or_else(|| StorageError::Database("missing column family blocks".to_string()))?;
            let data = serde_json::to_vec(block)?;
            db.put_cf(&cf, block_key(block.index).as_bytes(), data)?;
            Ok(())
        })
    }

    fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.with_db(|db| {
            let cf = db
                .cf_handle(CF_BLOCKS)
                .ok_or_else(|| StorageError::Database("missing column family blocks".to_string()))?;
            let mut blocks = Vec::new();
            for item in db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
                let (key, value) = item?;
                let block: Block = serde_json::from_slice(&value)
                    .map_err(|_| StorageError::Corrupt(String::from_utf8_lossy(&key).to_string()))?;
                blocks.push(block);
            }
            blocks.sort_by_key(|b| b.index);
            Ok(blocks)
        })
    }

    fn save_balances(&self, balances: &HashMap<String, u64>) -> Result<(), StorageError> {
        self.rewrite_map_cf(CF_BALANCES, balances)
    }

    fn load_balances(&self) -> Result<HashMap<String, u64>, StorageError> {
        self.load_map_cf(CF_BALANCES)
    }

    fn save_nonces(&self, nonces: &HashMap<String, u64>) -> Result<(), StorageError> {
        self.rewrite_map_cf(CF_NONCES, nonces)
    }

    fn load_nonces(&self) -> Result<HashMap<String, u64>, StorageError> {
        self.load_map_cf(CF_NONCES)
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.db.lock().expect("storage mutex poisoned");
        if guard.take().is_some() {
            info!("closed RocksDB storage");
        }
        Ok(())
    }
}

impl Drop for RocksDbStorage {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.db.lock() {
            if guard.take().is_some() {
                warn!("RocksDB storage dropped without explicit close()");
            }
        }
    }
}

/// In-memory `Storage` implementation for tests: same contract, no file I/O.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    blocks: HashMap<u64, Block>,
    balances: HashMap<String, u64>,
    nonces: HashMap<String, u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

impl Storage for MemoryStorage {
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut state = self.inner.lock().expect("memory storage mutex poisoned");
        state.blocks.insert(block.index, block.clone());
        Ok(())
    }

    fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let state = self.inner.lock().expect("memory storage mutex poisoned");
        let mut blocks: Vec<Block> = state.blocks.values().cloned().collect();
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }

    fn save_balances(&self, balances: &HashMap<String, u64>) -> Result<(), StorageError> {
        let mut state = self.inner.lock().expect("memory storage mutex poisoned");
        state.balances = balances.clone();
        Ok(())
    }

    fn load_balances(&self) -> Result<HashMap<String, u64>, StorageError> {
        let state = self.inner.lock().expect("memory storage mutex poisoned");
        Ok(state.balances.clone())
    }

    fn save_nonces(&self, nonces: &HashMap<String, u64>) -> Result<(), StorageError> {
        let mut state = self.inner.lock().expect("memory storage mutex poisoned");
        state.nonces = nonces.clone();
        Ok(())
    }

    fn load_nonces(&self) -> Result<HashMap<String, u64>, StorageError> {
        let state = self.inner.lock().expect("memory storage mutex poisoned");
        Ok(state.nonces.clone())
    }

    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Block;

    fn sample_block(index: u64) -> Block {
        let mut block = Block::genesis_unhashed();
        block.index = index;
        block.hash = block.compute_hash();
        block
    }

    #[test]
    fn memory_storage_round_trips_blocks() {
        let storage = MemoryStorage::new();
        storage.save_block(&sample_block(0)).unwrap();
        storage.save_block(&sample_block(1)).unwrap();
        let chain = storage.load_chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].index, 0);
        assert_eq!(chain[1].index, 1);
    }

    #[test]
    fn memory_storage_balances_are_full_replacement() {
        let storage = MemoryStorage::new();
        let mut balances = HashMap::new();
        balances.insert("addr1".to_string(), 100);
        storage.save_balances(&balances).unwrap();

        let mut next = HashMap::new();
        next.insert("addr2".to_string(), 50);
        storage.save_balances(&next).unwrap();

        let loaded = storage.load_balances().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("addr2"), Some(&50));
        assert_eq!(loaded.get("addr1"), None);
    }

    #[test]
    fn rocksdb_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        {
            let storage = RocksDbStorage::open(data_dir).unwrap();
            storage.save_block(&sample_block(0)).unwrap();
            let mut balances = HashMap::new();
            balances.insert("addr1".to_string(), 42);
            storage.save_balances(&balances).unwrap();
            storage.close().unwrap();
        }

        let storage = RocksDbStorage::open(data_dir).unwrap();
        let chain = storage.load_chain().unwrap();
        assert_eq!(chain.len(), 1);
        let balances = storage.load_balances().unwrap();
        assert_eq!(balances.get("addr1"), Some(&42));
    }
}
