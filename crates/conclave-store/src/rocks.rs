//! Persistent backend using RocksDB.

use std::path::{Path, PathBuf};

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::backend::{Backend, Mutation};
use crate::error::Result;

/// Configuration for the RocksDB backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Data directory for the database
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl StoreConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let path = PathBuf::from(
            std::env::var("CONCLAVE_DATA_DIR").unwrap_or_else(|_| "./conclave-data".to_string()),
        );
        Self { path }
    }
}

/// Storage backend backed by a RocksDB database.
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    /// Open the database described by `config`, creating its directory.
    pub fn open_with(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        Self::open(&config.path)
    }
}

impl Backend for RocksBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut found = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.starts_with(prefix) {
                found.push((key.to_vec(), value.to_vec()));
            } else {
                break;
            }
        }
        Ok(found)
    }

    fn apply(&self, batch: Vec<Mutation>) -> Result<()> {
        let mut write = WriteBatch::default();
        for mutation in batch {
            match mutation {
                Mutation::Put { key, value } => write.put(key, value),
                Mutation::Delete { key } => write.delete(key),
            }
        }
        self.db.write(write)?;
        Ok(())
    }
}
