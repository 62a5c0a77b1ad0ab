//! Scoped read and write transactions.
//!
//! Writers are serialized by a single lock held for the whole closure, so a
//! read-modify-write sequence inside [`Store::write`] cannot interleave with
//! another writer. Staged mutations are applied in one batch only when the
//! closure succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::backend::{Backend, Mutation};
use crate::error::Result;
use crate::memory::MemoryBackend;

/// Shared handle to the transactional store.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    gate: Arc<RwLock<()>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Wrap an existing backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store backed by RocksDB at the configured path.
    #[cfg(feature = "rocksdb")]
    pub fn open(config: &crate::StoreConfig) -> Result<Self> {
        let backend = crate::RocksBackend::open_with(config)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Run `f` against a consistent view of the store.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T>) -> Result<T> {
        let _guard = self.gate.read();
        let tx = ReadTx {
            backend: self.backend.as_ref(),
        };
        f(&tx)
    }

    /// Run `f` as the only writer and commit its staged mutations atomically.
    ///
    /// If `f` returns an error nothing is written.
    pub fn write<T, E>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<crate::Error>,
    {
        let _guard = self.gate.write();
        let mut tx = WriteTx {
            backend: self.backend.as_ref(),
            staged: BTreeMap::new(),
        };
        let value = f(&mut tx)?;
        let batch = tx.into_batch();
        if !batch.is_empty() {
            trace!("committing {} staged mutations", batch.len());
            self.backend.apply(batch)?;
        }
        Ok(value)
    }
}

/// Read access shared by both transaction kinds.
pub trait ReadAccess {
    /// Raw value under `key`.
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Raw entries under `prefix`, in key order.
    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Deserialize the JSON value under `key`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Deserialize every JSON value under `prefix`, in key order.
    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.scan_raw(prefix.as_bytes())?
            .into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect()
    }

    /// Check whether `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_raw(key.as_bytes())?.is_some())
    }
}

/// A read-only transaction.
pub struct ReadTx<'a> {
    backend: &'a dyn Backend,
}

impl ReadAccess for ReadTx<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.backend.get(key)
    }

    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.backend.scan_prefix(prefix)
    }
}

/// A write transaction with read-your-writes semantics.
pub struct WriteTx<'a> {
    backend: &'a dyn Backend,
    /// `None` marks a staged delete.
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteTx<'_> {
    /// Stage a raw value.
    pub fn put_raw(&mut self, key: &[u8], value: Vec<u8>) {
        self.staged.insert(key.to_vec(), Some(value));
    }

    /// Stage a JSON-encoded value.
    pub fn put_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        self.put_raw(key.as_bytes(), data);
        Ok(())
    }

    /// Stage a delete.
    pub fn delete(&mut self, key: &str) {
        self.staged.insert(key.as_bytes().to_vec(), None);
    }

    /// Number of staged mutations.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn into_batch(self) -> Vec<Mutation> {
        self.staged
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => Mutation::Put { key, value },
                None => Mutation::Delete { key },
            })
            .collect()
    }
}

impl ReadAccess for WriteTx<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.backend.get(key),
        }
    }

    fn scan_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.backend.scan_prefix(prefix)?.into_iter().collect();
        for (key, value) in self.staged.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}
