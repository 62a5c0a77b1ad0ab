//! Raw key/value backends.

use crate::error::Result;

/// A single staged change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A byte-oriented ordered key/value backend.
///
/// Backends only need to apply a batch atomically. Transaction isolation is
/// provided by [`Store`](crate::Store), which serializes writers.
pub trait Backend: Send + Sync {
    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every mutation or none of them.
    fn apply(&self, batch: Vec<Mutation>) -> Result<()>;
}
