//! Conclave Store - transactional key/value storage
//!
//! Group threads, audit records, capability flags and fetched profiles all
//! live in one ordered key/value space. Records are JSON blobs under string
//! prefixes (`group:`, `group_update:`, `capability:`, ...).
//!
//! # Transactions
//!
//! - [`Store::read`] runs a closure against a consistent view.
//! - [`Store::write`] runs a closure as the only writer. Mutations are staged
//!   and applied in one atomic batch if, and only if, the closure succeeds.
//!
//! # Example
//!
//! ```
//! use conclave_store::{ReadAccess, Store};
//!
//! let store = Store::in_memory();
//! store.write(|tx| tx.put_json("capability:abc", &true)).unwrap();
//! let flag: Option<bool> = store.read(|tx| tx.get_json("capability:abc")).unwrap();
//! assert_eq!(flag, Some(true));
//! ```

mod backend;
pub mod env;
mod error;
mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;
mod transaction;

pub use backend::{Backend, Mutation};
pub use error::{Error, Result};
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksBackend, StoreConfig};
pub use transaction::{ReadAccess, ReadTx, Store, WriteTx};
