//! Per-user capability flags.
//!
//! Written whenever a profile fetch completes, read when deciding whether a
//! group can use the versioned protocol. Unknown users read as unsupported.

use conclave_store::{ReadAccess, WriteTx};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;

const PREFIX: &str = "capability:";

/// Last known protocol support of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub supports_versioned_groups: bool,
}

/// Capability bits as published in a fetched profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileCapabilities {
    pub versioned_groups: bool,
}

impl From<ProfileCapabilities> for CapabilityRecord {
    fn from(caps: ProfileCapabilities) -> Self {
        Self {
            supports_versioned_groups: caps.versioned_groups,
        }
    }
}

/// Typed access to capability records, keyed by stable identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressCapabilityStore;

impl AddressCapabilityStore {
    fn key(address: &Address) -> Option<String> {
        address.stable_id().map(|id| format!("{}{}", PREFIX, id))
    }

    /// Read the record for `address`, if one was ever written.
    pub fn get(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<Option<CapabilityRecord>> {
        match Self::key(address) {
            Some(key) => tx.get_json(&key),
            None => Ok(None),
        }
    }

    /// Whether `address` is known to support versioned groups.
    pub fn supports_versioned_groups(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<bool> {
        Ok(self
            .get(tx, address)?
            .map(|record| record.supports_versioned_groups)
            .unwrap_or(false))
    }

    /// Overwrite the record for `address`.
    ///
    /// Addresses without a stable identifier are skipped and `false` is returned.
    pub fn set(&self, tx: &mut WriteTx<'_>, address: &Address, record: CapabilityRecord) -> conclave_store::Result<bool> {
        let Some(key) = Self::key(address) else {
            debug!("skipping capability write for {} without stable id", address);
            return Ok(false);
        };
        tx.put_json(&key, &record)?;
        Ok(true)
    }
}
