//! Group identifiers, secrets and protocol versions.
//!
//! Legacy groups are addressed by 16 random bytes. Versioned groups are
//! addressed by 32 bytes derived from the group secret, so anyone holding
//! the secret can compute the id.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a legacy group id.
pub const LEGACY_ID_LEN: usize = 16;
/// Length of a versioned group id.
pub const VERSIONED_ID_LEN: usize = 32;

const ID_CONTEXT: &str = "conclave 2024-05 versioned group id";

/// Master secret of a versioned group.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSecret(pub [u8; 32]);

impl std::fmt::Debug for GroupSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupSecret(..)")
    }
}

impl GroupSecret {
    /// Generate a random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// The group id addressed by this secret.
    pub fn derive_id(&self) -> GroupId {
        GroupId(blake3::derive_key(ID_CONTEXT, &self.0).to_vec())
    }
}

/// Which protocol a group speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupProtocol {
    Legacy,
    Versioned(GroupSecret),
}

impl GroupProtocol {
    pub fn is_versioned(&self) -> bool {
        matches!(self, Self::Versioned(_))
    }

    pub fn secret(&self) -> Option<&GroupSecret> {
        match self {
            Self::Legacy => None,
            Self::Versioned(secret) => Some(secret),
        }
    }

    /// Id length this protocol requires.
    pub fn id_len(&self) -> usize {
        match self {
            Self::Legacy => LEGACY_ID_LEN,
            Self::Versioned(_) => VERSIONED_ID_LEN,
        }
    }

    /// A fresh id for a new group of this protocol.
    pub fn new_group_id(&self) -> GroupId {
        match self {
            Self::Legacy => {
                let mut bytes = vec![0u8; LEGACY_ID_LEN];
                rand::thread_rng().fill_bytes(&mut bytes);
                GroupId(bytes)
            }
            Self::Versioned(secret) => secret.derive_id(),
        }
    }
}

/// Opaque group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(Vec<u8>);

impl GroupId {
    /// Wrap raw bytes without checking them.
    ///
    /// The id is validated once it is used to build a model.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Wrap raw bytes, checking the length against `protocol`.
    pub fn parse(bytes: &[u8], protocol: &GroupProtocol) -> Result<Self> {
        let id = Self(bytes.to_vec());
        id.validate(protocol)?;
        Ok(id)
    }

    /// Check this id against `protocol`.
    ///
    /// Versioned ids must also match the id derived from the group secret.
    pub fn validate(&self, protocol: &GroupProtocol) -> Result<()> {
        let expected = protocol.id_len();
        if self.0.len() != expected {
            return Err(Error::InvalidGroupId {
                expected,
                found: self.0.len(),
            });
        }
        if let GroupProtocol::Versioned(secret) = protocol {
            if secret.derive_id() != *self {
                return Err(Error::InvalidGroupId {
                    expected,
                    found: self.0.len(),
                });
            }
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
