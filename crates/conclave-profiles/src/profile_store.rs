//! Persisted profiles and profile key credentials.

use conclave_store::{ReadAccess, WriteTx};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::profile_key::{ProfileKey, ProfileKeyCredential};
use crate::service::IdentityKey;
use crate::unidentified::UnidentifiedAccessMode;

const PROFILE_PREFIX: &str = "profile:";
const CREDENTIAL_PREFIX: &str = "credential:";

/// Everything we know about a user's public profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub profile_key: Option<ProfileKey>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub bio: Option<String>,
    pub bio_emoji: Option<String>,
    pub payment_address: Option<Vec<u8>>,
    pub avatar_path: Option<String>,
    pub avatar: Option<Vec<u8>>,
    #[serde(default)]
    pub unidentified_access: UnidentifiedAccessMode,
    pub identity_key: Option<IdentityKey>,
    /// Unix millis of the last successful fetch.
    pub last_fetched_ms: Option<u64>,
}

impl UserProfile {
    /// Given and family name joined for display.
    pub fn full_name(&self) -> Option<String> {
        match (&self.given_name, &self.family_name) {
            (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
            (Some(given), None) => Some(given.clone()),
            (None, Some(family)) => Some(family.clone()),
            (None, None) => None,
        }
    }
}

/// Typed access to profile and credential records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileStore;

impl ProfileStore {
    fn profile_key(address: &Address) -> Option<String> {
        match (&address.service_id, &address.phone_number) {
            (Some(id), _) => Some(format!("{}{}", PROFILE_PREFIX, id)),
            (None, Some(phone)) => Some(format!("{}phone:{}", PROFILE_PREFIX, phone)),
            (None, None) => None,
        }
    }

    fn credential_key(address: &Address) -> Option<String> {
        address
            .stable_id()
            .map(|id| format!("{}{}", CREDENTIAL_PREFIX, id))
    }

    /// Load the stored profile for `address`.
    pub fn profile(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<Option<UserProfile>> {
        match Self::profile_key(address) {
            Some(key) => tx.get_json(&key),
            None => Ok(None),
        }
    }

    /// Replace the stored profile for `address`.
    pub fn put_profile(&self, tx: &mut WriteTx<'_>, address: &Address, profile: &UserProfile) -> conclave_store::Result<()> {
        if let Some(key) = Self::profile_key(address) {
            tx.put_json(&key, profile)?;
        }
        Ok(())
    }

    /// The profile key we hold for `address`, if any.
    pub fn profile_key_for(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<Option<ProfileKey>> {
        Ok(self.profile(tx, address)?.and_then(|p| p.profile_key))
    }

    /// Record a profile key learned outside a fetch (e.g. from a message).
    ///
    /// Returns `true` if the key changed. A changed key invalidates any
    /// credential issued for the old one.
    pub fn set_profile_key(&self, tx: &mut WriteTx<'_>, address: &Address, key: ProfileKey) -> conclave_store::Result<bool> {
        let mut profile = self.profile(&*tx, address)?.unwrap_or_default();
        if profile.profile_key == Some(key) {
            return Ok(false);
        }
        profile.profile_key = Some(key);
        self.put_profile(tx, address, &profile)?;
        if let Some(credential_key) = Self::credential_key(address) {
            tx.delete(&credential_key);
        }
        Ok(true)
    }

    /// Whether a profile key credential is on hand for `address`.
    pub fn has_credential(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<bool> {
        match Self::credential_key(address) {
            Some(key) => tx.contains(&key),
            None => Ok(false),
        }
    }

    /// Load the credential for `address`.
    pub fn credential(&self, tx: &impl ReadAccess, address: &Address) -> conclave_store::Result<Option<ProfileKeyCredential>> {
        match Self::credential_key(address) {
            Some(key) => tx.get_json(&key),
            None => Ok(None),
        }
    }

    /// Store a credential for `address`.
    pub fn put_credential(&self, tx: &mut WriteTx<'_>, address: &Address, credential: &ProfileKeyCredential) -> conclave_store::Result<()> {
        if let Some(key) = Self::credential_key(address) {
            tx.put_json(&key, credential)?;
        }
        Ok(())
    }
}
