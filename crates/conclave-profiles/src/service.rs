//! Collaborators consumed by the fetch scheduler.

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::capability::ProfileCapabilities;
use crate::error::NetworkError;
use crate::profile_key::ProfileKeyCredential;

/// Who a profile fetch is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchSubject {
    Address(Address),
    Username(String),
}

impl std::fmt::Display for FetchSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{}", address),
            Self::Username(username) => write!(f, "@{}", username),
        }
    }
}

/// Long-term identity key of a user (Ed25519 public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKey(pub [u8; 32]);

impl IdentityKey {
    /// Parse and validate raw key bytes.
    ///
    /// Returns `None` unless the bytes are 32 long and decode to a curve point.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&raw).ok()?;
        Some(Self(raw))
    }

    /// Hex fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

/// A request sent to the profile service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    pub subject: FetchSubject,
    /// Set for versioned requests when we hold the subject's profile key.
    pub profile_key_version: Option<String>,
    /// Ask the service to issue a profile key credential.
    pub request_credential: bool,
}

/// The profile as returned by the service. Text fields are still sealed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedProfile {
    /// Resolved address of the subject (usernames resolve here).
    pub address: Option<Address>,
    pub identity_key: Vec<u8>,
    pub name: Option<Vec<u8>>,
    pub bio: Option<Vec<u8>>,
    pub bio_emoji: Option<Vec<u8>>,
    pub payment_address: Option<Vec<u8>>,
    pub avatar_path: Option<String>,
    pub unidentified_access_verifier: Option<Vec<u8>>,
    pub unrestricted_unidentified_access: bool,
    pub capabilities: ProfileCapabilities,
    pub credential: Option<ProfileKeyCredential>,
}

/// Network access to the profile service.
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Fetch the public profile described by `request`.
    async fn fetch_profile(&self, request: &ProfileRequest) -> Result<SignedProfile, NetworkError>;

    /// Download a sealed avatar blob.
    async fn download_avatar(&self, path: &str) -> Result<Vec<u8>, NetworkError>;
}

/// The local identity store.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Save `key` as the identity of `address`. Returns `true` if it changed.
    async fn save_remote_identity(&self, key: &IdentityKey, address: &Address) -> Result<bool, String>;
}
