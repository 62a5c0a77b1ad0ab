//! In-memory doubles for the profile service and identity store.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use rand::RngCore;

use crate::address::Address;
use crate::capability::ProfileCapabilities;
use crate::error::NetworkError;
use crate::profile_key::{ProfileKey, ProfileKeyCredential, BIO_PADDED_LEN};
use crate::service::{FetchSubject, IdentityKey, IdentityStore, ProfileRequest, ProfileService, SignedProfile};
use crate::unidentified::compute_verifier;

type Scripted = Result<SignedProfile, NetworkError>;

/// Scripted profile service.
///
/// Responses queued with [`respond`](Self::respond) are served in order;
/// the last one repeats. Subjects with no script answer 404.
#[derive(Default)]
pub struct MockProfileService {
    responses: Mutex<HashMap<FetchSubject, VecDeque<Scripted>>>,
    avatars: Mutex<HashMap<String, Result<Vec<u8>, NetworkError>>>,
    requests: Mutex<Vec<ProfileRequest>>,
}

impl MockProfileService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, subject: FetchSubject, response: Scripted) {
        self.responses
            .lock()
            .entry(subject)
            .or_default()
            .push_back(response);
    }

    pub fn set_avatar(&self, path: &str, response: Result<Vec<u8>, NetworkError>) {
        self.avatars.lock().insert(path.to_string(), response);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProfileRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, subject: &FetchSubject) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| &request.subject == subject)
            .count()
    }
}

#[async_trait]
impl ProfileService for MockProfileService {
    async fn fetch_profile(&self, request: &ProfileRequest) -> Result<SignedProfile, NetworkError> {
        self.requests.lock().push(request.clone());
        let mut responses = self.responses.lock();
        let Some(queue) = responses.get_mut(&request.subject) else {
            return Err(NetworkError::Status(404));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(Err(NetworkError::Status(404)))
        } else {
            queue.front().cloned().unwrap_or(Err(NetworkError::Status(404)))
        }
    }

    async fn download_avatar(&self, path: &str) -> Result<Vec<u8>, NetworkError> {
        self.avatars
            .lock()
            .get(path)
            .cloned()
            .unwrap_or(Err(NetworkError::Status(404)))
    }
}

/// Identity store that remembers the last key per address.
#[derive(Default)]
pub struct MemoryIdentityStore {
    keys: Mutex<HashMap<Address, IdentityKey>>,
}

impl MemoryIdentityStore {
    pub fn identity(&self, address: &Address) -> Option<IdentityKey> {
        self.keys.lock().get(address).copied()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn save_remote_identity(&self, key: &IdentityKey, address: &Address) -> Result<bool, String> {
        let previous = self.keys.lock().insert(address.clone(), *key);
        Ok(matches!(previous, Some(previous) if previous != *key))
    }
}

/// A fresh, valid identity key.
pub fn random_identity_key() -> IdentityKey {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    IdentityKey(SigningKey::from_bytes(&seed).verifying_key().to_bytes())
}

/// 32 bytes that do not decode to an Ed25519 point.
pub fn invalid_identity_key() -> Vec<u8> {
    (0u8..=255)
        .map(|i| [i; 32])
        .find(|bytes| VerifyingKey::from_bytes(bytes).is_err())
        .map(|bytes| bytes.to_vec())
        .unwrap_or_default()
}

/// A service response for `address`, sealed under `key` when given.
///
/// Sealed responses carry a matching sealed-delivery verifier and a
/// credential.
pub fn sealed_profile(
    address: &Address,
    key: Option<&ProfileKey>,
    given_name: &str,
    versioned_groups: bool,
) -> SignedProfile {
    let mut signed = SignedProfile {
        address: Some(address.clone()),
        identity_key: random_identity_key().0.to_vec(),
        capabilities: ProfileCapabilities { versioned_groups },
        ..Default::default()
    };
    if let Some(key) = key {
        signed.name = key.encrypt_name(given_name, None).ok();
        signed.bio = key.encrypt(b"hello there", BIO_PADDED_LEN).ok();
        signed.unidentified_access_verifier = key
            .access_key()
            .ok()
            .map(|access| compute_verifier(&access).to_vec());
        signed.credential = Some(ProfileKeyCredential(key.0.to_vec()));
    }
    signed
}
