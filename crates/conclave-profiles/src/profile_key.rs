//! Profile keys and encrypted profile fields.
//!
//! Every encrypted field is `nonce(12) || ciphertext || tag` under
//! AES-256-GCM. Plaintexts are zero-padded so that field lengths leak as
//! little as possible; names are encoded as `given\0family`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::ServiceId;
use crate::error::CryptoError;

const NONCE_LEN: usize = 12;

/// Padded plaintext length for names.
pub const NAME_PADDED_LEN: usize = 128;
/// Padded plaintext length for the "about" text.
pub const BIO_PADDED_LEN: usize = 512;

/// Key used to seal a user's profile, shared with their contacts.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKey(pub [u8; 32]);

impl std::fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProfileKey(..)")
    }
}

/// Key gating sealed delivery to a user, derived from their profile key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessKey(pub [u8; 16]);

/// Opaque proof that we hold a member's profile key, issued by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeyCredential(pub Vec<u8>);

impl ProfileKey {
    /// Generate a random profile key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Derive the sealed-delivery access key.
    ///
    /// First 16 bytes of encrypting 16 zero bytes with an all-zero nonce.
    pub fn access_key(&self) -> Result<AccessKey, CryptoError> {
        let nonce = [0u8; NONCE_LEN];
        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), [0u8; 16].as_slice())
            .map_err(|_| CryptoError::Encryption)?;
        let mut key = [0u8; 16];
        key.copy_from_slice(&sealed[..16]);
        Ok(AccessKey(key))
    }

    /// Version string sent with versioned profile requests.
    pub fn version(&self, service_id: &ServiceId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(service_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Encrypt `plaintext`, zero-padded to `padded_len` when shorter.
    pub fn encrypt(&self, plaintext: &[u8], padded_len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut padded = plaintext.to_vec();
        if padded.len() < padded_len {
            padded.resize(padded_len, 0);
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), padded.as_slice())
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext` blob.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::Truncated(data.len()));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decryption)
    }

    /// Decrypt a padded UTF-8 field. Empty plaintext yields `None`.
    pub fn decrypt_string(&self, data: &[u8]) -> Result<Option<String>, CryptoError> {
        let plaintext = self.decrypt(data)?;
        let text = String::from_utf8(strip_padding(plaintext)).map_err(|_| CryptoError::Utf8)?;
        Ok(non_empty(text))
    }

    /// Encrypt a `given\0family` name.
    pub fn encrypt_name(&self, given: &str, family: Option<&str>) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = given.as_bytes().to_vec();
        if let Some(family) = family {
            plaintext.push(0);
            plaintext.extend_from_slice(family.as_bytes());
        }
        self.encrypt(&plaintext, NAME_PADDED_LEN)
    }

    /// Decrypt a `given\0family` name.
    pub fn decrypt_name(&self, data: &[u8]) -> Result<(Option<String>, Option<String>), CryptoError> {
        let plaintext = strip_padding(self.decrypt(data)?);
        let mut parts = plaintext.splitn(2, |b| *b == 0);
        let given = parts.next().map(|p| String::from_utf8(p.to_vec())).transpose();
        let family = parts.next().map(|p| String::from_utf8(p.to_vec())).transpose();
        match (given, family) {
            (Ok(given), Ok(family)) => Ok((given.and_then(non_empty), family.and_then(non_empty))),
            _ => Err(CryptoError::Utf8),
        }
    }
}

fn strip_padding(mut plaintext: Vec<u8>) -> Vec<u8> {
    while plaintext.last() == Some(&0) {
        plaintext.pop();
    }
    plaintext
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
