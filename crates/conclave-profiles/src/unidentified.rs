//! Sealed-delivery ("unidentified access") classification.
//!
//! The service publishes a verifier per user: HMAC-SHA256 of 32 zero bytes
//! keyed with the user's access key. If our copy of the profile key yields
//! the same verifier we may send to that user without revealing the sender.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::profile_key::AccessKey;

type HmacSha256 = Hmac<Sha256>;

/// How messages to a user may be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnidentifiedAccessMode {
    /// Never fetched.
    #[default]
    Unknown,
    /// Sealed delivery is not possible.
    Disabled,
    /// Sealed delivery with the user's access key.
    Enabled,
    /// The user accepts sealed delivery from anyone.
    Unrestricted,
}

/// Compute the verifier expected for `access_key`.
pub fn compute_verifier(access_key: &AccessKey) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&access_key.0)
        .unwrap_or_else(|_| unreachable!("HMAC key length is valid"));
    mac.update(&[0u8; 32]);
    let mut verifier = [0u8; 32];
    verifier.copy_from_slice(&mac.finalize().into_bytes());
    verifier
}

/// Classify sealed delivery for a user.
///
/// A missing verifier, a missing key, or a mismatch disables sealed delivery.
pub fn classify(
    access_key: Option<&AccessKey>,
    verifier: Option<&[u8]>,
    unrestricted: bool,
) -> UnidentifiedAccessMode {
    let (Some(access_key), Some(verifier)) = (access_key, verifier) else {
        return UnidentifiedAccessMode::Disabled;
    };

    let expected = compute_verifier(access_key);
    if bool::from(expected.as_slice().ct_eq(verifier)) {
        if unrestricted {
            UnidentifiedAccessMode::Unrestricted
        } else {
            UnidentifiedAccessMode::Enabled
        }
    } else {
        UnidentifiedAccessMode::Disabled
    }
}
