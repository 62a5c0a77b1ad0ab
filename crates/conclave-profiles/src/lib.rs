//! Conclave Profiles: remote profile fetching and what it teaches us.
//!
//! A fetch resolves a user's public profile through a [`ProfileService`],
//! opens the sealed fields with their [`ProfileKey`], and records:
//!
//! - the user's protocol capabilities ([`AddressCapabilityStore`])
//! - a profile key credential, when the service issued one ([`ProfileStore`])
//! - the sealed-delivery mode ([`UnidentifiedAccessMode`])
//! - the identity key, handed to the [`IdentityStore`]
//!
//! Fetches are throttled per subject and run on a small cluster of serial
//! queues; see [`ProfileFetchScheduler`].

pub mod address;
pub mod capability;
pub mod cluster;
pub mod error;
pub mod fetcher;
pub mod profile_key;
pub mod profile_store;
pub mod service;
pub mod unidentified;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use address::{Address, ServiceId};
pub use capability::{AddressCapabilityStore, CapabilityRecord, ProfileCapabilities};
pub use cluster::{QueueCluster, QueueClosed};
pub use error::{CryptoError, NetworkError, ProfileFetchError, Result};
pub use fetcher::{FetchOptions, FetchedProfile, ProfileFetchConfig, ProfileFetchScheduler};
pub use profile_key::{AccessKey, ProfileKey, ProfileKeyCredential};
pub use profile_store::{ProfileStore, UserProfile};
pub use service::{FetchSubject, IdentityKey, IdentityStore, ProfileRequest, ProfileService, SignedProfile};
pub use unidentified::UnidentifiedAccessMode;
