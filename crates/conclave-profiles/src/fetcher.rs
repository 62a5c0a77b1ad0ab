//! Throttled, retrying profile fetches.
//!
//! # Request lifecycle
//!
//! ```text
//! Requested ─┬─ NotMainApp            (main_app_only outside the main app)
//!            ├─ Throttled             (same subject within the cool-down)
//!            └─ InFlight ─┬─ Succeeded
//!                         └─ Failed(kind)
//! ```
//!
//! The cool-down timestamp is recorded when a request is admitted, before
//! any network traffic, so overlapping requests for one subject are
//! throttled too. Admitted requests run on a [`QueueCluster`].
//!
//! # Retries
//!
//! Generic network failures are retried immediately, up to `max_retries`
//! extra attempts. 401, 404 and 413 answers, and responses carrying an
//! invalid identity key, end the fetch on the first attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use conclave_store::env::{env_flag, env_or};
use conclave_store::Store;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::capability::{AddressCapabilityStore, CapabilityRecord, ProfileCapabilities};
use crate::cluster::QueueCluster;
use crate::error::{CryptoError, ProfileFetchError, Result};
use crate::profile_key::ProfileKey;
use crate::profile_store::{ProfileStore, UserProfile};
use crate::service::{FetchSubject, IdentityKey, IdentityStore, ProfileRequest, ProfileService, SignedProfile};
use crate::unidentified;

/// Default cool-down between fetches of the same subject.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);
/// Default number of extra attempts after the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default number of serial fetch queues.
pub const DEFAULT_QUEUE_COUNT: usize = 5;

/// Configuration for the fetch scheduler.
#[derive(Debug, Clone)]
pub struct ProfileFetchConfig {
    /// Minimum time between two fetches of one subject
    pub cooldown: Duration,

    /// Extra attempts after a transient failure
    pub max_retries: u32,

    /// Number of serial queues in the worker cluster
    pub queue_count: usize,

    /// Whether this process is the main app (not an extension)
    pub is_main_app: bool,

    /// The local user, whose avatar failures are fatal
    pub local_address: Option<Address>,
}

impl Default for ProfileFetchConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ProfileFetchConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self {
            cooldown: Duration::from_secs(env_or(
                "CONCLAVE_PROFILE_COOLDOWN_SECS",
                DEFAULT_COOLDOWN.as_secs(),
            )),
            max_retries: env_or("CONCLAVE_PROFILE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            queue_count: env_or("CONCLAVE_PROFILE_QUEUES", DEFAULT_QUEUE_COUNT),
            is_main_app: env_flag("CONCLAVE_MAIN_APP", true),
            local_address: None,
        }
    }

    /// Set the local user's address.
    #[must_use]
    pub fn with_local_address(mut self, address: Address) -> Self {
        self.local_address = Some(address);
        self
    }

    /// Total attempts per fetch.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Skip the fetch unless running in the main app.
    pub main_app_only: bool,
    /// Bypass (but still record) the cool-down.
    pub ignore_throttling: bool,
    /// Issue a versioned request, which can return a credential.
    pub versioned: bool,
    /// Profile key to use instead of the stored one.
    pub profile_key: Option<ProfileKey>,
}

impl FetchOptions {
    #[must_use]
    pub fn main_app_only(mut self) -> Self {
        self.main_app_only = true;
        self
    }

    #[must_use]
    pub fn ignore_throttling(mut self) -> Self {
        self.ignore_throttling = true;
        self
    }

    #[must_use]
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    #[must_use]
    pub fn with_profile_key(mut self, key: ProfileKey) -> Self {
        self.profile_key = Some(key);
        self
    }
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedProfile {
    pub address: Address,
    pub profile: UserProfile,
    pub capabilities: ProfileCapabilities,
    pub credential_received: bool,
    pub identity_changed: bool,
}

/// Fetches remote profiles and records what they reveal.
#[derive(Clone)]
pub struct ProfileFetchScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: ProfileFetchConfig,
    store: Store,
    service: Arc<dyn ProfileService>,
    identities: Arc<dyn IdentityStore>,
    throttle: Mutex<HashMap<FetchSubject, Instant>>,
    cluster: QueueCluster,
    capabilities: AddressCapabilityStore,
    profiles: ProfileStore,
}

impl ProfileFetchScheduler {
    /// Create a scheduler. Must be called inside a tokio runtime.
    pub fn new(
        config: ProfileFetchConfig,
        store: Store,
        service: Arc<dyn ProfileService>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        let cluster = QueueCluster::new(config.queue_count);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                service,
                identities,
                throttle: Mutex::new(HashMap::new()),
                cluster,
                capabilities: AddressCapabilityStore,
                profiles: ProfileStore,
            }),
        }
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &ProfileFetchConfig {
        &self.inner.config
    }

    /// Fetch the profile of `subject`.
    pub async fn fetch(&self, subject: FetchSubject, options: FetchOptions) -> Result<FetchedProfile> {
        if options.main_app_only && !self.inner.config.is_main_app {
            debug!("Skipping profile fetch for {} outside the main app", subject);
            return Err(ProfileFetchError::NotMainApp);
        }
        self.inner.admit(&subject, options.ignore_throttling)?;

        let inner = Arc::clone(&self.inner);
        self.inner
            .cluster
            .run(async move { inner.perform(subject, options).await })
            .await
            .map_err(|_| ProfileFetchError::QueueClosed)?
    }

    /// Refresh the local user's own profile, ignoring the cool-down.
    pub async fn fetch_local_profile(&self) -> Result<FetchedProfile> {
        let Some(local) = self.inner.config.local_address.clone() else {
            return Err(ProfileFetchError::InvalidProfile("no local address configured".into()));
        };
        self.fetch(
            FetchSubject::Address(local),
            FetchOptions::default().ignore_throttling().versioned(),
        )
        .await
    }
}

impl Inner {
    /// Throttle check. Records the attempt time for every admitted request.
    fn admit(&self, subject: &FetchSubject, ignore_throttling: bool) -> Result<()> {
        let now = Instant::now();
        let mut throttle = self.throttle.lock();
        if !ignore_throttling {
            if let Some(last) = throttle.get(subject) {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.config.cooldown {
                    debug!("Throttling profile fetch for {} ({:?} since last)", subject, elapsed);
                    return Err(ProfileFetchError::Throttled);
                }
            }
        }
        throttle.insert(subject.clone(), now);
        Ok(())
    }

    fn is_local(&self, address: &Address) -> bool {
        self.config.local_address.as_ref() == Some(address)
    }

    async fn perform(&self, subject: FetchSubject, options: FetchOptions) -> Result<FetchedProfile> {
        let known_address = match &subject {
            FetchSubject::Address(address) => Some(address.clone()),
            FetchSubject::Username(_) => None,
        };
        let stored_key = match &known_address {
            Some(address) => self
                .store
                .read(|tx| self.profiles.profile_key_for(tx, address))?,
            None => None,
        };
        let request_key = options.profile_key.or(stored_key);

        let profile_key_version = match (&request_key, known_address.as_ref().and_then(Address::stable_id)) {
            (Some(key), Some(service_id)) if options.versioned => Some(key.version(&service_id)),
            _ => None,
        };
        let request = ProfileRequest {
            subject: subject.clone(),
            request_credential: profile_key_version.is_some(),
            profile_key_version,
        };

        let (signed, identity_key) = self.request_with_retries(&request).await?;

        let address = signed
            .address
            .clone()
            .or(known_address)
            .ok_or_else(|| ProfileFetchError::InvalidProfile("response carries no address".into()))?;
        let profile_key = match request_key {
            Some(key) => Some(key),
            None => self
                .store
                .read(|tx| self.profiles.profile_key_for(tx, &address))?,
        };

        let update = self
            .open_profile(&subject, &address, &signed, identity_key, profile_key)
            .await?;
        self.commit(address, signed, update).await
    }

    async fn request_with_retries(&self, request: &ProfileRequest) -> Result<(SignedProfile, IdentityKey)> {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.service.fetch_profile(request).await {
                Ok(signed) => {
                    return match IdentityKey::parse(&signed.identity_key) {
                        Some(key) => Ok((signed, key)),
                        None => {
                            warn!("Profile for {} carries an invalid identity key", request.subject);
                            Err(ProfileFetchError::InvalidIdentityKey)
                        }
                    };
                }
                Err(e) => ProfileFetchError::from(e),
            };

            if !error.is_retryable() {
                debug!("Profile fetch for {} failed: {}", request.subject, error);
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(
                    "Profile fetch for {} failed after {} attempts: {}",
                    request.subject, attempt, error
                );
                return Err(error);
            }
            debug!(
                "Retrying profile fetch for {} (attempt {}/{}): {}",
                request.subject, attempt, max_attempts, error
            );
        }
    }

    /// Decrypt the sealed fields and fetch the avatar.
    async fn open_profile(
        &self,
        subject: &FetchSubject,
        address: &Address,
        signed: &SignedProfile,
        identity_key: IdentityKey,
        profile_key: Option<ProfileKey>,
    ) -> Result<UserProfile> {
        let previous = self
            .store
            .read(|tx| self.profiles.profile(tx, address))?
            .unwrap_or_default();

        let mut profile = UserProfile {
            profile_key,
            identity_key: Some(identity_key),
            avatar_path: signed.avatar_path.clone(),
            last_fetched_ms: Some(now_millis()),
            ..Default::default()
        };

        let Some(key) = profile_key else {
            // Accepted without the sealed fields.
            debug!("No profile key for {}, storing profile without name", subject);
            profile.unidentified_access = unidentified::classify(None, None, false);
            return Ok(profile);
        };

        match decrypt_fields(&key, signed, &mut profile) {
            Ok(()) => {}
            Err(e) => {
                report_invalid_profile(subject, &e);
                return Err(e.into());
            }
        }

        let access_key = key.access_key()?;
        profile.unidentified_access = unidentified::classify(
            Some(&access_key),
            signed.unidentified_access_verifier.as_deref(),
            signed.unrestricted_unidentified_access,
        );

        profile.avatar = match &signed.avatar_path {
            None => None,
            Some(path) if previous.avatar_path.as_deref() == Some(path.as_str()) && previous.avatar.is_some() => {
                previous.avatar.clone()
            }
            Some(path) => match self.service.download_avatar(path).await {
                Ok(sealed) => match key.decrypt(&sealed) {
                    Ok(avatar) => Some(avatar),
                    Err(e) => {
                        warn!("Could not decrypt avatar for {}: {}", subject, e);
                        None
                    }
                },
                Err(e) if e.is_network_failure() && self.is_local(address) => {
                    // A partial view of our own profile could clobber a local edit.
                    error!("Avatar download for local profile failed: {}", e);
                    return Err(ProfileFetchError::AvatarUnavailable(e));
                }
                Err(e) => {
                    warn!("Avatar download for {} failed, continuing without it: {}", subject, e);
                    None
                }
            },
        };

        Ok(profile)
    }

    async fn commit(&self, address: Address, signed: SignedProfile, profile: UserProfile) -> Result<FetchedProfile> {
        let capabilities = signed.capabilities;
        let credential = signed.credential.filter(|_| profile.profile_key.is_some());
        let credential_received = credential.is_some();

        self.store.write(|tx| {
            self.capabilities
                .set(tx, &address, CapabilityRecord::from(capabilities))?;
            if let Some(credential) = &credential {
                self.profiles.put_credential(tx, &address, credential)?;
            }
            self.profiles.put_profile(tx, &address, &profile)?;
            Ok::<_, ProfileFetchError>(())
        })?;

        let identity_changed = match profile.identity_key {
            Some(key) => self
                .identities
                .save_remote_identity(&key, &address)
                .await
                .map_err(ProfileFetchError::Identity)?,
            None => false,
        };
        if identity_changed {
            info!("Identity key changed for {}", address);
        }

        debug!(
            "Fetched profile for {} (versioned groups: {}, credential: {})",
            address, capabilities.versioned_groups, credential_received
        );

        Ok(FetchedProfile {
            address,
            profile,
            capabilities,
            credential_received,
            identity_changed,
        })
    }
}

fn decrypt_fields(key: &ProfileKey, signed: &SignedProfile, profile: &mut UserProfile) -> std::result::Result<(), CryptoError> {
    if let Some(name) = &signed.name {
        let (given, family) = key.decrypt_name(name)?;
        profile.given_name = given;
        profile.family_name = family;
    }
    if let Some(bio) = &signed.bio {
        profile.bio = key.decrypt_string(bio)?;
    }
    if let Some(emoji) = &signed.bio_emoji {
        profile.bio_emoji = key.decrypt_string(emoji)?;
    }
    if let Some(payment) = &signed.payment_address {
        profile.payment_address = Some(key.decrypt(payment)?);
    }
    Ok(())
}

fn report_invalid_profile(subject: &FetchSubject, e: &CryptoError) {
    if cfg!(debug_assertions) {
        debug!("Could not open profile for {}: {}", subject, e);
    } else {
        error!("Could not open profile for {}: {}", subject, e);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
