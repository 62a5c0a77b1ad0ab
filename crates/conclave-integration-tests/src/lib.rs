//! Fixtures for cross-crate scenarios.
//!
//! A [`Client`] wires one local user's profile scheduler and group engine
//! to a shared in-memory store, the way a host application would.

use std::sync::Arc;
use std::time::Duration;

use conclave_groups::test_utils::{MockGroupServer, RecordingSender};
use conclave_groups::{GroupConvergenceEngine, GroupsConfig};
use conclave_profiles::test_utils::{sealed_profile, MemoryIdentityStore, MockProfileService};
use conclave_profiles::{
    Address, FetchOptions, FetchSubject, FetchedProfile, ProfileFetchConfig, ProfileFetchScheduler, ProfileKey,
    ProfileStore,
};
use conclave_store::Store;

/// One local user and their collaborators.
pub struct Client {
    pub local: Address,
    pub store: Store,
    pub service: Arc<MockProfileService>,
    pub identities: Arc<MemoryIdentityStore>,
    pub server: Arc<MockGroupServer>,
    pub sender: Arc<RecordingSender>,
    pub profiles: ProfileFetchScheduler,
    pub groups: GroupConvergenceEngine,
}

impl Client {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut GroupsConfig)) -> Self {
        conclave_logging::init_for_tests();
        let local = Address::random();
        let store = Store::in_memory();
        let service = Arc::new(MockProfileService::new());
        let identities = Arc::new(MemoryIdentityStore::default());
        let server = Arc::new(MockGroupServer::new(local.clone()));
        let sender = Arc::new(RecordingSender::default());

        let profile_config = ProfileFetchConfig {
            cooldown: Duration::from_secs(120),
            max_retries: 3,
            queue_count: 2,
            is_main_app: true,
            local_address: Some(local.clone()),
        };
        let profiles = ProfileFetchScheduler::new(profile_config, store.clone(), service.clone(), identities.clone());

        let mut groups_config = GroupsConfig::new(local.clone());
        configure(&mut groups_config);
        let groups = GroupConvergenceEngine::new(groups_config, store.clone(), server.clone(), sender.clone());

        Self {
            local,
            store,
            service,
            identities,
            server,
            sender,
            profiles,
            groups,
        }
    }

    /// Give the local user `user`'s profile key.
    pub fn share_key(&self, user: &Address, key: ProfileKey) -> conclave_store::Result<()> {
        self.store
            .write(|tx| ProfileStore.set_profile_key(tx, user, key).map(|_| ()))
    }

    /// Publish a profile for `user` sealed under a fresh key that the local
    /// user knows. Fetching it yields a credential.
    pub fn publish(&self, user: &Address, name: &str, versioned_groups: bool) -> conclave_store::Result<ProfileKey> {
        let key = ProfileKey::generate();
        self.share_key(user, key)?;
        self.service.respond(
            FetchSubject::Address(user.clone()),
            Ok(sealed_profile(user, Some(&key), name, versioned_groups)),
        );
        Ok(key)
    }

    /// Publish a profile for `user` whose key the local user lacks.
    pub fn publish_unsealed(&self, user: &Address, versioned_groups: bool) {
        self.service.respond(
            FetchSubject::Address(user.clone()),
            Ok(sealed_profile(user, None, "", versioned_groups)),
        );
    }

    /// Versioned fetch of `user`'s profile.
    pub async fn learn(&self, user: &Address) -> conclave_profiles::Result<FetchedProfile> {
        self.profiles
            .fetch(FetchSubject::Address(user.clone()), FetchOptions::default().versioned())
            .await
    }

    /// Versioned fetch that skips the cool-down.
    pub async fn refresh(&self, user: &Address) -> conclave_profiles::Result<FetchedProfile> {
        self.profiles
            .fetch(
                FetchSubject::Address(user.clone()),
                FetchOptions::default().versioned().ignore_throttling(),
            )
            .await
    }
}
