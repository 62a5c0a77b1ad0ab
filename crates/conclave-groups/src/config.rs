//! Group engine configuration.

use conclave_profiles::Address;
use conclave_store::env::env_flag;

/// Configuration for group operations.
#[derive(Debug, Clone)]
pub struct GroupsConfig {
    /// The local user
    pub local_address: Address,

    /// Whether new groups may use the versioned protocol
    pub versioned_groups_enabled: bool,

    /// Accept pending invites for the local user automatically
    pub auto_accept_invites: bool,
}

impl GroupsConfig {
    pub fn new(local_address: Address) -> Self {
        Self {
            local_address,
            versioned_groups_enabled: true,
            auto_accept_invites: false,
        }
    }

    /// Create config from environment variables with sensible defaults.
    pub fn from_env(local_address: Address) -> Self {
        let defaults = Self::new(local_address);
        Self {
            versioned_groups_enabled: env_flag("CONCLAVE_VERSIONED_GROUPS", defaults.versioned_groups_enabled),
            auto_accept_invites: env_flag("CONCLAVE_AUTO_ACCEPT_INVITES", defaults.auto_accept_invites),
            ..defaults
        }
    }
}
