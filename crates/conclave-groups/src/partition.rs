//! Splitting a proposed membership into full and pending members.
//!
//! Partitioning is a pure function over facts read up front: which users
//! support versioned groups, and for which users we hold a profile key
//! credential. It never fetches anything.

use std::collections::{BTreeSet, HashMap};

use conclave_profiles::{Address, AddressCapabilityStore, ProfileStore};
use conclave_store::ReadAccess;
use tracing::debug;

use crate::membership::GroupMembership;
use crate::model::GroupModel;

/// What we know about one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFact {
    pub supports_versioned_groups: bool,
    pub has_credential: bool,
}

/// Capability and credential facts for a set of users.
///
/// Users missing from the snapshot read as unsupported without a credential.
#[derive(Debug, Clone, Default)]
pub struct MemberFacts {
    facts: HashMap<Address, MemberFact>,
    local: Option<Address>,
}

impl MemberFacts {
    /// Facts about `local`, who always supports versioned groups.
    pub fn for_local(local: Address) -> Self {
        Self {
            facts: HashMap::new(),
            local: Some(local),
        }
    }

    /// Read the facts for `addresses` from the store.
    pub fn load<'a>(
        tx: &impl ReadAccess,
        local: &Address,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> conclave_store::Result<Self> {
        let mut facts = Self::for_local(local.clone());
        let unique: BTreeSet<&Address> = addresses.into_iter().collect();
        for address in unique {
            let fact = MemberFact {
                supports_versioned_groups: AddressCapabilityStore.supports_versioned_groups(tx, address)?,
                has_credential: ProfileStore.has_credential(tx, address)?,
            };
            facts.insert(address.clone(), fact);
        }
        Ok(facts)
    }

    pub fn insert(&mut self, address: Address, fact: MemberFact) -> &mut Self {
        self.facts.insert(address, fact);
        self
    }

    pub fn supports_versioned_groups(&self, address: &Address) -> bool {
        self.local.as_ref() == Some(address)
            || self
                .facts
                .get(address)
                .is_some_and(|f| f.supports_versioned_groups)
    }

    pub fn has_credential(&self, address: &Address) -> bool {
        self.facts.get(address).is_some_and(|f| f.has_credential)
    }

    /// Whether every one of `addresses` supports versioned groups.
    pub fn all_support_versioned<'a>(&self, mut addresses: impl Iterator<Item = &'a Address>) -> bool {
        addresses.all(|a| self.supports_versioned_groups(a))
    }
}

/// Splits members into full and pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct MembershipPartitioner;

impl MembershipPartitioner {
    /// Partition `proposed`.
    ///
    /// With no `previous` model (a new group), nothing is partitioned if any
    /// member lacks versioned support; the caller builds a legacy group.
    /// Otherwise a member is full if we hold their credential or they were
    /// already full in `previous`, and pending otherwise. Roles are kept.
    pub fn partition(
        &self,
        proposed: &GroupMembership,
        previous: Option<&GroupModel>,
        facts: &MemberFacts,
    ) -> GroupMembership {
        if previous.is_none() && !facts.all_support_versioned(proposed.addresses()) {
            debug!("not partitioning new group: a member lacks versioned support");
            return proposed.clone();
        }

        let mut builder = GroupMembership::builder();
        for (address, entry) in proposed.entries() {
            let already_full = previous.is_some_and(|m| m.membership().is_full_member(address));
            if already_full || facts.has_credential(address) {
                builder.add_full(address.clone(), entry.role);
            } else {
                builder.add_pending(address.clone(), entry.role, entry.added_by.clone());
            }
        }
        builder.build()
    }
}
