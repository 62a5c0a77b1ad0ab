//! Group membership.
//!
//! Each member has exactly one entry, so a user can never sit in two
//! partitions at once: {normal, administrator} x {full, pending}.

use std::collections::BTreeMap;

use conclave_profiles::{Address, ServiceId};
use serde::{Deserialize, Serialize};

/// A member's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemberRole {
    #[default]
    Normal,
    Administrator,
}

/// Role and standing of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub role: MemberRole,
    /// Invited but not yet confirmed.
    pub pending: bool,
    /// Who sent the invite, for pending members.
    pub added_by: Option<Address>,
}

/// The members of a group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupMembership {
    #[serde(with = "member_list")]
    members: BTreeMap<Address, MemberEntry>,
}

/// Stores the member map as a list, since addresses are not string keys.
mod member_list {
    use std::collections::BTreeMap;

    use conclave_profiles::Address;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{MemberEntry, MemberRole};

    #[derive(Serialize, Deserialize)]
    struct MemberRecord {
        address: Address,
        role: MemberRole,
        pending: bool,
        #[serde(default)]
        added_by: Option<Address>,
    }

    pub fn serialize<S: Serializer>(members: &BTreeMap<Address, MemberEntry>, serializer: S) -> Result<S::Ok, S::Error> {
        let records: Vec<MemberRecord> = members
            .iter()
            .map(|(address, entry)| MemberRecord {
                address: address.clone(),
                role: entry.role,
                pending: entry.pending,
                added_by: entry.added_by.clone(),
            })
            .collect();
        records.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<Address, MemberEntry>, D::Error> {
        let records = Vec::<MemberRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|r| {
                (
                    r.address,
                    MemberEntry {
                        role: r.role,
                        pending: r.pending,
                        added_by: r.added_by,
                    },
                )
            })
            .collect())
    }
}

impl GroupMembership {
    pub fn builder() -> MembershipBuilder {
        MembershipBuilder::default()
    }

    /// Start a builder from this membership.
    pub fn to_builder(&self) -> MembershipBuilder {
        MembershipBuilder {
            members: self.members.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn entry(&self, address: &Address) -> Option<&MemberEntry> {
        self.members.get(address)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Address, &MemberEntry)> {
        self.members.iter()
    }

    /// Every member of any kind, in address order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.members.keys()
    }

    pub fn full_members(&self) -> impl Iterator<Item = &Address> {
        self.members
            .iter()
            .filter(|(_, e)| !e.pending)
            .map(|(a, _)| a)
    }

    pub fn pending_members(&self) -> impl Iterator<Item = &Address> {
        self.members
            .iter()
            .filter(|(_, e)| e.pending)
            .map(|(a, _)| a)
    }

    /// Full administrators.
    pub fn administrators(&self) -> impl Iterator<Item = &Address> {
        self.members
            .iter()
            .filter(|(_, e)| !e.pending && e.role == MemberRole::Administrator)
            .map(|(a, _)| a)
    }

    pub fn role_of(&self, address: &Address) -> Option<MemberRole> {
        self.members.get(address).map(|e| e.role)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains_key(address)
    }

    pub fn is_full_member(&self, address: &Address) -> bool {
        self.members.get(address).is_some_and(|e| !e.pending)
    }

    pub fn is_pending_member(&self, address: &Address) -> bool {
        self.members.get(address).is_some_and(|e| e.pending)
    }

    /// Roles keyed by stable id. Members without one are left out.
    pub fn role_map(&self) -> BTreeMap<ServiceId, MemberRole> {
        self.members
            .iter()
            .filter_map(|(address, entry)| address.stable_id().map(|id| (id, entry.role)))
            .collect()
    }
}

/// Mutable staging area for a [`GroupMembership`].
#[derive(Debug, Clone, Default)]
pub struct MembershipBuilder {
    members: BTreeMap<Address, MemberEntry>,
}

impl MembershipBuilder {
    /// Add or overwrite `address` as a full member.
    pub fn add_full(&mut self, address: Address, role: MemberRole) -> &mut Self {
        self.upsert(
            address,
            MemberEntry {
                role,
                pending: false,
                added_by: None,
            },
        )
    }

    /// Add or overwrite `address` as a pending member.
    pub fn add_pending(&mut self, address: Address, role: MemberRole, added_by: Option<Address>) -> &mut Self {
        self.upsert(
            address,
            MemberEntry {
                role,
                pending: true,
                added_by,
            },
        )
    }

    // `BTreeMap::insert` keeps the old key, so a phone number learned from
    // either form of the address would otherwise be dropped or never stored.
    fn upsert(&mut self, address: Address, entry: MemberEntry) -> &mut Self {
        let address = match self.members.remove_entry(&address) {
            Some((known, _)) => known.merge(address),
            None => address,
        };
        self.members.insert(address, entry);
        self
    }

    pub fn remove(&mut self, address: &Address) -> &mut Self {
        self.members.remove(address);
        self
    }

    /// Turn a pending member into a full one, keeping the role.
    pub fn promote(&mut self, address: &Address) -> &mut Self {
        if let Some(entry) = self.members.get_mut(address) {
            entry.pending = false;
            entry.added_by = None;
        }
        self
    }

    pub fn set_role(&mut self, address: &Address, role: MemberRole) -> &mut Self {
        if let Some(entry) = self.members.get_mut(address) {
            entry.role = role;
        }
        self
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains_key(address)
    }

    pub fn build(&self) -> GroupMembership {
        GroupMembership {
            members: self.members.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_partition_per_member() {
        let alice = Address::random();
        let membership = GroupMembership::builder()
            .add_pending(alice.clone(), MemberRole::Normal, None)
            .add_full(alice.clone(), MemberRole::Administrator)
            .build();

        assert_eq!(membership.len(), 1);
        assert!(membership.is_full_member(&alice));
        assert!(!membership.is_pending_member(&alice));
        assert_eq!(membership.administrators().count(), 1);
    }

    #[test]
    fn both_forms_of_an_address_share_one_entry() {
        let id = ServiceId::random();
        let membership = GroupMembership::builder()
            .add_full(Address::new(id, "+14155550100"), MemberRole::Normal)
            .add_pending(Address::from_service_id(id), MemberRole::Normal, None)
            .build();

        assert_eq!(membership.len(), 1);
        assert!(membership.is_pending_member(&Address::from_service_id(id)));
        assert!(!membership.is_full_member(&Address::new(id, "+14155550100")));

        let stored = membership.addresses().next().unwrap();
        assert_eq!(stored.phone_number.as_deref(), Some("+14155550100"));
    }

    #[test]
    fn promote_keeps_role() {
        let alice = Address::random();
        let bob = Address::random();
        let membership = GroupMembership::builder()
            .add_pending(alice.clone(), MemberRole::Administrator, Some(bob.clone()))
            .add_full(bob.clone(), MemberRole::Normal)
            .promote(&alice)
            .build();

        assert!(membership.is_full_member(&alice));
        assert_eq!(membership.role_of(&alice), Some(MemberRole::Administrator));
        assert_eq!(membership.entry(&alice).unwrap().added_by, None);
    }

    #[test]
    fn role_map_skips_addresses_without_stable_id() {
        let alice = Address::random();
        let phone_only = Address::from_phone_number("+14155550100");
        let membership = GroupMembership::builder()
            .add_full(alice.clone(), MemberRole::Administrator)
            .add_full(phone_only.clone(), MemberRole::Normal)
            .build();

        let roles = membership.role_map();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles.get(&alice.stable_id().unwrap()), Some(&MemberRole::Administrator));
        assert_eq!(membership.addresses().count(), 2);
    }

    #[test]
    fn serializes_as_a_list() {
        let alice = Address::random();
        let bob = Address::random();
        let membership = GroupMembership::builder()
            .add_full(alice, MemberRole::Administrator)
            .add_pending(bob, MemberRole::Normal, None)
            .build();

        let json = serde_json::to_value(&membership).unwrap();
        assert!(json["members"].is_array());
        let back: GroupMembership = serde_json::from_value(json).unwrap();
        assert_eq!(back, membership);
    }
}
