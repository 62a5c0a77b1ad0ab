//! Declarative diffs between two revisions of a versioned group.
//!
//! The engine sends a change set to the group server instead of a whole
//! model; the server applies it on top of the revision it was based on.

use conclave_profiles::Address;
use serde::{Deserialize, Serialize};

use crate::access::GroupAccessPolicy;
use crate::error::{Error, Result};
use crate::id::GroupId;
use crate::membership::{GroupMembership, MemberRole};
use crate::model::GroupModel;

/// A field that is either left alone or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change<T> {
    Keep,
    Set(T),
}

impl<T> Default for Change<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T: PartialEq + Clone> Change<T> {
    fn between(old: &T, new: &T) -> Self {
        if old == new {
            Self::Keep
        } else {
            Self::Set(new.clone())
        }
    }

    fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    fn apply(&self, current: T) -> T {
        match self {
            Self::Keep => current,
            Self::Set(value) => value.clone(),
        }
    }
}

/// A member added or re-roled by a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChange {
    pub address: Address,
    pub role: MemberRole,
    #[serde(default)]
    pub added_by: Option<Address>,
}

/// Everything that differs between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChangeSet {
    pub group_id: GroupId,
    pub base_revision: u32,
    pub target_revision: u32,
    pub added_members: Vec<MemberChange>,
    pub added_pending: Vec<MemberChange>,
    pub removed_members: Vec<Address>,
    pub removed_pending: Vec<Address>,
    pub promoted_pending: Vec<Address>,
    pub role_changes: Vec<MemberChange>,
    #[serde(default)]
    pub title: Change<Option<String>>,
    #[serde(default)]
    pub avatar: Change<Option<Vec<u8>>>,
    #[serde(default)]
    pub access: Change<GroupAccessPolicy>,
}

impl GroupChangeSet {
    /// A change set moving `model` to the next revision and nothing else.
    pub fn next_revision(model: &GroupModel) -> Self {
        Self {
            group_id: model.group_id().clone(),
            base_revision: model.revision(),
            target_revision: model.revision().saturating_add(1),
            added_members: Vec::new(),
            added_pending: Vec::new(),
            removed_members: Vec::new(),
            removed_pending: Vec::new(),
            promoted_pending: Vec::new(),
            role_changes: Vec::new(),
            title: Change::Keep,
            avatar: Change::Keep,
            access: Change::Keep,
        }
    }

    /// Describe the move from `old` to `new`. Both must be versioned.
    pub fn diff(old: &GroupModel, new: &GroupModel) -> Result<Self> {
        if !old.is_versioned() || !new.is_versioned() {
            return Err(Error::NotVersioned);
        }

        let mut change = Self {
            target_revision: new.revision(),
            title: Change::between(&old.title().map(str::to_string), &new.title().map(str::to_string)),
            avatar: Change::between(&old.avatar().map(<[u8]>::to_vec), &new.avatar().map(<[u8]>::to_vec)),
            access: Change::between(old.access(), new.access()),
            ..Self::next_revision(old)
        };

        let before = old.membership();
        for (address, entry) in new.membership().entries() {
            let added = MemberChange {
                address: address.clone(),
                role: entry.role,
                added_by: entry.added_by.clone(),
            };
            match before.entry(address) {
                None if entry.pending => change.added_pending.push(added),
                None => change.added_members.push(added),
                Some(previous) => {
                    if previous.pending && !entry.pending {
                        change.promoted_pending.push(address.clone());
                    } else if !previous.pending && entry.pending {
                        change.removed_members.push(address.clone());
                        change.added_pending.push(added);
                        continue;
                    }
                    if previous.role != entry.role {
                        change.role_changes.push(added);
                    }
                }
            }
        }
        for (address, entry) in before.entries() {
            if !new.membership().contains(address) {
                if entry.pending {
                    change.removed_pending.push(address.clone());
                } else {
                    change.removed_members.push(address.clone());
                }
            }
        }

        Ok(change)
    }

    /// Whether this change set alters nothing but the revision.
    pub fn is_empty(&self) -> bool {
        self.added_members.is_empty()
            && self.added_pending.is_empty()
            && self.removed_members.is_empty()
            && self.removed_pending.is_empty()
            && self.promoted_pending.is_empty()
            && self.role_changes.is_empty()
            && self.title.is_keep()
            && self.avatar.is_keep()
            && self.access.is_keep()
    }

    /// Apply on top of `model`, which must be at `base_revision`.
    pub fn apply_to(&self, model: &GroupModel) -> Result<GroupModel> {
        if !model.is_versioned() {
            return Err(Error::NotVersioned);
        }
        if model.group_id() != &self.group_id {
            return Err(Error::GroupNotFound(self.group_id.to_hex()));
        }
        if model.revision() != self.base_revision {
            return Err(Error::RevisionConflict {
                current: model.revision(),
                target: self.target_revision,
            });
        }

        let mut members = model.membership().to_builder();
        for address in self.removed_members.iter().chain(&self.removed_pending) {
            members.remove(address);
        }
        for added in &self.added_members {
            members.add_full(added.address.clone(), added.role);
        }
        for added in &self.added_pending {
            members.add_pending(added.address.clone(), added.role, added.added_by.clone());
        }
        for address in &self.promoted_pending {
            members.promote(address);
        }
        for changed in &self.role_changes {
            members.set_role(&changed.address, changed.role);
        }
        let membership: GroupMembership = members.build();

        Ok(GroupModel::from_parts(
            model.group_id().clone(),
            self.title.apply(model.title().map(str::to_string)),
            self.avatar.apply(model.avatar().map(<[u8]>::to_vec)),
            membership,
            self.access.apply(*model.access()),
            *model.protocol(),
            self.target_revision,
        ))
    }

    /// Serialized change payload carried in update messages.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
