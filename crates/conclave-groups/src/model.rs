//! Immutable group snapshots.

use serde::{Deserialize, Serialize};

use crate::access::GroupAccessPolicy;
use crate::id::{GroupId, GroupProtocol, GroupSecret};
use crate::membership::GroupMembership;

/// One revision of a group's state.
///
/// Built by [`GroupModelBuilder`](crate::GroupModelBuilder) and never
/// mutated; a change produces a new model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupModel {
    group_id: GroupId,
    title: Option<String>,
    avatar: Option<Vec<u8>>,
    membership: GroupMembership,
    access: GroupAccessPolicy,
    protocol: GroupProtocol,
    revision: u32,
}

impl GroupModel {
    pub(crate) fn from_parts(
        group_id: GroupId,
        title: Option<String>,
        avatar: Option<Vec<u8>>,
        membership: GroupMembership,
        access: GroupAccessPolicy,
        protocol: GroupProtocol,
        revision: u32,
    ) -> Self {
        Self {
            group_id,
            title,
            avatar,
            membership,
            access,
            protocol,
            revision,
        }
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn avatar(&self) -> Option<&[u8]> {
        self.avatar.as_deref()
    }

    pub fn membership(&self) -> &GroupMembership {
        &self.membership
    }

    pub fn access(&self) -> &GroupAccessPolicy {
        &self.access
    }

    pub fn protocol(&self) -> &GroupProtocol {
        &self.protocol
    }

    pub fn is_versioned(&self) -> bool {
        self.protocol.is_versioned()
    }

    pub fn secret(&self) -> Option<&GroupSecret> {
        self.protocol.secret()
    }

    /// Revision number; always 0 for a new group.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The same content at a different revision.
    pub(crate) fn with_revision(&self, revision: u32) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// Equal in everything but the revision.
    pub fn same_content(&self, other: &GroupModel) -> bool {
        self.with_revision(other.revision) == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MemberRole;
    use conclave_profiles::Address;

    fn model(revision: u32, title: &str) -> GroupModel {
        let protocol = GroupProtocol::Legacy;
        GroupModel::from_parts(
            GroupId::parse(&[1u8; 16], &protocol).unwrap(),
            Some(title.to_string()),
            None,
            GroupMembership::builder()
                .add_full(Address::from_phone_number("+14155550100"), MemberRole::Administrator)
                .build(),
            GroupAccessPolicy::default_for(&protocol),
            protocol,
            revision,
        )
    }

    #[test]
    fn content_equality_ignores_revision() {
        assert!(model(1, "Book club").same_content(&model(7, "Book club")));
        assert!(!model(1, "Book club").same_content(&model(1, "Chess")));
        assert_ne!(model(1, "Book club"), model(2, "Book club"));
    }

    #[test]
    fn persists_as_json() {
        let original = model(3, "Book club");
        let json = serde_json::to_vec(&original).unwrap();
        let back: GroupModel = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, original);
    }
}
