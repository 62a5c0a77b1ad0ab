//! Who may change what in a group.

use serde::{Deserialize, Serialize};

use crate::id::GroupProtocol;
use crate::membership::MemberRole;

/// Minimum standing needed for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Anyone in the group, pending or not.
    Any,
    /// Full members.
    Member,
    /// Full administrators.
    Administrator,
}

/// Access levels for the two controlled operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAccessPolicy {
    /// Adding and inviting members
    pub members: AccessLevel,
    /// Editing title and avatar
    pub attributes: AccessLevel,
}

impl GroupAccessPolicy {
    /// Default policy for a new group.
    pub fn default_for(protocol: &GroupProtocol) -> Self {
        match protocol {
            GroupProtocol::Legacy => Self {
                members: AccessLevel::Any,
                attributes: AccessLevel::Any,
            },
            GroupProtocol::Versioned(_) => Self {
                members: AccessLevel::Member,
                attributes: AccessLevel::Member,
            },
        }
    }
}

impl AccessLevel {
    /// Whether a member with `role` (`None` if pending) meets this level.
    pub fn allows(&self, role: Option<MemberRole>) -> bool {
        match self {
            Self::Any => true,
            Self::Member => role.is_some(),
            Self::Administrator => role == Some(MemberRole::Administrator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GroupSecret;

    #[test]
    fn defaults_depend_on_protocol() {
        let legacy = GroupAccessPolicy::default_for(&GroupProtocol::Legacy);
        assert_eq!(legacy.members, AccessLevel::Any);

        let versioned =
            GroupAccessPolicy::default_for(&GroupProtocol::Versioned(GroupSecret::generate()));
        assert_eq!(versioned.members, AccessLevel::Member);
        assert_eq!(versioned.attributes, AccessLevel::Member);
    }

    #[test]
    fn levels_are_ordered_by_standing() {
        assert!(AccessLevel::Any.allows(None));
        assert!(!AccessLevel::Member.allows(None));
        assert!(AccessLevel::Member.allows(Some(MemberRole::Normal)));
        assert!(!AccessLevel::Administrator.allows(Some(MemberRole::Normal)));
        assert!(AccessLevel::Administrator.allows(Some(MemberRole::Administrator)));
    }
}
