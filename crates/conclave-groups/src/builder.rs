//! Validated construction of [`GroupModel`]s.

use conclave_profiles::Address;

use crate::access::GroupAccessPolicy;
use crate::config::GroupsConfig;
use crate::error::{Error, Result};
use crate::id::{GroupId, GroupProtocol, GroupSecret, VERSIONED_ID_LEN};
use crate::membership::{GroupMembership, MemberRole};
use crate::model::GroupModel;
use crate::partition::{MemberFacts, MembershipPartitioner};

/// Builds a new group, or the next state of an existing one.
///
/// ```
/// # use conclave_groups::{GroupModelBuilder, GroupsConfig, MemberFacts};
/// # use conclave_profiles::Address;
/// let local = Address::random();
/// let config = GroupsConfig::new(local.clone());
/// let model = GroupModelBuilder::new()
///     .title(Some("  Book club ".into()))
///     .build(&config, &MemberFacts::for_local(local.clone()))
///     .unwrap();
///
/// assert_eq!(model.title(), Some("Book club"));
/// assert_eq!(model.revision(), 0);
/// assert!(model.membership().is_full_member(&local));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GroupModelBuilder {
    existing: Option<(GroupId, Option<GroupSecret>)>,
    previous: Option<GroupModel>,
    protocol: Option<GroupProtocol>,
    title: Option<String>,
    avatar: Option<Vec<u8>>,
    membership: GroupMembership,
    access: Option<GroupAccessPolicy>,
    revision: u32,
}

impl GroupModelBuilder {
    /// Builder for a brand-new group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with every field of `model`.
    ///
    /// `model` also serves as the previous state when partitioning.
    pub fn from_model(model: &GroupModel) -> Self {
        Self {
            existing: Some((model.group_id().clone(), model.secret().copied())),
            previous: Some(model.clone()),
            protocol: None,
            title: model.title().map(str::to_string),
            avatar: model.avatar().map(<[u8]>::to_vec),
            membership: model.membership().clone(),
            access: Some(*model.access()),
            revision: model.revision(),
        }
    }

    /// Build for an existing group known only by id (and secret, if versioned).
    #[must_use]
    pub fn with_group_id(mut self, group_id: GroupId, secret: Option<GroupSecret>) -> Self {
        self.existing = Some((group_id, secret));
        self
    }

    /// Force the protocol of a new group.
    #[must_use]
    pub fn protocol(mut self, protocol: GroupProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    #[must_use]
    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    #[must_use]
    pub fn avatar(mut self, avatar: Option<Vec<u8>>) -> Self {
        self.avatar = avatar;
        self
    }

    #[must_use]
    pub fn membership(mut self, membership: GroupMembership) -> Self {
        self.membership = membership;
        self
    }

    #[must_use]
    pub fn access(mut self, access: GroupAccessPolicy) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// Validate the inputs and produce the model.
    pub fn build(self, config: &GroupsConfig, facts: &MemberFacts) -> Result<GroupModel> {
        if let Some(invalid) = self.membership.addresses().find(|a| !a.is_valid()) {
            return Err(Error::InvalidAddress(invalid.to_string()));
        }

        let is_new = self.existing.is_none();
        let (group_id, protocol) = match self.existing {
            Some((group_id, secret)) => {
                let protocol = match secret {
                    Some(secret) => GroupProtocol::Versioned(secret),
                    None if group_id.as_bytes().len() == VERSIONED_ID_LEN => {
                        return Err(Error::MissingGroupSecret);
                    }
                    None => GroupProtocol::Legacy,
                };
                group_id.validate(&protocol)?;
                (group_id, protocol)
            }
            None => {
                let protocol = self
                    .protocol
                    .unwrap_or_else(|| choose_protocol(config, facts, &self.membership));
                (protocol.new_group_id(), protocol)
            }
        };

        let membership = match protocol {
            GroupProtocol::Legacy => without_pending(&self.membership),
            GroupProtocol::Versioned(_) => {
                MembershipPartitioner.partition(&self.membership, self.previous.as_ref(), facts)
            }
        };
        let membership = if is_new {
            with_creator(membership, &config.local_address)
        } else {
            membership
        };

        let access = self
            .access
            .unwrap_or_else(|| GroupAccessPolicy::default_for(&protocol));
        let revision = if is_new { 0 } else { self.revision };

        Ok(GroupModel::from_parts(
            group_id,
            normalize_title(self.title),
            self.avatar.filter(|a| !a.is_empty()),
            membership,
            access,
            protocol,
            revision,
        ))
    }
}

/// Versioned only if enabled and every proposed member supports it.
fn choose_protocol(config: &GroupsConfig, facts: &MemberFacts, membership: &GroupMembership) -> GroupProtocol {
    if config.versioned_groups_enabled && facts.all_support_versioned(membership.addresses()) {
        GroupProtocol::Versioned(GroupSecret::generate())
    } else {
        GroupProtocol::Legacy
    }
}

/// Legacy groups have no invites; everyone is a full member.
fn without_pending(membership: &GroupMembership) -> GroupMembership {
    let mut builder = membership.to_builder();
    for address in membership.pending_members() {
        builder.promote(address);
    }
    builder.build()
}

/// The creator of a group is a full administrator.
fn with_creator(membership: GroupMembership, local: &Address) -> GroupMembership {
    if membership.is_full_member(local) {
        return membership;
    }
    membership
        .to_builder()
        .add_full(local.clone(), MemberRole::Administrator)
        .build()
}

fn normalize_title(title: Option<String>) -> Option<String> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::MemberFact;

    const READY: MemberFact = MemberFact {
        supports_versioned_groups: true,
        has_credential: true,
    };

    fn setup() -> (GroupsConfig, MemberFacts) {
        let local = Address::random();
        (GroupsConfig::new(local.clone()), MemberFacts::for_local(local))
    }

    #[test]
    fn empty_new_group_has_local_admin() {
        let (config, facts) = setup();
        let model = GroupModelBuilder::new().build(&config, &facts).unwrap();

        assert_eq!(model.revision(), 0);
        assert_eq!(model.membership().len(), 1);
        assert!(model.membership().is_full_member(&config.local_address));
        assert_eq!(
            model.membership().role_of(&config.local_address),
            Some(MemberRole::Administrator)
        );
    }

    #[test]
    fn unsupported_member_makes_group_legacy() {
        let (config, mut facts) = setup();
        let alice = Address::random();
        let bob = Address::random();
        facts.insert(alice.clone(), READY);

        let model = GroupModelBuilder::new()
            .membership(
                GroupMembership::builder()
                    .add_full(alice, MemberRole::Normal)
                    .add_full(bob, MemberRole::Normal)
                    .build(),
            )
            .build(&config, &facts)
            .unwrap();

        assert_eq!(*model.protocol(), GroupProtocol::Legacy);
        assert_eq!(model.group_id().as_bytes().len(), 16);
        assert_eq!(model.membership().pending_members().count(), 0);
        assert_eq!(model.membership().len(), 3);
    }

    #[test]
    fn supported_members_make_group_versioned() {
        let (config, mut facts) = setup();
        let alice = Address::random();
        let bob = Address::random();
        facts.insert(alice.clone(), READY).insert(
            bob.clone(),
            MemberFact {
                supports_versioned_groups: true,
                has_credential: false,
            },
        );

        let model = GroupModelBuilder::new()
            .membership(
                GroupMembership::builder()
                    .add_full(alice.clone(), MemberRole::Normal)
                    .add_full(bob.clone(), MemberRole::Normal)
                    .build(),
            )
            .build(&config, &facts)
            .unwrap();

        assert!(model.is_versioned());
        assert_eq!(*model.group_id(), model.secret().unwrap().derive_id());
        assert!(model.membership().is_full_member(&alice));
        assert!(model.membership().is_pending_member(&bob));
        assert!(model.membership().is_full_member(&config.local_address));
    }

    #[test]
    fn feature_gate_forces_legacy() {
        let (mut config, facts) = setup();
        config.versioned_groups_enabled = false;
        let model = GroupModelBuilder::new().build(&config, &facts).unwrap();
        assert!(!model.is_versioned());
    }

    #[test]
    fn explicit_protocol_wins() {
        let (config, facts) = setup();
        let model = GroupModelBuilder::new()
            .protocol(GroupProtocol::Legacy)
            .build(&config, &facts)
            .unwrap();
        assert!(!model.is_versioned());
    }

    #[test]
    fn invalid_address_is_rejected() {
        let (config, facts) = setup();
        let result = GroupModelBuilder::new()
            .membership(
                GroupMembership::builder()
                    .add_full(Address::from_phone_number("12345"), MemberRole::Normal)
                    .build(),
            )
            .build(&config, &facts);
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn existing_id_length_is_checked() {
        let (config, facts) = setup();
        let result = GroupModelBuilder::new()
            .with_group_id(GroupId::from_bytes(vec![0u8; 20]), None)
            .build(&config, &facts);
        assert!(matches!(result, Err(Error::InvalidGroupId { expected: 16, found: 20 })));
    }

    #[test]
    fn versioned_id_needs_secret() {
        let (config, facts) = setup();
        let id = GroupSecret::generate().derive_id();
        let result = GroupModelBuilder::new()
            .with_group_id(id, None)
            .build(&config, &facts);
        assert!(matches!(result, Err(Error::MissingGroupSecret)));
    }

    #[test]
    fn title_is_normalized() {
        let (config, facts) = setup();
        let blank = GroupModelBuilder::new()
            .title(Some("   ".into()))
            .build(&config, &facts)
            .unwrap();
        assert_eq!(blank.title(), None);

        let padded = GroupModelBuilder::new()
            .title(Some("\tChess ".into()))
            .build(&config, &facts)
            .unwrap();
        assert_eq!(padded.title(), Some("Chess"));
    }

    #[test]
    fn rebuild_keeps_identity_and_revision() {
        let (config, facts) = setup();
        let model = GroupModelBuilder::new()
            .title(Some("Chess".into()))
            .build(&config, &facts)
            .unwrap();
        let next = GroupModelBuilder::from_model(&model)
            .revision(4)
            .build(&config, &facts)
            .unwrap();

        assert_eq!(next.group_id(), model.group_id());
        assert_eq!(next.protocol(), model.protocol());
        assert_eq!(next.revision(), 4);
        assert!(next.same_content(&model));
    }

    #[test]
    fn legacy_rebuild_drops_pending_flags() {
        let (config, facts) = setup();
        let alice = Address::random();
        let model = GroupModelBuilder::new()
            .protocol(GroupProtocol::Legacy)
            .membership(
                GroupMembership::builder()
                    .add_pending(alice.clone(), MemberRole::Normal, None)
                    .build(),
            )
            .build(&config, &facts)
            .unwrap();
        assert!(model.membership().is_full_member(&alice));
    }
}
