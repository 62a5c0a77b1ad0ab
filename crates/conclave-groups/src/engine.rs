//! Revision-safe convergence of group state.
//!
//! # Transitions
//!
//! | Incoming | Persisted | Result |
//! |---|---|---|
//! | any model | absent | inserted |
//! | equal model | present | unchanged, nothing written |
//! | legacy model | present, differs | updated |
//! | versioned, revision < persisted | present | unchanged (stale) |
//! | versioned, revision >= persisted | present, differs | updated |
//!
//! Stale writes are an ordinary outcome of racing local and remote
//! updates and resolve to "unchanged"; they are never errors.
//!
//! Every read-decide-write runs inside one store write transaction, and
//! every committed transition appends a [`GroupUpdateRecord`] in the same
//! transaction.
//!
//! For versioned groups the server orders revisions: a locally computed
//! revision is provisional until the server accepts the change set, and
//! the accepted model is what gets persisted.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use conclave_profiles::Address;
use conclave_store::Store;
use tracing::{debug, info, warn};

use crate::access::GroupAccessPolicy;
use crate::builder::GroupModelBuilder;
use crate::change_set::GroupChangeSet;
use crate::config::GroupsConfig;
use crate::error::{Error, Result};
use crate::id::{GroupId, GroupProtocol};
use crate::membership::{GroupMembership, MemberRole};
use crate::model::GroupModel;
use crate::notifier::{GroupUpdateNotifier, MessageSender};
use crate::partition::MemberFacts;
use crate::server::GroupServer;
use crate::thread::{GroupStore, GroupThread, GroupUpdateRecord};

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The group was new.
    Inserted(GroupThread),
    /// The persisted model was replaced.
    Updated { old: GroupModel, thread: GroupThread },
    /// Nothing was written: the model was equal or stale.
    Unchanged(GroupThread),
}

impl UpsertOutcome {
    pub fn thread(&self) -> &GroupThread {
        match self {
            Self::Inserted(thread) | Self::Unchanged(thread) => thread,
            Self::Updated { thread, .. } => thread,
        }
    }

    pub fn into_thread(self) -> GroupThread {
        match self {
            Self::Inserted(thread) | Self::Unchanged(thread) => thread,
            Self::Updated { thread, .. } => thread,
        }
    }

    /// Whether a transition was written.
    pub fn is_committed(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// The desired state of a group, before validation.
#[derive(Debug, Clone, Default)]
pub struct GroupProposal {
    pub title: Option<String>,
    pub avatar: Option<Vec<u8>>,
    /// Members other than the local user may be listed as full; the
    /// partitioner decides who ends up pending.
    pub membership: GroupMembership,
    /// Defaults to the protocol's policy for new groups and to the current
    /// policy for updates.
    pub access: Option<GroupAccessPolicy>,
    /// Forces the protocol of a new group. Ignored by updates.
    pub protocol: Option<GroupProtocol>,
}

impl GroupProposal {
    /// A proposal that reproduces `model`; edit it to describe a change.
    pub fn from_model(model: &GroupModel) -> Self {
        Self {
            title: model.title().map(str::to_string),
            avatar: model.avatar().map(<[u8]>::to_vec),
            membership: model.membership().clone(),
            access: Some(*model.access()),
            protocol: None,
        }
    }
}

/// An update computed against the persisted model but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub old: GroupModel,
    /// Exactly one revision past `old`.
    pub new: GroupModel,
    /// Present for versioned groups.
    pub change_set: Option<GroupChangeSet>,
}

/// Reconciles proposed and incoming group models with persisted state.
#[derive(Clone)]
pub struct GroupConvergenceEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: GroupsConfig,
    store: Store,
    server: Arc<dyn GroupServer>,
    notifier: GroupUpdateNotifier,
    groups: GroupStore,
}

impl GroupConvergenceEngine {
    pub fn new(
        config: GroupsConfig,
        store: Store,
        server: Arc<dyn GroupServer>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        let notifier = GroupUpdateNotifier::new(sender, config.local_address.clone());
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                server,
                notifier,
                groups: GroupStore,
            }),
        }
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.inner.config
    }

    fn local(&self) -> &Address {
        &self.inner.config.local_address
    }

    /// The persisted thread for `group_id`.
    pub fn group_thread(&self, group_id: &GroupId) -> Result<Option<GroupThread>> {
        Ok(self
            .inner
            .store
            .read(|tx| self.inner.groups.thread(tx, group_id))?)
    }

    /// Committed transitions of `group_id`, oldest first.
    pub fn update_records(&self, group_id: &GroupId) -> Result<Vec<GroupUpdateRecord>> {
        Ok(self
            .inner
            .store
            .read(|tx| self.inner.groups.records(tx, group_id))?)
    }

    fn require_thread(&self, group_id: &GroupId) -> Result<GroupThread> {
        self.group_thread(group_id)?
            .ok_or_else(|| Error::GroupNotFound(group_id.to_hex()))
    }

    /// Insert or update the persisted model for `model`'s group.
    pub fn upsert_existing_group(&self, model: GroupModel, author: Option<Address>) -> Result<UpsertOutcome> {
        model.group_id().validate(model.protocol())?;
        let now = now_millis();
        let groups = self.inner.groups;

        let outcome = self.inner.store.write(|tx| {
            let outcome = match groups.thread(&*tx, model.group_id())? {
                None => {
                    let thread = GroupThread {
                        model: model.clone(),
                        created_at_ms: now,
                        updated_at_ms: now,
                    };
                    groups.put_thread(tx, &thread)?;
                    groups.append_record(tx, None, model.clone(), author.clone(), now)?;
                    UpsertOutcome::Inserted(thread)
                }
                Some(thread) if thread.model == model => UpsertOutcome::Unchanged(thread),
                Some(thread) if model.is_versioned() && model.revision() < thread.model.revision() => {
                    info!(
                        "Ignoring stale model for group {}: revision {} < persisted {}",
                        model.group_id(),
                        model.revision(),
                        thread.model.revision()
                    );
                    UpsertOutcome::Unchanged(thread)
                }
                Some(GroupThread {
                    model: old,
                    created_at_ms,
                    ..
                }) => {
                    let thread = GroupThread {
                        model: model.clone(),
                        created_at_ms,
                        updated_at_ms: now,
                    };
                    groups.put_thread(tx, &thread)?;
                    groups.append_record(tx, Some(old.clone()), model.clone(), author.clone(), now)?;
                    UpsertOutcome::Updated { old, thread }
                }
            };
            Ok::<_, Error>(outcome)
        })?;

        match &outcome {
            UpsertOutcome::Inserted(thread) => {
                debug!("Inserted group {} at revision {}", thread.group_id(), thread.model.revision())
            }
            UpsertOutcome::Updated { old, thread } => debug!(
                "Updated group {} from revision {} to {}",
                thread.group_id(),
                old.revision(),
                thread.model.revision()
            ),
            UpsertOutcome::Unchanged(_) => {}
        }
        if outcome.is_committed() {
            self.maybe_auto_accept(outcome.thread());
        }
        Ok(outcome)
    }

    /// Compute the next state of `group_id` from `proposal`.
    ///
    /// Nothing is persisted. Fails with [`Error::RedundantChange`] if the
    /// proposal rebuilds to the persisted model.
    pub fn compute_update(&self, group_id: &GroupId, proposal: GroupProposal) -> Result<PendingUpdate> {
        let local = self.local();
        let (thread, facts) = self.inner.store.read(|tx| {
            Ok((
                self.inner.groups.thread(tx, group_id)?,
                MemberFacts::load(tx, local, proposal.membership.addresses())?,
            ))
        })?;
        let thread = thread.ok_or_else(|| Error::GroupNotFound(group_id.to_hex()))?;
        self.compute_update_from(&thread.model, proposal, &facts)
    }

    fn compute_update_from(&self, old: &GroupModel, proposal: GroupProposal, facts: &MemberFacts) -> Result<PendingUpdate> {
        let local = self.local();
        let membership = match old.protocol() {
            GroupProtocol::Legacy if !proposal.membership.is_full_member(local) => {
                let role = proposal
                    .membership
                    .role_of(local)
                    .or_else(|| old.membership().role_of(local))
                    .unwrap_or(MemberRole::Normal);
                proposal
                    .membership
                    .to_builder()
                    .add_full(local.clone(), role)
                    .build()
            }
            _ => proposal.membership,
        };

        let candidate = GroupModelBuilder::from_model(old)
            .title(proposal.title)
            .avatar(proposal.avatar)
            .membership(membership)
            .access(proposal.access.unwrap_or(*old.access()))
            .revision(old.revision())
            .build(&self.inner.config, facts)?;

        if old.is_versioned() && !candidate.membership().is_full_member(local) {
            return Err(Error::MissingLocalMember);
        }
        if candidate == *old {
            return Err(Error::RedundantChange);
        }

        let revision = old.revision().checked_add(1).ok_or(Error::RevisionConflict {
            current: old.revision(),
            target: old.revision(),
        })?;
        let new = candidate.with_revision(revision);
        let change_set = match new.protocol() {
            GroupProtocol::Legacy => None,
            GroupProtocol::Versioned(_) => Some(GroupChangeSet::diff(old, &new)?),
        };

        Ok(PendingUpdate {
            old: old.clone(),
            new,
            change_set,
        })
    }

    /// Create a group, registering it with the server when versioned.
    pub async fn create_new_group(&self, proposal: GroupProposal) -> Result<GroupThread> {
        let local = self.local().clone();
        let facts = self
            .inner
            .store
            .read(|tx| MemberFacts::load(tx, &local, proposal.membership.addresses()))?;

        let mut builder = GroupModelBuilder::new()
            .title(proposal.title)
            .avatar(proposal.avatar)
            .membership(proposal.membership);
        if let Some(access) = proposal.access {
            builder = builder.access(access);
        }
        if let Some(protocol) = proposal.protocol {
            builder = builder.protocol(protocol);
        }
        let model = builder.build(&self.inner.config, &facts)?;

        let model = match model.protocol() {
            GroupProtocol::Legacy => model,
            GroupProtocol::Versioned(_) => self.inner.server.create_group(&model).await?,
        };
        info!(
            "Created {} group {} with {} members",
            if model.is_versioned() { "versioned" } else { "legacy" },
            model.group_id(),
            model.membership().len()
        );

        let thread = self.upsert_existing_group(model, Some(local))?.into_thread();
        self.inner.notifier.notify(&thread, None).await?;
        Ok(thread)
    }

    /// Apply `proposal` to an existing group.
    ///
    /// If a newer revision lands while the server round trip is in flight,
    /// the persisted thread is returned unchanged.
    pub async fn update_existing_group(&self, group_id: &GroupId, proposal: GroupProposal) -> Result<GroupThread> {
        let pending = self.compute_update(group_id, proposal)?;

        let (model, change_payload) = match &pending.change_set {
            Some(change) => {
                let accepted = self
                    .inner
                    .server
                    .apply_change_set(&pending.old, change)
                    .await?;
                (accepted.model, Some(accepted.change_payload))
            }
            None => (pending.new, None),
        };

        match self.upsert_existing_group(model, Some(self.local().clone()))? {
            UpsertOutcome::Unchanged(thread) => {
                debug!("Update of group {} was superseded", group_id);
                Ok(thread)
            }
            committed => {
                let thread = committed.into_thread();
                self.inner.notifier.notify(&thread, change_payload).await?;
                Ok(thread)
            }
        }
    }

    /// Accept the local user's pending invite to a versioned group.
    pub async fn accept_invite(&self, group_id: &GroupId) -> Result<GroupThread> {
        let thread = self.require_thread(group_id)?;
        if !thread.model.is_versioned() {
            return Err(Error::NotVersioned);
        }
        if !thread.model.membership().is_pending_member(self.local()) {
            return Err(Error::NotPendingMember);
        }

        let accepted = self.inner.server.accept_invite(&thread.model).await?;
        let outcome = self.upsert_existing_group(accepted.model, Some(self.local().clone()))?;
        if outcome.is_committed() {
            info!("Accepted invite to group {}", group_id);
            self.inner
                .notifier
                .notify(outcome.thread(), Some(accepted.change_payload))
                .await?;
        }
        Ok(outcome.into_thread())
    }

    /// Leave a group.
    ///
    /// Legacy groups drop the local user locally at the next revision;
    /// versioned groups ask the server.
    pub async fn leave_group(&self, group_id: &GroupId) -> Result<GroupThread> {
        let local = self.local().clone();
        let thread = self.require_thread(group_id)?;
        let old = &thread.model;
        if !old.membership().contains(&local) {
            return Err(Error::MissingLocalMember);
        }
        let recipients = self.inner.notifier.recipients(old);

        let (model, change_payload) = match old.protocol() {
            GroupProtocol::Legacy => {
                let revision = old.revision().saturating_add(1);
                let model = GroupModelBuilder::from_model(old)
                    .membership(old.membership().to_builder().remove(&local).build())
                    .revision(revision)
                    .build(&self.inner.config, &MemberFacts::for_local(local.clone()))?;
                (model, None)
            }
            GroupProtocol::Versioned(_) => {
                let accepted = self.inner.server.leave_group(old).await?;
                (accepted.model, Some(accepted.change_payload))
            }
        };

        let outcome = self.upsert_existing_group(model, Some(local))?;
        if outcome.is_committed() {
            info!("Left group {}", group_id);
            self.inner
                .notifier
                .notify_recipients(outcome.thread(), recipients, change_payload)
                .await?;
        }
        Ok(outcome.into_thread())
    }

    /// Spawn an invite acceptance if the local user is pending in `thread`.
    fn maybe_auto_accept(&self, thread: &GroupThread) {
        if !self.inner.config.auto_accept_invites
            || !thread.model.is_versioned()
            || !thread.model.membership().is_pending_member(self.local())
        {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to auto-accept invite to group {}", thread.group_id());
            return;
        };

        let engine = self.clone();
        let group_id = thread.group_id().clone();
        runtime.spawn(async move {
            if let Err(e) = engine.accept_invite(&group_id).await {
                warn!("Auto-accept of invite to group {} failed: {}", group_id, e);
            }
        });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::GroupSecret;
    use crate::partition::MemberFacts;
    use crate::test_utils::{MockGroupServer, RecordingSender};
    use crate::ServerError;
    use conclave_profiles::{AddressCapabilityStore, CapabilityRecord, ProfileKeyCredential, ProfileStore};
    use proptest::prelude::*;

    struct Harness {
        engine: GroupConvergenceEngine,
        store: Store,
        server: Arc<MockGroupServer>,
        sender: Arc<RecordingSender>,
        local: Address,
    }

    fn harness_with(configure: impl FnOnce(&mut GroupsConfig)) -> Harness {
        conclave_logging::init_for_tests();
        let local = Address::random();
        let mut config = GroupsConfig::new(local.clone());
        configure(&mut config);
        let store = Store::in_memory();
        let server = Arc::new(MockGroupServer::new(local.clone()));
        let sender = Arc::new(RecordingSender::default());
        let engine = GroupConvergenceEngine::new(config, store.clone(), server.clone(), sender.clone());
        Harness {
            engine,
            store,
            server,
            sender,
            local,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    /// Record that `address` supports versioned groups, optionally with a credential.
    fn learn(store: &Store, address: &Address, credential: bool) {
        store
            .write(|tx| {
                AddressCapabilityStore.set(tx, address, CapabilityRecord { supports_versioned_groups: true })?;
                if credential {
                    ProfileStore.put_credential(tx, address, &ProfileKeyCredential(vec![1, 2, 3]))?;
                }
                Ok::<_, conclave_store::Error>(())
            })
            .unwrap();
    }

    fn versioned_model(secret: GroupSecret, membership: GroupMembership, title: &str, revision: u32) -> GroupModel {
        let protocol = GroupProtocol::Versioned(secret);
        GroupModel::from_parts(
            secret.derive_id(),
            Some(title.to_string()),
            None,
            membership,
            GroupAccessPolicy::default_for(&protocol),
            protocol,
            revision,
        )
    }

    fn legacy_model(h: &Harness, members: &[&Address]) -> GroupModel {
        let mut membership = GroupMembership::builder();
        for member in members {
            membership.add_full((*member).clone(), MemberRole::Normal);
        }
        GroupModelBuilder::new()
            .protocol(GroupProtocol::Legacy)
            .title(Some("Lunch".into()))
            .membership(membership.build())
            .build(h.engine.config(), &MemberFacts::for_local(h.local.clone()))
            .unwrap()
    }

    fn only(address: &Address) -> GroupMembership {
        GroupMembership::builder()
            .add_full(address.clone(), MemberRole::Administrator)
            .build()
    }

    #[test]
    fn insert_then_identical_upsert_is_unchanged() {
        let h = harness();
        let model = versioned_model(GroupSecret::generate(), only(&h.local), "Chess", 0);

        let first = h.engine.upsert_existing_group(model.clone(), Some(h.local.clone())).unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = h.engine.upsert_existing_group(model.clone(), None).unwrap();
        assert!(matches!(second, UpsertOutcome::Unchanged(_)));

        let records = h.engine.update_records(model.group_id()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].old_model, None);
        assert_eq!(records[0].author, Some(h.local.clone()));
    }

    #[test]
    fn stale_versioned_model_is_ignored() {
        let h = harness();
        let secret = GroupSecret::generate();
        h.engine
            .upsert_existing_group(versioned_model(secret, only(&h.local), "Chess", 5), None)
            .unwrap();

        let outcome = h
            .engine
            .upsert_existing_group(versioned_model(secret, only(&h.local), "Old title", 4), None)
            .unwrap();

        assert!(matches!(outcome, UpsertOutcome::Unchanged(_)));
        let persisted = h.engine.group_thread(&secret.derive_id()).unwrap().unwrap();
        assert_eq!(persisted.model.revision(), 5);
        assert_eq!(persisted.model.title(), Some("Chess"));
        assert_eq!(h.engine.update_records(&secret.derive_id()).unwrap().len(), 1);
    }

    #[test]
    fn same_revision_with_new_content_updates() {
        let h = harness();
        let secret = GroupSecret::generate();
        h.engine
            .upsert_existing_group(versioned_model(secret, only(&h.local), "Chess", 5), None)
            .unwrap();
        let outcome = h
            .engine
            .upsert_existing_group(versioned_model(secret, only(&h.local), "Go", 5), None)
            .unwrap();

        match outcome {
            UpsertOutcome::Updated { old, thread } => {
                assert_eq!(old.title(), Some("Chess"));
                assert_eq!(thread.model.title(), Some("Go"));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn legacy_models_overwrite_regardless_of_revision() {
        let h = harness();
        let model = legacy_model(&h, &[]);
        h.engine.upsert_existing_group(model.with_revision(3), None).unwrap();
        let outcome = h.engine.upsert_existing_group(model.with_revision(1), None).unwrap();

        assert!(outcome.is_committed());
        assert_eq!(outcome.thread().model.revision(), 1);
    }

    #[test]
    fn malformed_group_id_is_rejected() {
        let h = harness();
        let protocol = GroupProtocol::Legacy;
        let model = GroupModel::from_parts(
            GroupId::from_bytes(vec![1u8; 32]),
            None,
            None,
            only(&h.local),
            GroupAccessPolicy::default_for(&protocol),
            protocol,
            0,
        );
        let result = h.engine.upsert_existing_group(model, None);
        assert!(matches!(result, Err(Error::InvalidGroupId { .. })));
    }

    #[test]
    fn identical_proposal_is_redundant() {
        let h = harness();
        let model = versioned_model(GroupSecret::generate(), only(&h.local), "Chess", 5);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let result = h
            .engine
            .compute_update(model.group_id(), GroupProposal::from_model(&model));
        let err = result.unwrap_err();
        assert!(matches!(err, Error::RedundantChange));
        assert!(err.is_benign());

        let persisted = h.engine.group_thread(model.group_id()).unwrap().unwrap();
        assert_eq!(persisted.model.revision(), 5);
        assert_eq!(h.engine.update_records(model.group_id()).unwrap().len(), 1);
    }

    #[test]
    fn update_bumps_revision_by_one() {
        let h = harness();
        let alice = Address::random();
        learn(&h.store, &alice, true);
        let model = versioned_model(GroupSecret::generate(), only(&h.local), "Chess", 7);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let mut proposal = GroupProposal::from_model(&model);
        proposal.membership = model
            .membership()
            .to_builder()
            .add_full(alice.clone(), MemberRole::Normal)
            .build();
        let pending = h.engine.compute_update(model.group_id(), proposal).unwrap();

        assert_eq!(pending.new.revision(), 8);
        assert!(pending.new.membership().is_full_member(&alice));
        let change = pending.change_set.unwrap();
        assert_eq!(change.base_revision, 7);
        assert_eq!(change.target_revision, 8);
        assert_eq!(change.added_members.len(), 1);

        // Nothing is persisted until the update is committed.
        let persisted = h.engine.group_thread(model.group_id()).unwrap().unwrap();
        assert_eq!(persisted.model.revision(), 7);
    }

    #[test]
    fn legacy_update_keeps_local_user() {
        let h = harness();
        let alice = Address::random();
        let model = legacy_model(&h, &[&alice]);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let proposal = GroupProposal {
            title: Some("Lunch".into()),
            membership: GroupMembership::builder()
                .add_full(alice.clone(), MemberRole::Normal)
                .build(),
            ..Default::default()
        };
        let pending = h.engine.compute_update(model.group_id(), proposal);
        // Dropping ourselves from a legacy group is not a change.
        assert!(matches!(pending, Err(Error::RedundantChange)));

        let bob = Address::random();
        let proposal = GroupProposal {
            title: Some("Lunch".into()),
            membership: GroupMembership::builder()
                .add_full(bob.clone(), MemberRole::Normal)
                .build(),
            ..Default::default()
        };
        let pending = h.engine.compute_update(model.group_id(), proposal).unwrap();
        assert!(pending.new.membership().is_full_member(&h.local));
        assert!(pending.new.membership().is_full_member(&bob));
        assert!(!pending.new.membership().contains(&alice));
        assert!(pending.change_set.is_none());
    }

    #[test]
    fn versioned_update_without_local_member_fails() {
        let h = harness();
        let alice = Address::random();
        let model = versioned_model(
            GroupSecret::generate(),
            GroupMembership::builder()
                .add_full(h.local.clone(), MemberRole::Administrator)
                .add_full(alice.clone(), MemberRole::Administrator)
                .build(),
            "Chess",
            2,
        );
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let mut proposal = GroupProposal::from_model(&model);
        proposal.membership = model.membership().to_builder().remove(&h.local).build();
        let result = h.engine.compute_update(model.group_id(), proposal);
        assert!(matches!(result, Err(Error::MissingLocalMember)));
    }

    #[test]
    fn local_user_listed_with_phone_number_is_a_member() {
        let h = harness();
        let local_with_phone = Address::new(h.local.stable_id().unwrap(), "+14155550100");
        let model = versioned_model(GroupSecret::generate(), only(&local_with_phone), "Chess", 3);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let mut proposal = GroupProposal::from_model(&model);
        proposal.title = Some("Go".into());
        let pending = h.engine.compute_update(model.group_id(), proposal).unwrap();

        assert_eq!(pending.new.revision(), 4);
        assert_eq!(pending.new.membership().len(), 1);
        assert!(pending.new.membership().is_full_member(&h.local));
    }

    #[test]
    fn legacy_update_does_not_add_local_user_twice() {
        let h = harness();
        let alice = Address::random();
        let bob = Address::random();
        let model = legacy_model(&h, &[&alice]);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let proposal = GroupProposal {
            title: Some("Lunch".into()),
            membership: GroupMembership::builder()
                .add_full(Address::new(h.local.stable_id().unwrap(), "+14155550100"), MemberRole::Normal)
                .add_full(alice.clone(), MemberRole::Normal)
                .add_full(bob.clone(), MemberRole::Normal)
                .build(),
            ..Default::default()
        };
        let pending = h.engine.compute_update(model.group_id(), proposal).unwrap();

        assert_eq!(pending.new.membership().len(), 3);
        assert!(pending.new.membership().is_full_member(&h.local));
        assert!(pending.new.membership().is_full_member(&bob));
    }

    #[test]
    fn unknown_group_is_not_found() {
        let h = harness();
        let id = GroupSecret::generate().derive_id();
        let result = h.engine.compute_update(&id, GroupProposal::default());
        assert!(matches!(result, Err(Error::GroupNotFound(_))));
    }

    #[tokio::test]
    async fn new_group_with_unsupported_member_is_legacy() {
        let h = harness();
        let alice = Address::random();
        let bob = Address::random();
        learn(&h.store, &alice, true);

        let thread = h
            .engine
            .create_new_group(GroupProposal {
                title: Some("Hike".into()),
                membership: GroupMembership::builder()
                    .add_full(alice.clone(), MemberRole::Normal)
                    .add_full(bob.clone(), MemberRole::Normal)
                    .build(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!thread.model.is_versioned());
        assert_eq!(thread.model.membership().pending_members().count(), 0);
        assert_eq!(thread.model.revision(), 0);
        assert!(h.server.calls().is_empty());
        assert_eq!(h.sender.messages().len(), 1);
        assert_eq!(h.sender.messages()[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn versioned_group_is_created_on_server() {
        let h = harness();
        let alice = Address::random();
        let bob = Address::random();
        learn(&h.store, &alice, true);
        learn(&h.store, &bob, false);

        let thread = h
            .engine
            .create_new_group(GroupProposal {
                membership: GroupMembership::builder()
                    .add_full(alice.clone(), MemberRole::Normal)
                    .add_full(bob.clone(), MemberRole::Normal)
                    .build(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(thread.model.is_versioned());
        assert!(thread.model.membership().is_full_member(&alice));
        assert!(thread.model.membership().is_pending_member(&bob));
        assert_eq!(h.server.calls(), vec!["create_group"]);
        assert_eq!(h.server.model(thread.group_id()), Some(thread.model.clone()));
        // Pending members hear about versioned groups too.
        assert_eq!(h.sender.messages()[0].recipients.len(), 2);
    }

    #[tokio::test]
    async fn versioned_update_goes_through_server() {
        let h = harness();
        let alice = Address::random();
        learn(&h.store, &alice, true);
        let created = h
            .engine
            .create_new_group(GroupProposal::default())
            .await
            .unwrap();

        let mut proposal = GroupProposal::from_model(&created.model);
        proposal.membership = created
            .model
            .membership()
            .to_builder()
            .add_full(alice.clone(), MemberRole::Normal)
            .build();
        let updated = h
            .engine
            .update_existing_group(created.group_id(), proposal)
            .await
            .unwrap();

        assert_eq!(updated.model.revision(), 1);
        assert!(updated.model.membership().is_full_member(&alice));
        assert_eq!(h.server.calls(), vec!["create_group", "apply_change_set"]);

        let messages = h.sender.messages();
        // The solo group had nobody to notify on creation.
        assert_eq!(messages.len(), 1);
        let payload = messages[0].change_payload.clone().unwrap();
        let change = GroupChangeSet::from_payload(&payload).unwrap();
        assert_eq!(change.added_members[0].address, alice);

        let records = h.engine.update_records(created.group_id()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].old_model.as_ref().map(GroupModel::revision), Some(0));
    }

    #[tokio::test]
    async fn server_conflict_persists_nothing() {
        let h = harness();
        let created = h
            .engine
            .create_new_group(GroupProposal::default())
            .await
            .unwrap();
        h.server.force_model(created.model.with_revision(3));

        let mut proposal = GroupProposal::from_model(&created.model);
        proposal.title = Some("Renamed".into());
        let result = h
            .engine
            .update_existing_group(created.group_id(), proposal)
            .await;

        assert!(matches!(result, Err(Error::Server(ServerError::Conflict))));
        let persisted = h.engine.group_thread(created.group_id()).unwrap().unwrap();
        assert_eq!(persisted.model, created.model);
    }

    #[tokio::test]
    async fn accepting_an_invite_promotes_local_user() {
        let h = harness();
        let alice = Address::random();
        let model = versioned_model(
            GroupSecret::generate(),
            GroupMembership::builder()
                .add_full(alice.clone(), MemberRole::Administrator)
                .add_pending(h.local.clone(), MemberRole::Normal, Some(alice.clone()))
                .build(),
            "Invite",
            4,
        );
        h.engine.upsert_existing_group(model.clone(), Some(alice.clone())).unwrap();

        let thread = h.engine.accept_invite(model.group_id()).await.unwrap();
        assert!(thread.model.membership().is_full_member(&h.local));
        assert_eq!(thread.model.revision(), 5);
        assert_eq!(h.sender.messages()[0].recipients, vec![alice]);

        let again = h.engine.accept_invite(model.group_id()).await;
        assert!(matches!(again, Err(Error::NotPendingMember)));
    }

    #[tokio::test]
    async fn legacy_groups_have_no_invites() {
        let h = harness();
        let model = legacy_model(&h, &[]);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();
        let result = h.engine.accept_invite(model.group_id()).await;
        assert!(matches!(result, Err(Error::NotVersioned)));
    }

    #[tokio::test]
    async fn leaving_a_legacy_group_is_local() {
        let h = harness();
        let alice = Address::random();
        let model = legacy_model(&h, &[&alice]);
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let thread = h.engine.leave_group(model.group_id()).await.unwrap();
        assert!(!thread.model.membership().contains(&h.local));
        assert_eq!(thread.model.revision(), model.revision() + 1);
        assert!(h.server.calls().is_empty());
        assert_eq!(h.sender.messages()[0].recipients, vec![alice]);
    }

    #[tokio::test]
    async fn leaving_a_versioned_group_asks_server() {
        let h = harness();
        let alice = Address::random();
        let model = versioned_model(
            GroupSecret::generate(),
            GroupMembership::builder()
                .add_full(alice.clone(), MemberRole::Administrator)
                .add_full(h.local.clone(), MemberRole::Normal)
                .build(),
            "Chess",
            1,
        );
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let thread = h.engine.leave_group(model.group_id()).await.unwrap();
        assert!(!thread.model.membership().contains(&h.local));
        assert_eq!(thread.model.revision(), 2);
        assert_eq!(h.server.calls(), vec!["leave_group"]);
        assert_eq!(h.sender.messages()[0].recipients, vec![alice]);
    }

    #[tokio::test]
    async fn pending_invite_is_auto_accepted() {
        let h = harness_with(|config| config.auto_accept_invites = true);
        let alice = Address::random();
        let model = versioned_model(
            GroupSecret::generate(),
            GroupMembership::builder()
                .add_full(alice.clone(), MemberRole::Administrator)
                .add_pending(h.local.clone(), MemberRole::Normal, Some(alice))
                .build(),
            "Invite",
            0,
        );
        h.engine.upsert_existing_group(model.clone(), None).unwrap();

        let mut accepted = false;
        for _ in 0..100 {
            let thread = h.engine.group_thread(model.group_id()).unwrap().unwrap();
            if thread.model.membership().is_full_member(&h.local) {
                accepted = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(accepted);
        assert_eq!(h.server.calls(), vec!["accept_invite"]);
    }

    #[tokio::test]
    async fn invites_wait_without_auto_accept() {
        let h = harness();
        let model = versioned_model(
            GroupSecret::generate(),
            GroupMembership::builder()
                .add_pending(h.local.clone(), MemberRole::Normal, None)
                .build(),
            "Invite",
            0,
        );
        h.engine.upsert_existing_group(model, None).unwrap();
        tokio::task::yield_now().await;
        assert!(h.server.calls().is_empty());
    }

    proptest! {
        #[test]
        fn persisted_revision_never_decreases(revisions in proptest::collection::vec(0u32..20, 1..25)) {
            let h = harness();
            let secret = GroupSecret([7u8; 32]);
            let group_id = secret.derive_id();

            for (step, revision) in revisions.iter().enumerate() {
                let before = h.engine.group_thread(&group_id).unwrap();
                let model = versioned_model(secret, only(&h.local), &format!("step {}", step), *revision);
                h.engine.upsert_existing_group(model, None).unwrap();
                let after = h.engine.group_thread(&group_id).unwrap().unwrap();

                if let Some(before) = before {
                    prop_assert!(after.model.revision() >= before.model.revision());
                    if *revision < before.model.revision() {
                        prop_assert_eq!(after, before);
                    }
                }
            }
        }

        #[test]
        fn legacy_updates_always_contain_local_user(
            include_local in any::<bool>(),
            others in 0usize..4,
            title in "[a-z]{1,8}",
        ) {
            let h = harness();
            let model = legacy_model(&h, &[]);
            h.engine.upsert_existing_group(model.clone(), None).unwrap();

            let mut membership = GroupMembership::builder();
            if include_local {
                membership.add_full(h.local.clone(), MemberRole::Normal);
            }
            for _ in 0..others {
                membership.add_full(Address::random(), MemberRole::Normal);
            }
            let proposal = GroupProposal {
                title: Some(title),
                membership: membership.build(),
                ..Default::default()
            };

            match h.engine.compute_update(model.group_id(), proposal) {
                Ok(pending) => {
                    prop_assert!(pending.new.membership().is_full_member(&h.local));
                    prop_assert_eq!(pending.new.revision(), model.revision() + 1);
                }
                Err(Error::RedundantChange) => {}
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
