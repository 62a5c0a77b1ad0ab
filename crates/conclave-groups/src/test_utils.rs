//! In-memory group server and message sender.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use conclave_profiles::Address;
use parking_lot::Mutex;

use crate::change_set::{GroupChangeSet, MemberChange};
use crate::error::{DeliveryError, Error, ServerError};
use crate::id::GroupId;
use crate::model::GroupModel;
use crate::notifier::{AttachmentId, MessageSender, OutboundMessage};
use crate::server::{AcceptedChange, GroupServer};

/// Group server that keeps every group in memory.
///
/// Change sets must be based on the revision the server holds, so a test
/// can simulate a concurrent writer with [`force_model`](Self::force_model).
pub struct MockGroupServer {
    local_address: Address,
    groups: Mutex<HashMap<GroupId, GroupModel>>,
    failure: Mutex<Option<ServerError>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockGroupServer {
    pub fn new(local_address: Address) -> Self {
        Self {
            local_address,
            groups: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every following call with `error`.
    pub fn fail_with(&self, error: ServerError) {
        *self.failure.lock() = Some(error);
    }

    /// Replace the server's copy of a group.
    pub fn force_model(&self, model: GroupModel) {
        self.groups.lock().insert(model.group_id().clone(), model);
    }

    pub fn model(&self, group_id: &GroupId) -> Option<GroupModel> {
        self.groups.lock().get(group_id).cloned()
    }

    /// Names of the trait methods called so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn enter(&self, call: &'static str) -> Result<(), ServerError> {
        self.calls.lock().push(call);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn apply(&self, current: &GroupModel, change: &GroupChangeSet) -> Result<AcceptedChange, ServerError> {
        let mut groups = self.groups.lock();
        let base = groups
            .get(current.group_id())
            .cloned()
            .unwrap_or_else(|| current.clone());
        let model = change.apply_to(&base).map_err(|e| match e {
            Error::RevisionConflict { .. } => ServerError::Conflict,
            _ => ServerError::Forbidden,
        })?;
        let change_payload = change
            .to_payload()
            .map_err(|e| ServerError::Network(e.to_string()))?;
        groups.insert(model.group_id().clone(), model.clone());
        Ok(AcceptedChange {
            model,
            change_payload,
        })
    }
}

#[async_trait]
impl GroupServer for MockGroupServer {
    async fn create_group(&self, model: &GroupModel) -> Result<GroupModel, ServerError> {
        self.enter("create_group")?;
        let mut groups = self.groups.lock();
        if groups.contains_key(model.group_id()) {
            return Err(ServerError::Conflict);
        }
        groups.insert(model.group_id().clone(), model.clone());
        Ok(model.clone())
    }

    async fn apply_change_set(&self, current: &GroupModel, change: &GroupChangeSet) -> Result<AcceptedChange, ServerError> {
        self.enter("apply_change_set")?;
        self.apply(current, change)
    }

    async fn accept_invite(&self, current: &GroupModel) -> Result<AcceptedChange, ServerError> {
        self.enter("accept_invite")?;
        if !current.membership().is_pending_member(&self.local_address) {
            return Err(ServerError::Forbidden);
        }
        let mut change = GroupChangeSet::next_revision(current);
        change.promoted_pending.push(self.local_address.clone());
        self.apply(current, &change)
    }

    async fn leave_group(&self, current: &GroupModel) -> Result<AcceptedChange, ServerError> {
        self.enter("leave_group")?;
        let membership = current.membership();
        let mut change = GroupChangeSet::next_revision(current);
        if membership.is_pending_member(&self.local_address) {
            change.removed_pending.push(self.local_address.clone());
        } else if membership.is_full_member(&self.local_address) {
            change.removed_members.push(self.local_address.clone());
        } else {
            return Err(ServerError::Forbidden);
        }
        self.apply(current, &change)
    }
}

/// Records enqueued messages and uploads.
#[derive(Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<OutboundMessage>>,
    uploads: Mutex<Vec<Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl RecordingSender {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().clone()
    }

    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().clone()
    }

    /// Make every following upload fail.
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn enqueue(&self, message: OutboundMessage) {
        self.messages.lock().push(message);
    }

    async fn upload_attachment(&self, data: &[u8]) -> Result<AttachmentId, DeliveryError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(DeliveryError::Upload("connection reset".into()));
        }
        let mut uploads = self.uploads.lock();
        uploads.push(data.to_vec());
        Ok(AttachmentId(format!("attachment-{}", uploads.len())))
    }
}

/// A change adding `address` as a full member.
pub fn add_member(model: &GroupModel, address: Address) -> GroupChangeSet {
    let mut change = GroupChangeSet::next_revision(model);
    change.added_members.push(MemberChange {
        address,
        role: Default::default(),
        added_by: None,
    });
    change
}
