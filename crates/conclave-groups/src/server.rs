//! The group server, authority over versioned group revisions.

use async_trait::async_trait;

use crate::change_set::GroupChangeSet;
use crate::error::ServerError;
use crate::model::GroupModel;

/// A change the server accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedChange {
    /// The group as the server now has it.
    pub model: GroupModel,
    /// Serialized change, forwarded to members in the update message.
    pub change_payload: Vec<u8>,
}

/// Remote authority for versioned groups.
#[async_trait]
pub trait GroupServer: Send + Sync {
    /// Register a new group. Returns the model as created.
    async fn create_group(&self, model: &GroupModel) -> Result<GroupModel, ServerError>;

    /// Apply `change` on top of `current`.
    async fn apply_change_set(&self, current: &GroupModel, change: &GroupChangeSet) -> Result<AcceptedChange, ServerError>;

    /// Accept the local user's pending invite.
    async fn accept_invite(&self, current: &GroupModel) -> Result<AcceptedChange, ServerError>;

    /// Remove the local user from the group.
    async fn leave_group(&self, current: &GroupModel) -> Result<AcceptedChange, ServerError>;
}
