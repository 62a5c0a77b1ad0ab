//! Telling the other members about a committed transition.

use std::sync::Arc;

use async_trait::async_trait;
use conclave_profiles::Address;
use tracing::{debug, error};

use crate::error::{DeliveryError, Result};
use crate::id::GroupId;
use crate::model::GroupModel;
use crate::thread::GroupThread;

/// Handle of an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentId(pub String);

/// A group update waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub group_id: GroupId,
    pub revision: u32,
    pub recipients: Vec<Address>,
    pub change_payload: Option<Vec<u8>>,
    /// Set when the update carries the group avatar.
    pub avatar: Option<AttachmentId>,
}

/// The outbound message queue.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Queue `message` for durable delivery. Does not wait for it.
    fn enqueue(&self, message: OutboundMessage);

    /// Upload an attachment ahead of the message that references it.
    async fn upload_attachment(&self, data: &[u8]) -> std::result::Result<AttachmentId, DeliveryError>;
}

/// Builds and enqueues group update messages.
#[derive(Clone)]
pub struct GroupUpdateNotifier {
    sender: Arc<dyn MessageSender>,
    local_address: Address,
}

impl GroupUpdateNotifier {
    pub fn new(sender: Arc<dyn MessageSender>, local_address: Address) -> Self {
        Self {
            sender,
            local_address,
        }
    }

    /// Everyone who should hear about `model`, except ourselves.
    ///
    /// Versioned groups include pending members.
    pub fn recipients(&self, model: &GroupModel) -> Vec<Address> {
        let membership = model.membership();
        let members: Vec<&Address> = if model.is_versioned() {
            membership.addresses().collect()
        } else {
            membership.full_members().collect()
        };
        members
            .into_iter()
            .filter(|a| **a != self.local_address)
            .cloned()
            .collect()
    }

    /// Send the update for `thread`, with the avatar when it has one.
    pub async fn notify(&self, thread: &GroupThread, change_payload: Option<Vec<u8>>) -> Result<()> {
        self.notify_recipients(thread, self.recipients(&thread.model), change_payload)
            .await
    }

    /// Send the update for `thread` to an explicit recipient list.
    pub async fn notify_recipients(
        &self,
        thread: &GroupThread,
        recipients: Vec<Address>,
        change_payload: Option<Vec<u8>>,
    ) -> Result<()> {
        let model = &thread.model;
        let recipients: Vec<Address> = recipients
            .into_iter()
            .filter(|a| *a != self.local_address)
            .collect();
        if recipients.is_empty() {
            debug!("No recipients for update of group {}", model.group_id());
            return Ok(());
        }

        let avatar = match model.avatar() {
            Some(data) => match self.sender.upload_attachment(data).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!("Avatar upload for group {} failed: {}", model.group_id(), e);
                    return Err(e.into());
                }
            },
            None => None,
        };

        debug!(
            "Enqueueing update of group {} (revision {}) to {} recipients",
            model.group_id(),
            model.revision(),
            recipients.len()
        );
        self.sender.enqueue(OutboundMessage {
            group_id: model.group_id().clone(),
            revision: model.revision(),
            recipients,
            change_payload,
            avatar,
        });
        Ok(())
    }
}
