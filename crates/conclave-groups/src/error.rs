//! Error types for group operations.

use thiserror::Error;

/// Result type for group operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the group server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// The server holds a newer revision than the change was based on.
    #[error("revision conflict")]
    Conflict,

    /// The local user may not perform this change.
    #[error("forbidden")]
    Forbidden,

    #[error("network error: {0}")]
    Network(String),
}

/// Failure handing an update to the message sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("attachment upload failed: {0}")]
    Upload(String),
}

/// Errors from building, converging and notifying groups.
#[derive(Debug, Error)]
pub enum Error {
    /// A member address is malformed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Group id length does not match the protocol.
    #[error("invalid group id: expected {expected} bytes, got {found}")]
    InvalidGroupId { expected: usize, found: usize },

    /// The local user would not be a full member of the updated group.
    #[error("local user is not a full member")]
    MissingLocalMember,

    /// The proposed update changes nothing.
    #[error("redundant change")]
    RedundantChange,

    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// The operation needs a versioned group.
    #[error("group is not versioned")]
    NotVersioned,

    /// The local user holds no pending invite for the group.
    #[error("local user is not a pending member")]
    NotPendingMember,

    /// An existing versioned group was rebuilt without its secret.
    #[error("missing group secret")]
    MissingGroupSecret,

    /// A change set does not apply on top of the given revision.
    #[error("change set targets revision {target}, model is at {current}")]
    RevisionConflict { current: u32, target: u32 },

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("storage error: {0}")]
    Storage(#[from] conclave_store::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this outcome is an expected no-op rather than a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::RedundantChange)
    }
}
