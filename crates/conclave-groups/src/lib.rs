//! Conclave Groups: building group models and converging them safely.
//!
//! A group is either *legacy* (16-byte id, everyone a full member, no
//! ordering authority) or *versioned* (32-byte id derived from a secret,
//! pending invites, revisions ordered by a [`GroupServer`]).
//!
//! The pieces, bottom up:
//!
//! - [`GroupModelBuilder`] validates a proposal and picks the protocol
//! - [`MembershipPartitioner`] splits members into full and pending from a
//!   [`MemberFacts`] snapshot of capabilities and credentials
//! - [`GroupChangeSet`] describes one versioned revision step
//! - [`GroupConvergenceEngine`] reconciles proposed and incoming models with
//!   the persisted [`GroupThread`], never letting a versioned revision go
//!   backwards, and tells the other members through a [`MessageSender`]

pub mod access;
pub mod builder;
pub mod change_set;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod membership;
pub mod model;
pub mod notifier;
pub mod partition;
pub mod server;
pub mod thread;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use access::{AccessLevel, GroupAccessPolicy};
pub use builder::GroupModelBuilder;
pub use change_set::{Change, GroupChangeSet, MemberChange};
pub use config::GroupsConfig;
pub use engine::{GroupConvergenceEngine, GroupProposal, PendingUpdate, UpsertOutcome};
pub use error::{DeliveryError, Error, Result, ServerError};
pub use id::{GroupId, GroupProtocol, GroupSecret};
pub use membership::{GroupMembership, MemberEntry, MemberRole, MembershipBuilder};
pub use model::GroupModel;
pub use notifier::{AttachmentId, GroupUpdateNotifier, MessageSender, OutboundMessage};
pub use partition::{MemberFact, MemberFacts, MembershipPartitioner};
pub use server::{AcceptedChange, GroupServer};
pub use thread::{GroupStore, GroupThread, GroupUpdateRecord};
