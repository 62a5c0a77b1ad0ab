//! Persisted group threads and their update history.
//!
//! Key layout:
//! - `group:{hex id}` holds the [`GroupThread`]
//! - `group_update:{hex id}:{sequence:020}` holds one [`GroupUpdateRecord`]
//!
//! Sequences are zero-padded so a prefix scan returns records in order.

use conclave_profiles::Address;
use conclave_store::{ReadAccess, WriteTx};
use serde::{Deserialize, Serialize};

use crate::id::GroupId;
use crate::model::GroupModel;

const THREAD_PREFIX: &str = "group:";
const UPDATE_PREFIX: &str = "group_update:";

/// A group conversation and its current model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupThread {
    pub model: GroupModel,
    /// Unix millis of insertion.
    pub created_at_ms: u64,
    /// Unix millis of the last committed transition.
    pub updated_at_ms: u64,
}

impl GroupThread {
    pub fn group_id(&self) -> &GroupId {
        self.model.group_id()
    }
}

/// One committed transition. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdateRecord {
    pub sequence: u64,
    pub group_id: GroupId,
    /// `None` for the insert of a new group.
    pub old_model: Option<GroupModel>,
    pub new_model: GroupModel,
    pub author: Option<Address>,
    pub timestamp_ms: u64,
}

/// Typed access to group threads and update records.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupStore;

impl GroupStore {
    fn thread_key(group_id: &GroupId) -> String {
        format!("{}{}", THREAD_PREFIX, group_id.to_hex())
    }

    fn update_prefix(group_id: &GroupId) -> String {
        format!("{}{}:", UPDATE_PREFIX, group_id.to_hex())
    }

    pub fn thread(&self, tx: &impl ReadAccess, group_id: &GroupId) -> conclave_store::Result<Option<GroupThread>> {
        tx.get_json(&Self::thread_key(group_id))
    }

    pub fn put_thread(&self, tx: &mut WriteTx<'_>, thread: &GroupThread) -> conclave_store::Result<()> {
        tx.put_json(&Self::thread_key(thread.group_id()), thread)
    }

    /// Update records for `group_id`, oldest first.
    pub fn records(&self, tx: &impl ReadAccess, group_id: &GroupId) -> conclave_store::Result<Vec<GroupUpdateRecord>> {
        tx.scan_json(&Self::update_prefix(group_id))
    }

    /// Append a record with the next sequence number for its group.
    pub fn append_record(
        &self,
        tx: &mut WriteTx<'_>,
        old_model: Option<GroupModel>,
        new_model: GroupModel,
        author: Option<Address>,
        timestamp_ms: u64,
    ) -> conclave_store::Result<GroupUpdateRecord> {
        let group_id = new_model.group_id().clone();
        let prefix = Self::update_prefix(&group_id);
        let sequence = tx.scan_raw(prefix.as_bytes())?.len() as u64;

        let record = GroupUpdateRecord {
            sequence,
            group_id,
            old_model,
            new_model,
            author,
            timestamp_ms,
        };
        tx.put_json(&format!("{}{:020}", prefix, sequence), &record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GroupModelBuilder;
    use crate::config::GroupsConfig;
    use crate::partition::MemberFacts;
    use conclave_store::Store;

    fn model() -> GroupModel {
        let local = Address::random();
        GroupModelBuilder::new()
            .build(&GroupsConfig::new(local.clone()), &MemberFacts::for_local(local))
            .unwrap()
    }

    #[test]
    fn records_are_sequenced_per_group() {
        let store = Store::in_memory();
        let groups = GroupStore;
        let first = model();
        let second = model();

        store
            .write(|tx| {
                groups.append_record(tx, None, first.clone(), None, 1)?;
                groups.append_record(tx, Some(first.clone()), first.with_revision(1), None, 2)?;
                groups.append_record(tx, None, second.clone(), None, 3)?;
                Ok::<_, conclave_store::Error>(())
            })
            .unwrap();

        let records = store.read(|tx| groups.records(tx, first.group_id())).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(records[1].new_model.revision(), 1);

        let other = store.read(|tx| groups.records(tx, second.group_id())).unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn thread_round_trip() {
        let store = Store::in_memory();
        let thread = GroupThread {
            model: model(),
            created_at_ms: 10,
            updated_at_ms: 10,
        };
        store.write(|tx| GroupStore.put_thread(tx, &thread)).unwrap();
        let loaded = store.read(|tx| GroupStore.thread(tx, thread.group_id())).unwrap();
        assert_eq!(loaded, Some(thread));
    }
}
