//! Reconciler - computes the delta between a remote and a local snapshot
//!
//! Rules, applied per id:
//! - only remote: insert
//! - both, local older or equally old: update (remote wins)
//! - both, local newer: keep local, drop the remote value
//! - only local: delete (tombstone-by-absence)
//!
//! A remote record that is identical to the local one and carries the same
//! timestamp produces no change at all.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::domain::{Delta, Record, RecordDelta, Snapshot};

/// Compute the changes that bring `local` in line with `remote`
///
/// Pure and total: the output depends only on the inputs and is ordered
/// by id.
pub fn reconcile(remote: &Snapshot, local: &Snapshot) -> Delta {
    Delta {
        accounts: reconcile_records(&remote.accounts, &local.accounts),
        transactions: reconcile_records(&remote.transactions, &local.transactions),
    }
}

/// Reconcile one kind of record
pub fn reconcile_records<T: Record>(remote: &[T], local: &[T]) -> RecordDelta<T> {
    // Duplicate remote ids collapse to the newest record; on a tie the
    // later occurrence wins
    let mut remote_by_id: BTreeMap<&str, &T> = BTreeMap::new();
    for record in remote {
        match remote_by_id.entry(record.id()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().updated_at() <= record.updated_at() {
                    slot.insert(record);
                }
            }
        }
    }
    let local_by_id: BTreeMap<&str, &T> = local.iter().map(|r| (r.id(), r)).collect();

    let mut delta = RecordDelta::default();
    for (id, remote_record) in &remote_by_id {
        match local_by_id.get(id) {
            None => delta.inserts.push((*remote_record).clone()),
            Some(local_record) if local_record.updated_at() > remote_record.updated_at() => {
                delta.kept_local.push(id.to_string());
            }
            Some(local_record) if local_record.same_content(remote_record) => {}
            Some(_) => delta.updates.push((*remote_record).clone()),
        }
    }
    delta.deletes = local_by_id
        .keys()
        .filter(|id| !remote_by_id.contains_key(*id))
        .map(|id| id.to_string())
        .collect();

    delta
}
