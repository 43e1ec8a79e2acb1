//! Snapshots of synchronized data and the deltas between them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Account, Transaction};

/// A record the engine can reconcile: it has a stable id and a
/// modification timestamp.
pub trait Record: Clone {
    fn id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;

    /// True when both records carry the same remote data
    fn same_content(&self, other: &Self) -> bool;
}

impl Record for Account {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `last_synced_at` is local bookkeeping and never sent by the backend
    fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.account_type == other.account_type
            && self.balance == other.balance
            && self.currency == other.currency
            && self.is_active == other.is_active
            && self.updated_at == other.updated_at
    }
}

impl Record for Transaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }
}

/// Full set of accounts and transactions known to one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
}

impl Snapshot {
    /// Build a snapshot, ordering both collections by id
    pub fn new(mut accounts: Vec<Account>, mut transactions: Vec<Transaction>) -> Self {
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        transactions.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            accounts,
            transactions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    /// Return the snapshot obtained by applying `delta` to this one
    pub fn apply(&self, delta: &Delta) -> Snapshot {
        Snapshot {
            accounts: delta.accounts.apply_to(&self.accounts),
            transactions: delta.transactions.apply_to(&self.transactions),
        }
    }
}

/// Inserts, updates and deletes for one kind of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDelta<T> {
    pub inserts: Vec<T>,
    pub updates: Vec<T>,
    /// Ids of records to remove
    pub deletes: Vec<String>,
    /// Ids where a newer local record won over the remote one
    pub kept_local: Vec<String>,
}

impl<T> Default for RecordDelta<T> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            kept_local: Vec::new(),
        }
    }
}

impl<T: Record> RecordDelta<T> {
    /// True when applying the delta would not change anything
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Inserted and updated records
    pub fn upserts(&self) -> impl Iterator<Item = &T> {
        self.inserts.iter().chain(self.updates.iter())
    }

    fn apply_to(&self, records: &[T]) -> Vec<T> {
        let mut by_id: BTreeMap<String, T> = records
            .iter()
            .map(|r| (r.id().to_string(), r.clone()))
            .collect();
        for id in &self.deletes {
            by_id.remove(id);
        }
        for record in self.upserts() {
            by_id.insert(record.id().to_string(), record.clone());
        }
        by_id.into_values().collect()
    }
}

/// Changes needed to bring the local snapshot in line with the remote one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub accounts: RecordDelta<Account>,
    pub transactions: RecordDelta<Transaction>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }
}

/// Counts of what a delta did to one kind of record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub kept_local: usize,
}

impl ChangeStats {
    pub fn of<T: Record>(delta: &RecordDelta<T>) -> Self {
        Self {
            inserted: delta.inserts.len(),
            updated: delta.updates.len(),
            deleted: delta.deletes.len(),
            kept_local: delta.kept_local.len(),
        }
    }

    pub fn total_changes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}
