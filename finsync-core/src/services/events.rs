//! Observation bus - multicast of sync lifecycle and data-change events
//!
//! Publishing is fire-and-forget: it never blocks, and a bus without
//! subscribers silently drops events. Slow subscribers lose the oldest
//! events once they fall `capacity` behind.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::domain::result::{GatewayError, SyncError};
use crate::domain::{Account, Record, RecordDelta, Transaction};
use crate::services::sync::SyncReport;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Coordinator state, observable by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Idle,
    Syncing,
    BackoffWait,
}

/// One record-level change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "record", rename_all = "lowercase")]
pub enum Change<T> {
    Inserted(T),
    Updated(T),
    Deleted(String),
}

impl<T: Record> Change<T> {
    pub fn id(&self) -> &str {
        match self {
            Change::Inserted(record) | Change::Updated(record) => record.id(),
            Change::Deleted(id) => id,
        }
    }
}

/// Records changed by one committed cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub cycle_id: Uuid,
    pub accounts: Vec<Change<Account>>,
    pub transactions: Vec<Change<Transaction>>,
}

impl ChangeSet {
    pub(crate) fn new(
        cycle_id: Uuid,
        accounts: &RecordDelta<Account>,
        transactions: &RecordDelta<Transaction>,
    ) -> Self {
        Self {
            cycle_id,
            accounts: changes_of(accounts),
            transactions: changes_of(transactions),
        }
    }

    /// Add accounts rewritten without a change of their own, such as
    /// owners of changed transactions whose sync stamp moved
    pub(crate) fn with_touched_accounts(mut self, touched: &[Account]) -> Self {
        self.accounts
            .extend(touched.iter().cloned().map(Change::Updated));
        self.accounts.sort_by(|a, b| a.id().cmp(b.id()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }

    /// Ids of every changed account
    pub fn account_ids(&self) -> Vec<&str> {
        self.accounts.iter().map(Change::id).collect()
    }

    /// Ids of every changed transaction
    pub fn transaction_ids(&self) -> Vec<&str> {
        self.transactions.iter().map(Change::id).collect()
    }
}

fn changes_of<T: Record>(delta: &RecordDelta<T>) -> Vec<Change<T>> {
    let mut changes: Vec<Change<T>> = delta
        .inserts
        .iter()
        .cloned()
        .map(Change::Inserted)
        .chain(delta.updates.iter().cloned().map(Change::Updated))
        .chain(delta.deletes.iter().cloned().map(Change::Deleted))
        .collect();
    changes.sort_by(|a, b| a.id().cmp(b.id()));
    changes
}

/// Event published on the bus
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged(SyncState),
    RetryScheduled {
        cycle_id: Uuid,
        /// Number of the attempt that just failed (1-based)
        attempt: u32,
        delay: Duration,
        error: GatewayError,
    },
    DataChanged(ChangeSet),
    SyncCompleted(SyncReport),
    SyncFailed { cycle_id: Uuid, error: SyncError },
}

/// Broadcast bus shared by the coordinator and its observers
#[derive(Debug, Clone)]
pub struct ObservationBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ObservationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: SyncEvent) {
        // An error only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`, skipping lag notifications
    pub fn stream(&self) -> Pin<Box<dyn Stream<Item = SyncEvent> + Send>> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountType;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = ObservationBus::new(4);
        bus.publish(SyncEvent::StateChanged(SyncState::Syncing));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = ObservationBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(SyncEvent::StateChanged(SyncState::Syncing));
        bus.publish(SyncEvent::StateChanged(SyncState::Idle));

        for rx in [&mut first, &mut second] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                SyncEvent::StateChanged(SyncState::Syncing)
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                SyncEvent::StateChanged(SyncState::Idle)
            ));
        }
    }

    #[tokio::test]
    async fn test_stream_skips_lag() {
        let bus = ObservationBus::new(2);
        let mut stream = bus.stream();

        for _ in 0..3 {
            bus.publish(SyncEvent::StateChanged(SyncState::Syncing));
        }
        bus.publish(SyncEvent::StateChanged(SyncState::Idle));

        // The oldest events were dropped; the stream resumes with what is left
        assert!(matches!(
            stream.next().await,
            Some(SyncEvent::StateChanged(SyncState::Syncing))
        ));
        assert!(matches!(
            stream.next().await,
            Some(SyncEvent::StateChanged(SyncState::Idle))
        ));
    }

    #[test]
    fn test_change_set_is_sorted_by_id() {
        let delta = RecordDelta {
            inserts: vec![Account::new("b", "B", AccountType::Savings)],
            updates: vec![Account::new("c", "C", AccountType::Checking)],
            deletes: vec!["a".to_string()],
            kept_local: vec![],
        };
        let set = ChangeSet::new(Uuid::new_v4(), &delta, &RecordDelta::default());
        assert_eq!(set.account_ids(), vec!["a", "b", "c"]);
        assert!(matches!(set.accounts[0], Change::Deleted(_)));
        assert!(set.transaction_ids().is_empty());
    }

    #[test]
    fn test_touched_accounts_are_reported_as_updates() {
        let delta = RecordDelta {
            inserts: vec![Account::new("c", "C", AccountType::Checking)],
            ..RecordDelta::default()
        };
        let owner = Account::new("b", "B", AccountType::Savings);
        let set = ChangeSet::new(Uuid::new_v4(), &delta, &RecordDelta::default())
            .with_touched_accounts(std::slice::from_ref(&owner));

        assert_eq!(set.account_ids(), vec!["b", "c"]);
        assert_eq!(set.accounts[0], Change::Updated(owner));
        assert!(!set.is_empty());
    }
}
