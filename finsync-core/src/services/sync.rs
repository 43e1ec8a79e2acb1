//! Sync coordinator - runs sync cycles, one at a time
//!
//! A cycle fetches the full remote snapshot, then reads the local store,
//! reconciles and commits the resulting delta inside one store transaction.
//! Callers that ask for a sync while a cycle is running join that cycle
//! instead of starting another one.
//!
//! Each cycle runs on its own tokio task. Dropping the future returned by
//! [`SyncCoordinator::start_sync`] does not cancel the cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::result::{GatewayError, SyncError};
use crate::domain::{Account, ChangeStats, Delta, Snapshot, Transaction};
use crate::ports::{LocalStore, RemoteGateway, StoreWriter};
use crate::services::events::{ChangeSet, ObservationBus, SyncEvent, SyncState};
use crate::services::reconcile::reconcile;
use crate::services::retry::RetryPolicy;

/// Summary of one successful cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Fetch attempts made, the successful one included
    pub attempts: u32,
    pub accounts: ChangeStats,
    pub transactions: ChangeStats,
}

impl SyncReport {
    pub fn changes_detected(&self) -> bool {
        self.accounts.total_changes() + self.transactions.total_changes() > 0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Records known after a successful cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub report: SyncReport,
}

pub type SyncOutcome = Result<Arc<SyncResult>, SyncError>;

/// Handle on a running cycle; every clone resolves to the same outcome
pub type SyncFuture = Shared<BoxFuture<'static, SyncOutcome>>;

const PANICKED: &str = "sync cycle panicked";

struct Inner {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<dyn LocalStore>,
    bus: ObservationBus,
    policy: RetryPolicy,
    state: watch::Sender<SyncState>,
    in_flight: Mutex<Option<SyncFuture>>,
    last_report: Mutex<Option<SyncReport>>,
}

/// Lock a mutex, recovering the data if a previous holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Coordinates sync cycles against one gateway and one store
///
/// Cheap to clone; clones share the same in-flight slot and state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn LocalStore>,
        bus: ObservationBus,
        policy: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                bus,
                policy,
                state,
                in_flight: Mutex::new(None),
                last_report: Mutex::new(None),
            }),
        }
    }

    /// Start a sync cycle, or join the one already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sync(&self) -> SyncFuture {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(running) = slot.as_ref() {
            debug!("sync already in flight, joining it");
            return running.clone();
        }

        let cycle_id = Uuid::new_v4();
        self.inner.set_state(SyncState::Syncing);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            // Clears the slot and returns to idle even if the cycle panics
            let _guard = CycleGuard {
                inner: Arc::clone(&inner),
                cycle_id,
            };
            inner.run_cycle(cycle_id).await
        });

        let future = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(SyncError::Aborted(PANICKED.to_string())),
                Err(e) => Err(SyncError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *slot = Some(future.clone());
        future
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    /// True while a cycle is running or waiting to retry
    pub fn is_syncing(&self) -> bool {
        lock(&self.inner.in_flight).is_some()
    }

    /// Receiver that always holds the current state
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Report of the last successful cycle
    pub fn last_report(&self) -> Option<SyncReport> {
        lock(&self.inner.last_report).clone()
    }

    pub fn bus(&self) -> &ObservationBus {
        &self.inner.bus
    }

    pub fn store(&self) -> Arc<dyn LocalStore> {
        Arc::clone(&self.inner.store)
    }
}

struct CycleGuard {
    inner: Arc<Inner>,
    cycle_id: Uuid,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let cycle_id = self.cycle_id;
            error!(%cycle_id, "sync cycle panicked");
            self.inner.bus.publish(SyncEvent::SyncFailed {
                cycle_id,
                error: SyncError::Aborted(PANICKED.to_string()),
            });
        }

        // Same lock order as start_sync, so a new cycle cannot be marked
        // idle by the one that just ended
        let mut slot = lock(&self.inner.in_flight);
        slot.take();
        self.inner.set_state(SyncState::Idle);
    }
}

impl Inner {
    fn set_state(&self, next: SyncState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.bus.publish(SyncEvent::StateChanged(next));
        }
    }

    async fn run_cycle(&self, cycle_id: Uuid) -> SyncOutcome {
        info!(%cycle_id, "sync cycle started");
        let outcome = self.execute(cycle_id).await;

        match &outcome {
            Ok(result) => {
                let report = &result.report;
                info!(
                    %cycle_id,
                    attempts = report.attempts,
                    accounts_changed = report.accounts.total_changes(),
                    transactions_changed = report.transactions.total_changes(),
                    kept_local = report.accounts.kept_local + report.transactions.kept_local,
                    "sync cycle completed"
                );
                *lock(&self.last_report) = Some(report.clone());
                self.bus.publish(SyncEvent::SyncCompleted(report.clone()));
            }
            Err(e) => {
                if matches!(
                    e,
                    SyncError::Gateway {
                        error: GatewayError::MalformedResponse(_),
                        ..
                    }
                ) {
                    error!(%cycle_id, error = %e, "sync cycle failed");
                } else {
                    warn!(%cycle_id, error = %e, "sync cycle failed");
                }
                self.bus.publish(SyncEvent::SyncFailed {
                    cycle_id,
                    error: e.clone(),
                });
            }
        }

        outcome.map(Arc::new)
    }

    async fn execute(&self, cycle_id: Uuid) -> Result<SyncResult, SyncError> {
        let started_at = Utc::now();
        let (remote, attempts) = self.fetch_with_retry(cycle_id).await?;

        // The local side is read inside the commit transaction, so a write
        // made through the store while the fetch ran is reconciled, not
        // overwritten
        let (staged_tx, staged_rx) = oneshot::channel();
        let committed = self
            .store
            .with_transaction(Box::new(move |w| {
                let local = match w.snapshot() {
                    Ok(local) => local,
                    Err(e) => {
                        let _ = staged_tx.send(Err(SyncError::Snapshot(e.clone())));
                        return Err(e);
                    }
                };
                let plan = CommitPlan::new(reconcile(&remote, &local), &local, Utc::now());
                let staged = plan.stage(cycle_id, &local);
                if !plan.is_empty() {
                    plan.write(w)?;
                }
                let _ = staged_tx.send(Ok(staged));
                Ok(())
            }))
            .await;

        let staged = match (committed, staged_rx.await) {
            (Ok(()), Ok(Ok(staged))) => staged,
            (_, Ok(Err(read_error))) => return Err(read_error),
            (Err(e), _) => return Err(SyncError::Commit(e)),
            (Ok(()), Err(_)) => {
                return Err(SyncError::Aborted(
                    "store committed without running the sync body".to_string(),
                ))
            }
        };

        if !staged.changes.is_empty() {
            self.bus.publish(SyncEvent::DataChanged(staged.changes));
        }

        Ok(SyncResult {
            accounts: staged.after.accounts,
            transactions: staged.after.transactions,
            report: SyncReport {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                attempts,
                accounts: staged.accounts,
                transactions: staged.transactions,
            },
        })
    }

    /// Fetch the full remote snapshot, retrying transient failures
    ///
    /// Always fetches everything: deletions are detected by absence, which
    /// an incremental fetch cannot show.
    async fn fetch_with_retry(&self, cycle_id: Uuid) -> Result<(Snapshot, u32), SyncError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let fetched = tokio::try_join!(
                self.gateway.fetch_accounts(),
                self.gateway.fetch_transactions(None)
            );

            match fetched {
                Ok((accounts, transactions)) => {
                    debug!(
                        %cycle_id,
                        attempt = attempts,
                        accounts = accounts.len(),
                        transactions = transactions.len(),
                        "remote snapshot fetched"
                    );
                    return Ok((Snapshot::new(accounts, transactions), attempts));
                }
                Err(error) if error.is_retryable() && self.policy.allows_another(attempts) => {
                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(
                        %cycle_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "fetch failed, retrying"
                    );
                    self.set_state(SyncState::BackoffWait);
                    self.bus.publish(SyncEvent::RetryScheduled {
                        cycle_id,
                        attempt: attempts,
                        delay,
                        error,
                    });
                    tokio::time::sleep(delay).await;
                    self.set_state(SyncState::Syncing);
                }
                Err(error) => return Err(SyncError::Gateway { error, attempts }),
            }
        }
    }
}

/// Everything one cycle writes to the store
struct CommitPlan {
    /// Reconciled delta, account upserts stamped with the sync time
    delta: Delta,
    /// Existing accounts whose transactions changed, stamped with the sync time
    touched: Vec<Account>,
}

/// Results of a plan, handed out of the store transaction
struct Staged {
    after: Snapshot,
    changes: ChangeSet,
    accounts: ChangeStats,
    transactions: ChangeStats,
}

impl CommitPlan {
    fn new(mut delta: Delta, local: &Snapshot, synced_at: DateTime<Utc>) -> Self {
        for account in delta
            .accounts
            .inserts
            .iter_mut()
            .chain(delta.accounts.updates.iter_mut())
        {
            account.last_synced_at = Some(synced_at);
        }

        // Owners of changed transactions, before and after the change
        let mut owners: BTreeSet<&str> = BTreeSet::new();
        for tx in delta.transactions.upserts() {
            owners.insert(tx.account_id.as_str());
        }
        for tx in &local.transactions {
            let replaced = delta.transactions.updates.iter().any(|u| u.id == tx.id);
            let deleted = delta.transactions.deletes.contains(&tx.id);
            if replaced || deleted {
                owners.insert(tx.account_id.as_str());
            }
        }

        let rewritten: BTreeSet<&str> = delta
            .accounts
            .upserts()
            .map(|a| a.id.as_str())
            .chain(delta.accounts.deletes.iter().map(String::as_str))
            .collect();

        let touched = local
            .accounts
            .iter()
            .filter(|a| owners.contains(a.id.as_str()) && !rewritten.contains(a.id.as_str()))
            .map(|a| {
                let mut account = a.clone();
                account.last_synced_at = Some(synced_at);
                account
            })
            .collect();

        Self { delta, touched }
    }

    fn is_empty(&self) -> bool {
        self.delta.is_empty() && self.touched.is_empty()
    }

    /// What the cycle reports once the plan is committed
    fn stage(&self, cycle_id: Uuid, local: &Snapshot) -> Staged {
        Staged {
            after: self.apply_to(local),
            changes: ChangeSet::new(cycle_id, &self.delta.accounts, &self.delta.transactions)
                .with_touched_accounts(&self.touched),
            accounts: ChangeStats::of(&self.delta.accounts),
            transactions: ChangeStats::of(&self.delta.transactions),
        }
    }

    /// Snapshot the store will hold once the plan is committed
    fn apply_to(&self, local: &Snapshot) -> Snapshot {
        let mut after = local.apply(&self.delta);
        let touched: BTreeMap<&str, &Account> =
            self.touched.iter().map(|a| (a.id.as_str(), a)).collect();
        for account in after.accounts.iter_mut() {
            if let Some(stamped) = touched.get(account.id.as_str()) {
                *account = (*stamped).clone();
            }
        }
        after
    }

    fn write(self, w: &mut dyn StoreWriter) -> crate::domain::result::StoreResult<()> {
        for id in &self.delta.transactions.deletes {
            w.delete_transaction(id)?;
        }
        for id in &self.delta.accounts.deletes {
            w.delete_account(id)?;
        }
        for account in self.delta.accounts.upserts() {
            w.upsert_account(account)?;
        }
        for tx in self.delta.transactions.upserts() {
            w.upsert_transaction(tx)?;
        }
        for account in &self.touched {
            w.upsert_account(account)?;
        }
        Ok(())
    }
}
