//! Scripted gateway and fault-injecting store for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapters::memory::MemoryStore;
use crate::domain::result::{GatewayError, StoreError, StoreResult};
use crate::domain::{Account, Snapshot, Transaction, TransactionFilter};
use crate::ports::{LocalStore, RemoteGateway, StoreWriter, TransactionBody};

#[derive(Default)]
struct Script {
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
    failures: VecDeque<GatewayError>,
}

/// Gateway serving a fixed snapshot, with optional latency and queued failures
///
/// Each queued failure is returned by one `fetch_accounts` call.
#[derive(Default)]
pub struct MockGateway {
    script: Mutex<Script>,
    delay: Duration,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even if the fetch future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockGateway {
    pub fn new(accounts: Vec<Account>, transactions: Vec<Transaction>) -> Self {
        Self {
            script: Mutex::new(Script {
                accounts,
                transactions,
                failures: VecDeque::new(),
            }),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_snapshot(&self, accounts: Vec<Account>, transactions: Vec<Transaction>) {
        let mut script = self.script.lock().unwrap();
        script.accounts = accounts;
        script.transactions = transactions;
    }

    pub fn fail_next(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.script.lock().unwrap().failures.extend(errors);
    }

    /// Number of `fetch_accounts` calls, one per fetch attempt
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of `fetch_accounts` calls running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn fetch_accounts(&self) -> Result<Vec<Account>, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut script = self.script.lock().unwrap();
        match script.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(script.accounts.clone()),
        }
    }

    async fn fetch_transactions(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, GatewayError> {
        Ok(self.script.lock().unwrap().transactions.clone())
    }
}

/// Writer that fails once its write budget is used up
struct FailingWriter<'a> {
    inner: &'a mut dyn StoreWriter,
    remaining: usize,
}

impl FailingWriter<'_> {
    fn spend(&mut self) -> StoreResult<()> {
        if self.remaining == 0 {
            return Err(StoreError::database("injected write failure"));
        }
        self.remaining -= 1;
        Ok(())
    }
}

impl StoreWriter for FailingWriter<'_> {
    fn snapshot(&self) -> StoreResult<Snapshot> {
        self.inner.snapshot()
    }

    fn upsert_account(&mut self, account: &Account) -> StoreResult<()> {
        self.spend()?;
        self.inner.upsert_account(account)
    }

    fn upsert_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        self.spend()?;
        self.inner.upsert_transaction(tx)
    }

    fn delete_account(&mut self, id: &str) -> StoreResult<()> {
        self.spend()?;
        self.inner.delete_account(id)
    }

    fn delete_transaction(&mut self, id: &str) -> StoreResult<()> {
        self.spend()?;
        self.inner.delete_transaction(id)
    }
}

/// Memory store whose transactions fail after a fixed number of writes
pub struct FaultyStore {
    inner: MemoryStore,
    writes_before_failure: usize,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, writes_before_failure: usize) -> Self {
        Self {
            inner,
            writes_before_failure,
        }
    }
}

#[async_trait]
impl LocalStore for FaultyStore {
    async fn all_accounts(&self) -> StoreResult<Vec<Account>> {
        self.inner.all_accounts().await
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        self.inner.all_transactions(filter).await
    }

    async fn with_transaction(&self, body: TransactionBody) -> StoreResult<()> {
        let remaining = self.writes_before_failure;
        self.inner
            .with_transaction(Box::new(move |w| {
                let mut writer = FailingWriter {
                    inner: w,
                    remaining,
                };
                body(&mut writer)
            }))
            .await
    }
}
