//! In-memory local store
//!
//! Keeps records in ordered maps. Useful for tests and for clients that
//! rebuild their cache on every launch.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{Account, Snapshot, Transaction, TransactionFilter};
use crate::ports::{LocalStore, StoreWriter, TransactionBody};

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: BTreeMap<String, Account>,
    transactions: BTreeMap<String, Transaction>,
}

impl StoreWriter for Tables {
    fn snapshot(&self) -> StoreResult<Snapshot> {
        Ok(Snapshot::new(
            self.accounts.values().cloned().collect(),
            self.transactions.values().cloned().collect(),
        ))
    }

    fn upsert_account(&mut self, account: &Account) -> StoreResult<()> {
        account.validate().map_err(StoreError::validation)?;
        self.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn upsert_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        tx.validate().map_err(StoreError::validation)?;
        self.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn delete_account(&mut self, id: &str) -> StoreResult<()> {
        self.accounts.remove(id);
        Ok(())
    }

    fn delete_transaction(&mut self, id: &str) -> StoreResult<()> {
        self.transactions.remove(id);
        Ok(())
    }
}

/// Local store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn all_accounts(&self) -> StoreResult<Vec<Account>> {
        let tables = self.tables.lock().await;
        Ok(tables.accounts.values().cloned().collect())
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect())
    }

    /// Writes go to a staged copy that replaces the live tables only when
    /// the body succeeds. The lock is held throughout, so concurrent
    /// transactions are serialized.
    async fn with_transaction(&self, body: TransactionBody) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        body(&mut staged)?;
        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, TransactionType};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_upsert_and_query() {
        let store = MemoryStore::new();
        store
            .upsert_account(&Account::new("acc-1", "Checking", AccountType::Checking))
            .await
            .unwrap();
        store
            .upsert_transaction(&Transaction::new(
                "tx-1",
                "acc-1",
                Decimal::new(-4250, 2),
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                TransactionType::Debit,
            ))
            .await
            .unwrap();

        assert_eq!(store.all_accounts().await.unwrap().len(), 1);
        let txs = store
            .all_transactions(&TransactionFilter::for_account("acc-1"))
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert!(store
            .all_transactions(&TransactionFilter::for_account("acc-2"))
            .await
            .unwrap()
            .is_empty());

        store.delete_transaction("tx-1").await.unwrap();
        assert!(store.snapshot().await.unwrap().transactions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_store_untouched() {
        let store = MemoryStore::new();
        store
            .upsert_account(&Account::new("acc-1", "Checking", AccountType::Checking))
            .await
            .unwrap();
        let before = store.snapshot().await.unwrap();

        let result = store
            .with_transaction(Box::new(|w| {
                w.delete_account("acc-1")?;
                w.upsert_account(&Account::new("acc-2", "Savings", AccountType::Savings))?;
                Err(StoreError::database("disk full"))
            }))
            .await;

        assert!(result.is_err());
        assert_eq!(store.snapshot().await.unwrap(), before);
    }
}
