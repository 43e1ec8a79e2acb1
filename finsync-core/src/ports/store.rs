//! Local store port - durable keyed storage for synchronized records

use async_trait::async_trait;

use crate::domain::result::StoreResult;
use crate::domain::{Account, Snapshot, Transaction, TransactionFilter};

/// Write access granted inside a store transaction
///
/// Writes are buffered by the store and become visible only if the
/// enclosing `with_transaction` body returns `Ok`.
pub trait StoreWriter {
    /// Everything the store holds, this transaction's writes included
    fn snapshot(&self) -> StoreResult<Snapshot>;

    fn upsert_account(&mut self, account: &Account) -> StoreResult<()>;

    fn upsert_transaction(&mut self, tx: &Transaction) -> StoreResult<()>;

    fn delete_account(&mut self, id: &str) -> StoreResult<()>;

    fn delete_transaction(&mut self, id: &str) -> StoreResult<()>;
}

/// Body of a scoped store transaction
pub type TransactionBody = Box<dyn FnOnce(&mut dyn StoreWriter) -> StoreResult<()> + Send>;

/// Local store abstraction
///
/// The store is the source of truth for the UI between sync cycles. All
/// writes go through `with_transaction`, which must be safe to call from
/// several tasks at once.
#[async_trait]
pub trait LocalStore: Send + Sync {
    // === Queries ===

    /// Get all accounts, ordered by id
    async fn all_accounts(&self) -> StoreResult<Vec<Account>>;

    /// Get transactions matching `filter`, ordered by id
    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>>;

    /// Get everything the store holds
    async fn snapshot(&self) -> StoreResult<Snapshot> {
        let accounts = self.all_accounts().await?;
        let transactions = self.all_transactions(&TransactionFilter::all()).await?;
        Ok(Snapshot::new(accounts, transactions))
    }

    // === Writes ===

    /// Run `body` atomically: every write it makes is applied, or none is
    async fn with_transaction(&self, body: TransactionBody) -> StoreResult<()>;

    async fn upsert_account(&self, account: &Account) -> StoreResult<()> {
        let account = account.clone();
        self.with_transaction(Box::new(move |w| w.upsert_account(&account)))
            .await
    }

    async fn upsert_transaction(&self, tx: &Transaction) -> StoreResult<()> {
        let tx = tx.clone();
        self.with_transaction(Box::new(move |w| w.upsert_transaction(&tx)))
            .await
    }

    async fn delete_account(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_transaction(Box::new(move |w| w.delete_account(&id)))
            .await
    }

    async fn delete_transaction(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_transaction(Box::new(move |w| w.delete_transaction(&id)))
            .await
    }
}
