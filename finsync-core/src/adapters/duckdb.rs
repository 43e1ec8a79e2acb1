//! DuckDB local store implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use duckdb::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{
    Account, AccountType, Snapshot, Transaction, TransactionFilter, TransactionStatus,
    TransactionType,
};
use crate::ports::{LocalStore, StoreWriter, TransactionBody};
use crate::services::MigrationService;

/// Maximum number of attempts when the database file is locked
const MAX_OPEN_ATTEMPTS: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_lock_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const ACCOUNT_COLUMNS: &str = "account_id, name, account_type, balance, currency, is_active, \
                               last_synced_at, updated_at";

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, amount, description, \
                                   transaction_date::VARCHAR, transaction_type, status, updated_at";

/// Local store backed by an embedded DuckDB database
///
/// The connection lives behind a mutex and every call runs on tokio's
/// blocking pool, so the async callers never stall a runtime worker.
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) the database file and bring its schema up to date
    ///
    /// Opening is retried with exponential backoff on file-lock errors,
    /// which happen when another process holds the file briefly.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        let mut attempt = 0;
        let conn = loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => break conn,
                Err(e) => {
                    let err_msg = e.to_string();
                    attempt += 1;
                    if !is_lock_error(&err_msg) || attempt >= MAX_OPEN_ATTEMPTS {
                        return Err(e.into());
                    }
                    let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                    warn!(
                        path = %db_path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "database busy, retrying open"
                    );
                    thread::sleep(delay);
                }
            }
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path.to_path_buf()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open a throwaway in-memory database with the current schema
    pub fn open_in_memory() -> StoreResult<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn try_open_connection(db_path: &Path) -> duckdb::Result<Connection> {
        // Extension autoloading is disabled; nothing in the schema needs one
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Connection::open_with_flags(db_path, config)
    }

    /// Apply pending migrations
    pub fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        let result = MigrationService::new(&conn).run_pending()?;
        if !result.applied.is_empty() {
            debug!(applied = ?result.applied, "schema migrated");
        }
        Ok(())
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn run_blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// === Row mapping ===

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(column: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::database(format!("invalid {} '{}': {}", column, value, e)))
}

fn parse_decimal(column: &str, value: &str) -> StoreResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| StoreError::database(format!("invalid {} '{}': {}", column, value, e)))
}

/// Account columns as read from DuckDB, before parsing
struct AccountRow {
    id: String,
    name: String,
    account_type: String,
    balance: String,
    currency: String,
    is_active: bool,
    last_synced_at: Option<String>,
    updated_at: String,
}

impl AccountRow {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            account_type: row.get(2)?,
            balance: row.get(3)?,
            currency: row.get(4)?,
            is_active: row.get(5)?,
            last_synced_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_account(self) -> StoreResult<Account> {
        Ok(Account {
            balance: parse_decimal("balance", &self.balance)?,
            last_synced_at: self
                .last_synced_at
                .as_deref()
                .map(|s| parse_timestamp("last_synced_at", s))
                .transpose()?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            account_type: AccountType::parse(&self.account_type),
            id: self.id,
            name: self.name,
            currency: self.currency,
            is_active: self.is_active,
        })
    }
}

/// Transaction columns as read from DuckDB, before parsing
struct TransactionRow {
    id: String,
    account_id: String,
    amount: String,
    description: String,
    date: String,
    transaction_type: String,
    status: String,
    updated_at: String,
}

impl TransactionRow {
    fn from_row(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            amount: row.get(2)?,
            description: row.get(3)?,
            date: row.get(4)?,
            transaction_type: row.get(5)?,
            status: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_transaction(self) -> StoreResult<Transaction> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|e| {
            StoreError::database(format!("invalid transaction_date '{}': {}", self.date, e))
        })?;
        let transaction_type = TransactionType::parse(&self.transaction_type).ok_or_else(|| {
            StoreError::database(format!("invalid transaction_type '{}'", self.transaction_type))
        })?;
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::database(format!("invalid status '{}'", self.status)))?;

        Ok(Transaction {
            amount: parse_decimal("amount", &self.amount)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            account_id: self.account_id,
            description: self.description,
            date,
            transaction_type,
            status,
        })
    }
}

/// Build the WHERE clause and parameters for a transaction filter
///
/// All parameters are bound as text and cast in SQL, which keeps the
/// parameter list homogeneous.
fn filter_clause(filter: &TransactionFilter) -> (String, Vec<String>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(account_id) = &filter.account_id {
        conditions.push("account_id = ?".to_string());
        values.push(account_id.clone());
    }
    if let Some(start) = filter.start_date {
        conditions.push("transaction_date >= CAST(? AS DATE)".to_string());
        values.push(start.format("%Y-%m-%d").to_string());
    }
    if let Some(end) = filter.end_date {
        conditions.push("transaction_date <= CAST(? AS DATE)".to_string());
        values.push(end.format("%Y-%m-%d").to_string());
    }
    if let Some(min) = filter.min_amount {
        conditions.push("CAST(amount AS DECIMAL(38, 10)) >= CAST(? AS DECIMAL(38, 10))".to_string());
        values.push(min.to_string());
    }
    if let Some(max) = filter.max_amount {
        conditions.push("CAST(amount AS DECIMAL(38, 10)) <= CAST(? AS DECIMAL(38, 10))".to_string());
        values.push(max.to_string());
    }
    if let Some(search) = &filter.search {
        conditions.push("contains(lower(description), ?)".to_string());
        values.push(search.to_lowercase());
    }
    if !filter.types.is_empty() {
        let placeholders = vec!["?"; filter.types.len()].join(", ");
        conditions.push(format!("transaction_type IN ({})", placeholders));
        values.extend(filter.types.iter().map(|t| t.as_str().to_string()));
    }
    if !filter.statuses.is_empty() {
        let placeholders = vec!["?"; filter.statuses.len()].join(", ");
        conditions.push(format!("status IN ({})", placeholders));
        values.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

// === Reads ===

fn query_accounts(conn: &Connection) -> StoreResult<Vec<Account>> {
    let sql = format!(
        "SELECT {} FROM sys_accounts ORDER BY account_id",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], AccountRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter().map(AccountRow::into_account).collect()
}

fn query_transactions(
    conn: &Connection,
    clause: &str,
    values: Vec<String>,
) -> StoreResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM sys_transactions{} ORDER BY transaction_id",
        TRANSACTION_COLUMNS, clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), TransactionRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(TransactionRow::into_transaction)
        .collect()
}

// === Writes ===

/// Writer bound to an open DuckDB transaction
struct DuckDbWriter<'a> {
    conn: &'a Connection,
}

impl StoreWriter for DuckDbWriter<'_> {
    fn snapshot(&self) -> StoreResult<Snapshot> {
        let accounts = query_accounts(self.conn)?;
        let transactions = query_transactions(self.conn, "", Vec::new())?;
        Ok(Snapshot::new(accounts, transactions))
    }

    fn upsert_account(&mut self, account: &Account) -> StoreResult<()> {
        account.validate().map_err(StoreError::validation)?;
        self.conn.execute(
            "INSERT INTO sys_accounts (account_id, name, account_type, balance, currency,
                                       is_active, last_synced_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (account_id) DO UPDATE SET
                name = EXCLUDED.name,
                account_type = EXCLUDED.account_type,
                balance = EXCLUDED.balance,
                currency = EXCLUDED.currency,
                is_active = EXCLUDED.is_active,
                last_synced_at = EXCLUDED.last_synced_at,
                updated_at = EXCLUDED.updated_at",
            params![
                account.id,
                account.name,
                account.account_type.as_str(),
                account.balance.to_string(),
                account.currency,
                account.is_active,
                account.last_synced_at.as_ref().map(format_timestamp),
                format_timestamp(&account.updated_at),
            ],
        )?;
        Ok(())
    }

    fn upsert_transaction(&mut self, tx: &Transaction) -> StoreResult<()> {
        tx.validate().map_err(StoreError::validation)?;
        self.conn.execute(
            "INSERT INTO sys_transactions (transaction_id, account_id, amount, description,
                                           transaction_date, transaction_type, status, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_id) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                amount = EXCLUDED.amount,
                description = EXCLUDED.description,
                transaction_date = EXCLUDED.transaction_date,
                transaction_type = EXCLUDED.transaction_type,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at",
            params![
                tx.id,
                tx.account_id,
                tx.amount.to_string(),
                tx.description,
                tx.date.format("%Y-%m-%d").to_string(),
                tx.transaction_type.as_str(),
                tx.status.as_str(),
                format_timestamp(&tx.updated_at),
            ],
        )?;
        Ok(())
    }

    fn delete_account(&mut self, id: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM sys_accounts WHERE account_id = ?", params![id])?;
        Ok(())
    }

    fn delete_transaction(&mut self, id: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM sys_transactions WHERE transaction_id = ?",
            params![id],
        )?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for DuckDbStore {
    async fn all_accounts(&self) -> StoreResult<Vec<Account>> {
        self.run_blocking(|conn| query_accounts(conn)).await
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<Transaction>> {
        let (clause, values) = filter_clause(filter);
        self.run_blocking(move |conn| query_transactions(conn, &clause, values))
            .await
    }

    async fn with_transaction(&self, body: TransactionBody) -> StoreResult<()> {
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            {
                let inner: &Connection = &tx;
                let mut writer = DuckDbWriter { conn: inner };
                // An error here drops `tx`, which rolls everything back
                body(&mut writer)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
