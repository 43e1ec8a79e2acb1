//! Finsync Core - data synchronization engine for personal finance clients
//!
//! Keeps a local snapshot of accounts and transactions consistent with a
//! remote backend. The crate follows a hexagonal layout:
//!
//! - **domain**: Records, snapshots, deltas and error types
//! - **ports**: Traits for the remote gateway and the local store
//! - **services**: Reconciler, sync coordinator, scheduler, observation bus
//! - **adapters**: Concrete implementations (HTTP, DuckDB, in-memory)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::Stream;
use tokio::sync::broadcast;

use adapters::duckdb::DuckDbStore;
use adapters::http::HttpGateway;
use config::Config;
use services::{AutoSyncScheduler, ObservationBus, RetryPolicy, SyncCoordinator};

// Re-export commonly used types at crate root
pub use domain::result::{GatewayError, StoreError, SyncError};
pub use domain::{Account, AccountType, Snapshot, Transaction, TransactionFilter};
pub use ports::{LocalStore, RemoteGateway};
pub use services::{SyncEvent, SyncFuture, SyncReport, SyncResult, SyncState};

/// Database file inside the data directory
pub const DB_FILENAME: &str = "finsync.duckdb";

/// Main entry point for hosts
///
/// Owns the single sync coordinator of the process together with its
/// scheduler and observation bus.
pub struct SyncEngine {
    config: Config,
    coordinator: SyncCoordinator,
    scheduler: AutoSyncScheduler,
}

impl SyncEngine {
    /// Open the engine on a data directory
    ///
    /// Reads `settings.json`, opens (or creates) the DuckDB store and builds
    /// the HTTP gateway from the `sync` section. Auto-sync is not started
    /// until [`SyncEngine::start`] is called.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let config = Config::load(data_dir)?;

        let gateway = Arc::new(HttpGateway::from_settings(&config.sync)?);
        let db_path = data_dir.join(DB_FILENAME);
        let store = Arc::new(
            DuckDbStore::open(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?,
        );

        Ok(Self::with_components(config, gateway, store))
    }

    /// Build the engine from explicit components
    pub fn with_components(
        config: Config,
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        let bus = ObservationBus::new(config.sync.event_capacity);
        let policy = RetryPolicy::from_settings(&config.sync);
        let coordinator = SyncCoordinator::new(gateway, store, bus, policy);
        let scheduler = AutoSyncScheduler::new(coordinator.clone());

        Self {
            config,
            coordinator,
            scheduler,
        }
    }

    /// Start auto-sync if the configuration enables it
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if let Some(interval) = self.config.auto_sync_interval() {
            self.scheduler.start(interval);
        }
    }

    /// Run a sync cycle now, or join the one in flight
    pub fn trigger_manual_sync(&self) -> SyncFuture {
        self.coordinator.start_sync()
    }

    /// Stream of sync events for UI observers
    pub fn observe_synced_data(&self) -> Pin<Box<dyn Stream<Item = SyncEvent> + Send>> {
        self.coordinator.bus().stream()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.coordinator.bus().subscribe()
    }

    /// Start auto-sync with `interval`, or stop it with `None`
    ///
    /// Only affects the running engine; use [`Config::set_auto_sync`] and
    /// [`Config::save`] to make the choice persistent.
    pub fn configure_auto_sync(&self, interval: Option<Duration>) {
        match interval {
            Some(interval) => self.scheduler.start(interval),
            None => self.scheduler.stop(),
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn state(&self) -> SyncState {
        self.coordinator.state()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.coordinator.last_report()
    }

    /// Local store, for read queries from the UI
    pub fn store(&self) -> Arc<dyn LocalStore> {
        self.coordinator.store()
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rust_decimal::Decimal;

    use adapters::memory::MemoryStore;
    use adapters::mock::MockGateway;

    fn engine_with(accounts: Vec<Account>) -> SyncEngine {
        SyncEngine::with_components(
            Config::default(),
            Arc::new(MockGateway::new(accounts, vec![])),
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_manual_sync_reaches_observers() {
        let mut account = Account::new("acc-1", "Checking", AccountType::Checking);
        account.balance = Decimal::new(100000, 2);
        let engine = engine_with(vec![account]);
        let mut stream = engine.observe_synced_data();

        let result = engine.trigger_manual_sync().await.unwrap();
        assert_eq!(result.accounts.len(), 1);
        assert_eq!(engine.state(), SyncState::Idle);

        let mut saw_data = false;
        while let Some(event) = stream.next().await {
            match event {
                SyncEvent::DataChanged(changes) => {
                    assert_eq!(changes.account_ids(), vec!["acc-1"]);
                    saw_data = true;
                }
                SyncEvent::SyncCompleted(report) => {
                    assert_eq!(report.cycle_id, result.report.cycle_id);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_data);
        assert_eq!(engine.store().all_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_configure_auto_sync_toggles_scheduler() {
        let engine = engine_with(vec![]);
        assert!(!engine.is_auto_sync_running());

        engine.configure_auto_sync(Some(Duration::from_secs(3600)));
        assert!(engine.is_auto_sync_running());

        engine.configure_auto_sync(None);
        assert!(!engine.is_auto_sync_running());
    }

    #[tokio::test]
    async fn test_start_respects_config() {
        let mut config = Config::default();
        config.set_auto_sync(Some(Duration::from_secs(600)));
        let engine = SyncEngine::with_components(
            config,
            Arc::new(MockGateway::new(vec![], vec![])),
            Arc::new(MemoryStore::new()),
        );

        engine.start();
        assert!(engine.is_auto_sync_running());
    }
}
