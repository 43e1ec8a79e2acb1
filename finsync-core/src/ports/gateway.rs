//! Remote data gateway port
//!
//! Defines the interface for fetching account and transaction snapshots
//! from the backend. Implementations must be safe to call concurrently and
//! must not retry; retries belong to the sync coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::result::GatewayError;
use crate::domain::{Account, Transaction};

/// Backend snapshot source
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch every account visible to the authenticated user
    async fn fetch_accounts(&self) -> Result<Vec<Account>, GatewayError>;

    /// Fetch transactions, optionally only those modified at or after `since`
    async fn fetch_transactions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, GatewayError>;
}
