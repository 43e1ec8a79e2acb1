//! Error types for the sync engine
//!
//! Every error is `Clone` so that one cycle's outcome can be handed to all
//! coalesced callers.

use thiserror::Error;

/// Failure reported by the remote data gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Whether the coordinator should retry the fetch after a backoff.
    ///
    /// Connectivity loss, 5xx responses and rate limiting are transient.
    /// Authentication failures, malformed payloads and the remaining 4xx
    /// codes will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::NetworkUnreachable(_) => true,
            GatewayError::ServerError(code) => *code >= 500 || *code == 429,
            GatewayError::Unauthorized | GatewayError::MalformedResponse(_) => false,
        }
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

/// Failure reported by a local store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Failure of a whole sync cycle, as seen by callers of `start_sync`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Fetch failed after {attempts} attempt(s): {error}")]
    Gateway { error: GatewayError, attempts: u32 },

    #[error("Could not read local snapshot: {0}")]
    Snapshot(StoreError),

    #[error("Commit failed, no changes applied: {0}")]
    Commit(StoreError),

    #[error("Sync cycle aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// True when the failure came from an authentication problem and the
    /// UI should ask the user to sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SyncError::Gateway {
                error: GatewayError::Unauthorized,
                ..
            }
        )
    }
}

/// Store result type
pub type StoreResult<T> = std::result::Result<T, StoreError>;
