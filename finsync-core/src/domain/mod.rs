//! Core domain entities
//!
//! All synchronized entities are defined here. These are pure data
//! structures with validation logic - no I/O or external dependencies.

mod account;
pub mod result;
mod snapshot;
mod transaction;

pub use account::{Account, AccountType};
pub use snapshot::{ChangeStats, Delta, Record, RecordDelta, Snapshot};
pub use transaction::{Transaction, TransactionFilter, TransactionStatus, TransactionType};
