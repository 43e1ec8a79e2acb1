//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The sync engine
//! depends only on these traits, not on concrete implementations.

mod gateway;
mod store;

pub use gateway::RemoteGateway;
pub use store::{LocalStore, StoreWriter, TransactionBody};
