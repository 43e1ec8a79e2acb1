//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - reqwest HTTP client for RemoteGateway
//! - DuckDB for LocalStore
//! - Ordered in-memory maps for LocalStore

pub mod duckdb;
pub mod http;
pub mod memory;

#[cfg(test)]
pub mod mock;
