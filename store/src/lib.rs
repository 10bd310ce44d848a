//! SQLite persistence for the deliverable ledger.
//!
//! - [`SqliteStore`]: the `LedgerStore` over a single SQLite database
//! - [`CachedStore`]: read-through gate cache wrapping any store
//! - [`transactions`]: commit-or-rollback helper used for multi-row writes

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cache;
pub mod sqlite;
pub mod transactions;

pub use cache::{CacheStats, CachedStore};
pub use sqlite::SqliteStore;
