//! Ledger service: the accounting engine behind a Unix socket.
//!
//! Clients speak newline-delimited JSON-RPC-lite (see [`protocol`]). Each
//! connection is handled on its own task; engine calls run on the blocking
//! pool because the SQLite store is synchronous.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod ipc;
pub mod protocol;

use std::path::PathBuf;
use std::time::Instant;

use ledger_engine::{Clock, LedgerEngine, SystemClock};
use ledger_store::{CachedStore, SqliteStore};

/// Protocol version advertised in the `hello` handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Service binary version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Socket file name inside the runtime directory
pub const SOCKET_FILENAME: &str = "ledger.sock";

/// Engine wired to the production store stack.
pub type ServiceEngine<C = SystemClock> = LedgerEngine<CachedStore<SqliteStore>, C>;

/// Shared state handed to every connection.
pub struct ServiceState<C = SystemClock> {
    pub engine: ServiceEngine<C>,
    started_at: Instant,
}

impl<C: Clock> ServiceState<C> {
    pub fn new(engine: ServiceEngine<C>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Default socket path: `$XDG_RUNTIME_DIR/ledger.sock`, or
/// `<tmp>/ledger/ledger.sock` when the runtime dir is unset.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(SOCKET_FILENAME),
        _ => std::env::temp_dir().join("ledger").join(SOCKET_FILENAME),
    }
}
