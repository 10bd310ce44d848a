//! `ledger-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load config, open the database, accept
//!   connections until Ctrl+C.
//! - **`--ping`**: connect to the configured socket, send a hello handshake,
//!   verify the reply, then exit.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use ledger_engine::LedgerEngine;
use ledger_service::config::ServiceConfig;
use ledger_service::{PROTOCOL_VERSION, SERVICE_VERSION, ServiceState};
use ledger_store::{CachedStore, SqliteStore};

fn ping(socket: &Path) -> std::io::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(socket).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", socket.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = serde_json::json!({
        "id": 0,
        "method": "hello",
        "params": { "protocol_version": PROTOCOL_VERSION, "client_version": "ping" },
    });
    stream.write_all(hello.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ServiceConfig::load().map_err(std::io::Error::other)?;

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&config.resolved_socket_path());
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: ServiceConfig) -> std::io::Result<()> {
    tracing::info!("ledger-service v{SERVICE_VERSION} starting");

    let db_path = config.resolved_db_path();
    let store = SqliteStore::open(&db_path)
        .map_err(|e| std::io::Error::other(format!("Failed to open ledger database: {e}")))?;
    tracing::info!(path = %db_path.display(), "Ledger database open");

    let store = CachedStore::new(store, config.cache.gate_cache_enabled);
    let engine = LedgerEngine::new(store, config.engine.clone())
        .map_err(|e| std::io::Error::other(format!("Invalid engine config: {e}")))?;
    let state = Arc::new(ServiceState::new(engine));

    let socket_path = config.resolved_socket_path();
    let listener = ledger_service::ipc::bind(&socket_path)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    ledger_service::ipc::serve(state, listener, shutdown_rx).await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!(path = %socket_path.display(), "Socket cleanup skipped: {e}");
    }
    tracing::info!("ledger-service exiting cleanly");
    Ok(())
}
