//! Unix-socket IPC server.
//!
//! Newline-delimited JSON-RPC-lite. Every connection gets its own task;
//! engine calls hop onto the blocking pool since the store is synchronous.

use std::path::Path;
use std::sync::Arc;

use ledger_engine::{Clock, LedgerError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use uuid::Uuid;

use crate::protocol::*;
use crate::{PROTOCOL_VERSION, SERVICE_VERSION, ServiceEngine, ServiceState};

type RpcResult = Result<serde_json::Value, (i64, String)>;

/// Methods advertised in the `hello` reply.
const CAPABILITIES: &[&str] = &[
    "project.create",
    "gate.create",
    "deliverable.create",
    "deliverable.get",
    "period.current",
    "progress.record",
    "progress.history",
    "gate.change",
    "variation.create",
    "variation.submit",
    "variation.copy.upsert",
    "variation.deliverable.create",
    "variation.deliverable.remove",
    "variation.deliverables",
    "variation.approve",
    "variation.reject",
    "service.status",
];

/// Bind the socket at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "Ledger service listening");
    Ok(listener)
}

/// Accept connections until `shutdown` flips to `true`.
pub async fn serve<C: Clock + 'static>(
    state: Arc<ServiceState<C>>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    let conn_id = Uuid::new_v4();
                    tracing::debug!(%conn_id, "Client connected");
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            tracing::warn!(%conn_id, "Connection error: {e}");
                        }
                        tracing::debug!(%conn_id, "Client disconnected");
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection<C: Clock + 'static>(
    state: Arc<ServiceState<C>>,
    stream: UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(&state, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single request line.
pub async fn dispatch_message<C: Clock + 'static>(
    state: &Arc<ServiceState<C>>,
    raw: &str,
) -> serde_json::Value {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return error_reply(RequestId::Integer(0), ERR_PARSE, format!("Parse error: {e}")),
    };
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            return error_reply(
                RequestId::Integer(0),
                ERR_INVALID_REQUEST,
                format!("Invalid request: {e}"),
            );
        }
    };

    let id = request.id.clone();
    match dispatch_method(state, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(RpcResponse { id, result }).unwrap_or_default(),
        Err((code, message)) => error_reply(id, code, message),
    }
}

fn error_reply(id: RequestId, code: i64, message: String) -> serde_json::Value {
    serde_json::to_value(RpcError {
        id,
        error: RpcErrorBody {
            code,
            message,
            data: None,
        },
    })
    .unwrap_or_default()
}

async fn dispatch_method<C: Clock + 'static>(
    state: &Arc<ServiceState<C>>,
    method: &str,
    params: Option<serde_json::Value>,
) -> RpcResult {
    match method {
        "hello" => handle_hello(params),
        "service.status" => handle_service_status(state),

        "project.create" => {
            let p: ProjectCreateParams = parse_params(method, params)?;
            run(state, move |engine| engine.create_project(&p.name, p.progress_start)).await
        }
        "gate.create" => {
            let p: GateCreateParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.create_gate(&p.name, p.max_percentage, p.auto_percentage)
            })
            .await
        }
        "deliverable.create" => {
            let p: DeliverableCreateParams = parse_params(method, params)?;
            run(state, move |engine| engine.create_deliverable(p).map(DeliverableView::from)).await
        }
        "deliverable.get" => {
            let p: DeliverableGetParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.deliverable(p.deliverable_id).map(DeliverableView::from)
            })
            .await
        }

        "period.current" => {
            let p: PeriodCurrentParams = parse_params(method, params)?;
            run(state, move |engine| {
                let period = engine.current_period(p.project_id)?;
                Ok(PeriodCurrentResult {
                    project_id: p.project_id,
                    period,
                })
            })
            .await
        }
        "progress.record" => {
            let p: ProgressRecordParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.record_progress(
                    p.deliverable_id,
                    p.period,
                    p.cumulative_percentage,
                    p.gate_id,
                )
            })
            .await
        }
        "progress.history" => {
            let p: ProgressHistoryParams = parse_params(method, params)?;
            run(state, move |engine| {
                let entries = engine.progress_history(p.deliverable_id)?;
                let earned_hours = engine.earned_hours(p.deliverable_id)?;
                Ok(ProgressHistoryResult {
                    deliverable_id: p.deliverable_id,
                    entries,
                    earned_hours,
                })
            })
            .await
        }
        "gate.change" => {
            let p: GateChangeParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.change_gate(p.deliverable_id, p.gate_id, p.user_entered_percentage)
            })
            .await
        }

        "variation.create" => {
            let p: VariationCreateParams = parse_params(method, params)?;
            run(state, move |engine| engine.create_variation(p.project_id, &p.name)).await
        }
        "variation.submit" => {
            let p: VariationSubmitParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.submit_variation(p.variation_id, &p.submitted_by)
            })
            .await
        }
        "variation.copy.upsert" => {
            let p: VariationCopyUpsertParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.upsert_variation_copy(
                    p.original_deliverable_id,
                    p.variation_id,
                    p.variation_hours,
                    p.is_cancellation,
                )
            })
            .await
        }
        "variation.deliverable.create" => {
            let p: VariationDeliverableCreateParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.create_new_variation_deliverable(
                    p.variation_id,
                    p.deliverable,
                    p.variation_hours,
                )
            })
            .await
        }
        "variation.deliverable.remove" => {
            let p: VariationDeliverableRemoveParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.remove_variation_deliverable(p.deliverable_id)
            })
            .await
        }
        "variation.deliverables" => {
            let p: VariationDeliverablesParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.variation_deliverables(p.variation_id).map(|rows| {
                    rows.into_iter()
                        .map(DeliverableView::from)
                        .collect::<Vec<_>>()
                })
            })
            .await
        }
        "variation.approve" => {
            let p: VariationApproveParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.approve_variation(p.variation_id, &p.approved_by)
            })
            .await
        }
        "variation.reject" => {
            let p: VariationRejectParams = parse_params(method, params)?;
            run(state, move |engine| {
                engine.reject_variation(p.variation_id).map(|applied| {
                    applied.map(|discarded| VariationRejectResult {
                        variation_id: p.variation_id,
                        discarded,
                    })
                })
            })
            .await
        }

        _ => Err((ERR_METHOD_NOT_FOUND, format!("Unknown method: {method}"))),
    }
}

fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String)> {
    params
        .ok_or_else(|| (ERR_INVALID_PARAMS, "Missing params".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| (ERR_INVALID_PARAMS, format!("Invalid {method} params: {e}")))
        })
}

fn to_result<T: Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| (ERR_STORE, format!("Serialize error: {e}")))
}

/// Run an engine call on the blocking pool and serialize its result.
async fn run<C, T, F>(state: &Arc<ServiceState<C>>, call: F) -> RpcResult
where
    C: Clock + 'static,
    T: Serialize + Send + 'static,
    F: FnOnce(&ServiceEngine<C>) -> ledger_engine::Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    let outcome = tokio::task::spawn_blocking(move || call(&state.engine))
        .await
        .map_err(|e| (ERR_STORE, format!("Engine task failed: {e}")))?;

    match outcome {
        Ok(value) => to_result(&value),
        Err(err) => Err(ledger_error_to_rpc(&err)),
    }
}

/// Map an engine error onto its wire code.
fn ledger_error_to_rpc(err: &LedgerError) -> (i64, String) {
    let category = err.category();
    if category.caller_recoverable() {
        tracing::debug!(category = %category, "Request rejected: {err}");
    } else {
        tracing::warn!(category = %category, "Request failed: {err}");
    }
    (error_code(category), err.to_string())
}

/// Handle the `hello` handshake.
fn handle_hello(params: Option<serde_json::Value>) -> RpcResult {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err((
            ERR_INVALID_PARAMS,
            format!(
                "Incompatible protocol version: client={}, service={}",
                hello.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }

    tracing::debug!(client_version = %hello.client_version, "Handshake accepted");
    to_result(&HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: SERVICE_VERSION.to_string(),
        capabilities: CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
    })
}

fn handle_service_status<C: Clock>(state: &Arc<ServiceState<C>>) -> RpcResult {
    to_result(&ServiceStatusResult {
        service_version: SERVICE_VERSION.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        uptime_secs: state.uptime_secs(),
        gate_cache: state.engine.store().stats().into(),
    })
}
