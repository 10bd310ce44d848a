//! Wire types for the ledger service protocol.
//!
//! JSON-RPC-lite: one JSON object per line, no `jsonrpc` version field.
//! Requests carry `id`, `method` and optional `params`; replies carry the
//! same `id` and either `result` or `error`.

use chrono::NaiveDate;
use ledger_engine::{
    Deliverable, DeliverableId, ErrorCategory, GateId, NewDeliverable, ProgressEntry, ProjectId,
    VariationId,
};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Ledger error codes, one per error category.
pub const ERR_VALIDATION: i64 = 10;
pub const ERR_STATE: i64 = 11;
pub const ERR_CONFLICT: i64 = 12;
pub const ERR_NOT_FOUND: i64 = 13;
pub const ERR_RECONCILIATION: i64 = 14;
pub const ERR_DOMAIN: i64 = 15;
pub const ERR_STORE: i64 = 300;

/// Wire code for an engine error category
pub fn error_code(category: ErrorCategory) -> i64 {
    match category {
        ErrorCategory::Validation => ERR_VALIDATION,
        ErrorCategory::State => ERR_STATE,
        ErrorCategory::Conflict => ERR_CONFLICT,
        ErrorCategory::NotFound => ERR_NOT_FOUND,
        ErrorCategory::Reconciliation => ERR_RECONCILIATION,
        ErrorCategory::Domain => ERR_DOMAIN,
        ErrorCategory::Store => ERR_STORE,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub id: RequestId,
    pub error: RpcErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Master data
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreateParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_start: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCreateParams {
    pub name: String,
    pub max_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_percentage: Option<f64>,
}

/// `deliverable.create` takes a [`NewDeliverable`] as its params.
pub type DeliverableCreateParams = NewDeliverable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableGetParams {
    pub deliverable_id: DeliverableId,
}

/// A deliverable with its derived totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableView {
    #[serde(flatten)]
    pub deliverable: Deliverable,
    pub total_hours: f64,
}

impl From<Deliverable> for DeliverableView {
    fn from(deliverable: Deliverable) -> Self {
        Self {
            total_hours: deliverable.total_hours(),
            deliverable,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// period.current / progress.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodCurrentParams {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodCurrentResult {
    pub project_id: ProjectId,
    pub period: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecordParams {
    pub deliverable_id: DeliverableId,
    pub period: u32,
    pub cumulative_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<GateId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressHistoryParams {
    pub deliverable_id: DeliverableId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressHistoryResult {
    pub deliverable_id: DeliverableId,
    pub entries: Vec<ProgressEntry>,
    pub earned_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateChangeParams {
    pub deliverable_id: DeliverableId,
    pub gate_id: GateId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_entered_percentage: Option<f64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// variation.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationCreateParams {
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationSubmitParams {
    pub variation_id: VariationId,
    pub submitted_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationCopyUpsertParams {
    pub original_deliverable_id: DeliverableId,
    pub variation_id: VariationId,
    #[serde(default)]
    pub variation_hours: f64,
    #[serde(default)]
    pub is_cancellation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationDeliverableCreateParams {
    pub variation_id: VariationId,
    pub deliverable: NewDeliverable,
    pub variation_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationDeliverableRemoveParams {
    pub deliverable_id: DeliverableId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationDeliverablesParams {
    pub variation_id: VariationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationApproveParams {
    pub variation_id: VariationId,
    pub approved_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationRejectParams {
    pub variation_id: VariationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationRejectResult {
    pub variation_id: VariationId,
    /// Copies soft-deleted by this call
    pub discarded: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub service_version: String,
    pub protocol_version: String,
    pub uptime_secs: u64,
    pub gate_cache: GateCacheStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateCacheStatus {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl From<ledger_store::CacheStats> for GateCacheStatus {
    fn from(stats: ledger_store::CacheStats) -> Self {
        Self {
            enabled: stats.enabled,
            entries: stats.entries,
            hits: stats.hits,
            misses: stats.misses,
        }
    }
}
