//! SQLite-backed [`LedgerStore`].
//!
//! One connection behind a mutex. Every deliverable and variation write is a
//! compare-and-swap on the `version` column; a write that matches no row is
//! reported as a version conflict (or as missing when the row is gone).

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use ledger_engine::{
    Deliverable, DeliverableGate, DeliverableId, DeliverableScope, GateId, LedgerStore,
    ProgressEntry, Project, ProjectId, ReconciliationRecord, StoreError, StoreResult, Variation,
    VariationId, VariationState, VariationStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use crate::transactions::{execute_in_transaction, write_err};

/// Embedded schema SQL from LEDGER_SCHEMA.sql
const SCHEMA_SQL: &str = include_str!("../LEDGER_SCHEMA.sql");

const DATE_FORMAT: &str = "%Y-%m-%d";

const DELIVERABLE_COLUMNS: &str = r#"
    id, name, project_id, area, discipline, document_type, booking_code,
    budget_hours, variation_hours, approved_variation_hours,
    variation_status, variation_id, original_deliverable_id, gate_id,
    deleted, version
"#;

const VARIATION_COLUMNS: &str = r#"
    id, project_id, name, state, created_at, submitted_at, submitted_by,
    approved_at, approved_by, rejected_at, version
"#;

const PROGRESS_COLUMNS: &str = r#"
    deliverable_id, period, cumulative_percentage, percentage_earned,
    units_earned_this_period, gate_id, recorded_at
"#;

/// Stored text that does not decode to the expected domain value.
#[derive(Debug, thiserror::Error)]
#[error("unrecognised {kind} '{value}'")]
struct UnknownValue {
    kind: &'static str,
    value: String,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::backend_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            StoreError::backend_with_source(format!("failed to open db at {}", path.display()), e)
        })?;
        let store = Self::init(conn)?;
        tracing::debug!(path = %path.display(), "Ledger DB initialized");
        Ok(store)
    }

    /// Fresh in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::backend_with_source("failed to open in-memory db", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::backend_with_source("failed to set busy timeout", e))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::backend_with_source("failed to apply schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::backend("ledger db connection lock poisoned"))
    }

    fn transaction<T>(
        &self,
        operation: impl FnOnce(&Transaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn()?;
        execute_in_transaction(&mut conn, TransactionBehavior::Immediate, operation)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column codecs
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_err(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| Uuid::parse_str(&text).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| {
            DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_err(idx, e))
        })
        .transpose()
}

fn opt_time_text(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

fn deliverable_from_row(row: &Row<'_>) -> rusqlite::Result<Deliverable> {
    let status: String = row.get(10)?;
    let variation_status = VariationStatus::parse(&status).ok_or_else(|| {
        conversion_err(
            10,
            UnknownValue {
                kind: "variation status",
                value: status.clone(),
            },
        )
    })?;
    Ok(Deliverable {
        id: DeliverableId(uuid_col(row, 0)?),
        name: row.get(1)?,
        scope: DeliverableScope {
            project_id: ProjectId(uuid_col(row, 2)?),
            area: row.get(3)?,
            discipline: row.get(4)?,
            document_type: row.get(5)?,
            booking_code: row.get(6)?,
        },
        budget_hours: row.get(7)?,
        variation_hours: row.get(8)?,
        approved_variation_hours: row.get(9)?,
        variation_status,
        variation_id: opt_uuid_col(row, 11)?.map(VariationId),
        original_deliverable_id: opt_uuid_col(row, 12)?.map(DeliverableId),
        gate_id: opt_uuid_col(row, 13)?.map(GateId),
        deleted: row.get(14)?,
        version: row.get(15)?,
    })
}

fn variation_from_row(row: &Row<'_>) -> rusqlite::Result<Variation> {
    let state: String = row.get(3)?;
    let state = VariationState::parse(&state).ok_or_else(|| {
        conversion_err(
            3,
            UnknownValue {
                kind: "variation state",
                value: state.clone(),
            },
        )
    })?;
    Ok(Variation {
        id: VariationId(uuid_col(row, 0)?),
        project_id: ProjectId(uuid_col(row, 1)?),
        name: row.get(2)?,
        state,
        created_at: time_col(row, 4)?,
        submitted_at: opt_time_col(row, 5)?,
        submitted_by: row.get(6)?,
        approved_at: opt_time_col(row, 7)?,
        approved_by: row.get(8)?,
        rejected_at: opt_time_col(row, 9)?,
        version: row.get(10)?,
    })
}

fn progress_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressEntry> {
    Ok(ProgressEntry {
        deliverable_id: DeliverableId(uuid_col(row, 0)?),
        period: row.get(1)?,
        cumulative_percentage: row.get(2)?,
        percentage_earned: row.get(3)?,
        units_earned_this_period: row.get(4)?,
        gate_id: opt_uuid_col(row, 5)?.map(GateId),
        recorded_at: time_col(row, 6)?,
    })
}

fn check_invariants(deliverable: &Deliverable) -> StoreResult<()> {
    deliverable
        .check_invariants()
        .map_err(|e| StoreError::Invariant {
            message: e.to_string(),
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Versioned writes
// ─────────────────────────────────────────────────────────────────────────────

/// Turn a compare-and-swap that matched no row into the right error.
fn lost_write(
    conn: &Connection,
    table: &'static str,
    entity: &'static str,
    id: &str,
    expected: u64,
) -> StoreError {
    let found: rusqlite::Result<Option<u64>> = conn
        .query_row(
            &format!("SELECT version FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get(0),
        )
        .optional();
    match found {
        Ok(Some(found)) => StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
            found,
        },
        Ok(None) => StoreError::Missing {
            entity,
            id: id.to_string(),
        },
        Err(e) => StoreError::backend_with_source("failed to read current version", e),
    }
}

fn update_deliverable_row(conn: &Connection, d: &Deliverable) -> StoreResult<Deliverable> {
    let id = d.id.to_string();
    let changed = conn
        .execute(
            r#"
            UPDATE deliverables SET
                name = ?2,
                project_id = ?3,
                area = ?4,
                discipline = ?5,
                document_type = ?6,
                booking_code = ?7,
                budget_hours = ?8,
                variation_hours = ?9,
                approved_variation_hours = ?10,
                variation_status = ?11,
                variation_id = ?12,
                original_deliverable_id = ?13,
                gate_id = ?14,
                deleted = ?15,
                version = version + 1
            WHERE id = ?1 AND version = ?16
            "#,
            params![
                id,
                d.name,
                d.scope.project_id.to_string(),
                d.scope.area,
                d.scope.discipline,
                d.scope.document_type,
                d.scope.booking_code,
                d.budget_hours,
                d.variation_hours,
                d.approved_variation_hours,
                d.variation_status.as_str(),
                d.variation_id.as_ref().map(ToString::to_string),
                d.original_deliverable_id.as_ref().map(ToString::to_string),
                d.gate_id.as_ref().map(ToString::to_string),
                d.deleted,
                d.version,
            ],
        )
        .map_err(write_err("deliverable", &id, "failed to update deliverable"))?;

    if changed == 0 {
        return Err(lost_write(conn, "deliverables", "deliverable", &id, d.version));
    }
    let mut saved = d.clone();
    saved.version += 1;
    Ok(saved)
}

fn upsert_progress_row(conn: &Connection, e: &ProgressEntry) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO progress_entries
            (deliverable_id, period, cumulative_percentage, percentage_earned,
             units_earned_this_period, gate_id, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(deliverable_id, period) DO UPDATE SET
            cumulative_percentage = ?3,
            percentage_earned = ?4,
            units_earned_this_period = ?5,
            gate_id = ?6,
            recorded_at = ?7
        "#,
        params![
            e.deliverable_id.to_string(),
            e.period,
            e.cumulative_percentage,
            e.percentage_earned,
            e.units_earned_this_period,
            e.gate_id.as_ref().map(ToString::to_string),
            e.recorded_at.to_rfc3339(),
        ],
    )
    .map_err(write_err(
        "progress entry",
        format!("{}#{}", e.deliverable_id, e.period),
        "failed to upsert progress entry",
    ))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// LedgerStore
// ─────────────────────────────────────────────────────────────────────────────

impl LedgerStore for SqliteStore {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, progress_start FROM projects WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let start = row
                    .get::<_, Option<String>>(2)?
                    .map(|s| {
                        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_err(2, e))
                    })
                    .transpose()?;
                Ok(Project {
                    id: ProjectId(uuid_col(row, 0)?),
                    name: row.get(1)?,
                    progress_start: start,
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get project", e))
    }

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT id, name, max_percentage, auto_percentage
            FROM deliverable_gates
            WHERE id = ?1
            "#,
            params![id.to_string()],
            |row| {
                Ok(DeliverableGate {
                    id: GateId(uuid_col(row, 0)?),
                    name: row.get(1)?,
                    max_percentage: row.get(2)?,
                    auto_percentage: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get gate", e))
    }

    fn deliverable(&self, id: DeliverableId) -> StoreResult<Option<Deliverable>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {DELIVERABLE_COLUMNS} FROM deliverables WHERE id = ?1"),
            params![id.to_string()],
            deliverable_from_row,
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get deliverable", e))
    }

    fn variation(&self, id: VariationId) -> StoreResult<Option<Variation>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {VARIATION_COLUMNS} FROM variations WHERE id = ?1"),
            params![id.to_string()],
            variation_from_row,
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get variation", e))
    }

    fn variation_copy(
        &self,
        original: DeliverableId,
        variation: VariationId,
    ) -> StoreResult<Option<Deliverable>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                r#"
                SELECT {DELIVERABLE_COLUMNS} FROM deliverables
                WHERE original_deliverable_id = ?1 AND variation_id = ?2 AND deleted = 0
                "#
            ),
            params![original.to_string(), variation.to_string()],
            deliverable_from_row,
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get variation copy", e))
    }

    fn variation_deliverables(&self, variation: VariationId) -> StoreResult<Vec<Deliverable>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {DELIVERABLE_COLUMNS} FROM deliverables
                WHERE variation_id = ?1 AND deleted = 0
                ORDER BY id
                "#
            ))
            .map_err(|e| StoreError::backend_with_source("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![variation.to_string()], deliverable_from_row)
            .map_err(|e| StoreError::backend_with_source("failed to list deliverables", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::backend_with_source("failed to read deliverable row", e))
    }

    fn copies_of(&self, original: DeliverableId) -> StoreResult<Vec<Deliverable>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {DELIVERABLE_COLUMNS} FROM deliverables
                WHERE original_deliverable_id = ?1 AND deleted = 0
                ORDER BY id
                "#
            ))
            .map_err(|e| StoreError::backend_with_source("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![original.to_string()], deliverable_from_row)
            .map_err(|e| StoreError::backend_with_source("failed to list copies", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::backend_with_source("failed to read deliverable row", e))
    }

    fn progress_entries(&self, deliverable: DeliverableId) -> StoreResult<Vec<ProgressEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {PROGRESS_COLUMNS} FROM progress_entries
                WHERE deliverable_id = ?1
                ORDER BY period
                "#
            ))
            .map_err(|e| StoreError::backend_with_source("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![deliverable.to_string()], progress_from_row)
            .map_err(|e| StoreError::backend_with_source("failed to list progress", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::backend_with_source("failed to read progress row", e))
    }

    fn reconciliation_record(
        &self,
        copy: DeliverableId,
    ) -> StoreResult<Option<ReconciliationRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT copy_id, variation_id, original_deliverable_id, delta, applied_at
            FROM reconciliation_log
            WHERE copy_id = ?1
            "#,
            params![copy.to_string()],
            |row| {
                Ok(ReconciliationRecord {
                    copy_id: DeliverableId(uuid_col(row, 0)?),
                    variation_id: VariationId(uuid_col(row, 1)?),
                    original_deliverable_id: DeliverableId(uuid_col(row, 2)?),
                    delta: row.get(3)?,
                    applied_at: time_col(row, 4)?,
                })
            },
        )
        .optional()
        .map_err(|e| StoreError::backend_with_source("failed to get reconciliation record", e))
    }

    fn insert_project(&self, project: &Project) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO projects (id, name, progress_start) VALUES (?1, ?2, ?3)",
            params![
                project.id.to_string(),
                project.name,
                project
                    .progress_start
                    .map(|d| d.format(DATE_FORMAT).to_string()),
            ],
        )
        .map_err(write_err("project", project.id, "failed to insert project"))?;
        Ok(())
    }

    fn insert_gate(&self, gate: &DeliverableGate) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO deliverable_gates (id, name, max_percentage, auto_percentage)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                gate.id.to_string(),
                gate.name,
                gate.max_percentage,
                gate.auto_percentage
            ],
        )
        .map_err(write_err("gate", gate.id, "failed to insert gate"))?;
        Ok(())
    }

    fn insert_deliverable(&self, d: &Deliverable) -> StoreResult<Deliverable> {
        check_invariants(d)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO deliverables ({DELIVERABLE_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0)
                "#
            ),
            params![
                d.id.to_string(),
                d.name,
                d.scope.project_id.to_string(),
                d.scope.area,
                d.scope.discipline,
                d.scope.document_type,
                d.scope.booking_code,
                d.budget_hours,
                d.variation_hours,
                d.approved_variation_hours,
                d.variation_status.as_str(),
                d.variation_id.as_ref().map(ToString::to_string),
                d.original_deliverable_id.as_ref().map(ToString::to_string),
                d.gate_id.as_ref().map(ToString::to_string),
                d.deleted,
            ],
        )
        .map_err(write_err("deliverable", d.id, "failed to insert deliverable"))?;

        tracing::debug!(
            deliverable_id = %d.id,
            status = d.variation_status.as_str(),
            "Inserted deliverable"
        );
        let mut saved = d.clone();
        saved.version = 0;
        Ok(saved)
    }

    fn update_deliverable(&self, d: &Deliverable) -> StoreResult<Deliverable> {
        check_invariants(d)?;
        let conn = self.conn()?;
        update_deliverable_row(&conn, d)
    }

    fn insert_variation(&self, v: &Variation) -> StoreResult<Variation> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO variations ({VARIATION_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
                "#
            ),
            params![
                v.id.to_string(),
                v.project_id.to_string(),
                v.name,
                v.state.as_str(),
                v.created_at.to_rfc3339(),
                opt_time_text(v.submitted_at),
                v.submitted_by,
                opt_time_text(v.approved_at),
                v.approved_by,
                opt_time_text(v.rejected_at),
            ],
        )
        .map_err(write_err("variation", v.id, "failed to insert variation"))?;
        let mut saved = v.clone();
        saved.version = 0;
        Ok(saved)
    }

    fn update_variation(&self, v: &Variation) -> StoreResult<Variation> {
        let conn = self.conn()?;
        let id = v.id.to_string();
        let changed = conn
            .execute(
                r#"
                UPDATE variations SET
                    name = ?2,
                    state = ?3,
                    submitted_at = ?4,
                    submitted_by = ?5,
                    approved_at = ?6,
                    approved_by = ?7,
                    rejected_at = ?8,
                    version = version + 1
                WHERE id = ?1 AND version = ?9
                "#,
                params![
                    id,
                    v.name,
                    v.state.as_str(),
                    opt_time_text(v.submitted_at),
                    v.submitted_by,
                    opt_time_text(v.approved_at),
                    v.approved_by,
                    opt_time_text(v.rejected_at),
                    v.version,
                ],
            )
            .map_err(write_err("variation", &id, "failed to update variation"))?;
        if changed == 0 {
            return Err(lost_write(&conn, "variations", "variation", &id, v.version));
        }
        let mut saved = v.clone();
        saved.version += 1;
        Ok(saved)
    }

    fn commit_progress(
        &self,
        deliverable: &Deliverable,
        entries: &[ProgressEntry],
    ) -> StoreResult<Deliverable> {
        check_invariants(deliverable)?;
        if let Some(stray) = entries.iter().find(|e| e.deliverable_id != deliverable.id) {
            return Err(StoreError::Invariant {
                message: format!(
                    "progress entry for {} committed with deliverable {}",
                    stray.deliverable_id, deliverable.id
                ),
            });
        }
        let saved = self.transaction(|tx| {
            let saved = update_deliverable_row(tx, deliverable)?;
            for entry in entries {
                upsert_progress_row(tx, entry)?;
            }
            Ok(saved)
        })?;
        tracing::debug!(
            deliverable_id = %deliverable.id,
            entries = entries.len(),
            version = saved.version,
            "Committed progress"
        );
        Ok(saved)
    }

    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable> {
        check_invariants(original)?;
        self.transaction(|tx| {
            tx.execute(
                r#"
                INSERT INTO reconciliation_log
                    (copy_id, variation_id, original_deliverable_id, delta, applied_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.copy_id.to_string(),
                    record.variation_id.to_string(),
                    record.original_deliverable_id.to_string(),
                    record.delta,
                    record.applied_at.to_rfc3339(),
                ],
            )
            .map_err(write_err(
                "reconciliation",
                record.copy_id,
                "failed to record reconciliation",
            ))?;
            update_deliverable_row(tx, original)
        })
    }
}
