//! Shared fixtures: a fault-injecting store and a seeded engine.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::NaiveDate;
use ledger_engine::{
    Deliverable, DeliverableGate, DeliverableId, DeliverableScope, EngineConfig, FixedClock,
    GateId, LedgerEngine, LedgerStore, MemoryStore, NewDeliverable, ProgressEntry, Project,
    ProjectId, ReconciliationRecord, StoreError, StoreResult, Variation, VariationId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fault-injecting store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory store that can simulate a concurrent writer or a failing
/// backend on demand.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    /// Number of upcoming progress commits that lose their optimistic lock
    stolen_progress_commits: AtomicU32,
    /// Originals whose reconciliation write fails
    broken_originals: Mutex<HashSet<DeliverableId>>,
}

impl FaultyStore {
    pub fn steal_progress_commits(&self, n: u32) {
        self.stolen_progress_commits.store(n, Ordering::SeqCst);
    }

    pub fn break_reconciliation(&self, original: DeliverableId) {
        self.broken_originals.lock().unwrap().insert(original);
    }

    pub fn heal_reconciliation(&self) {
        self.broken_originals.lock().unwrap().clear();
    }

    /// Bump the stored version behind the caller's back.
    fn concurrent_write(&self, id: DeliverableId) -> StoreResult<()> {
        if let Some(current) = self.inner.deliverable(id)? {
            self.inner.update_deliverable(&current)?;
        }
        Ok(())
    }
}

impl LedgerStore for FaultyStore {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        self.inner.project(id)
    }

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>> {
        self.inner.gate(id)
    }

    fn deliverable(&self, id: DeliverableId) -> StoreResult<Option<Deliverable>> {
        self.inner.deliverable(id)
    }

    fn variation(&self, id: VariationId) -> StoreResult<Option<Variation>> {
        self.inner.variation(id)
    }

    fn variation_copy(
        &self,
        original: DeliverableId,
        variation: VariationId,
    ) -> StoreResult<Option<Deliverable>> {
        self.inner.variation_copy(original, variation)
    }

    fn variation_deliverables(&self, variation: VariationId) -> StoreResult<Vec<Deliverable>> {
        self.inner.variation_deliverables(variation)
    }

    fn copies_of(&self, original: DeliverableId) -> StoreResult<Vec<Deliverable>> {
        self.inner.copies_of(original)
    }

    fn progress_entries(&self, deliverable: DeliverableId) -> StoreResult<Vec<ProgressEntry>> {
        self.inner.progress_entries(deliverable)
    }

    fn reconciliation_record(
        &self,
        copy: DeliverableId,
    ) -> StoreResult<Option<ReconciliationRecord>> {
        self.inner.reconciliation_record(copy)
    }

    fn insert_project(&self, project: &Project) -> StoreResult<()> {
        self.inner.insert_project(project)
    }

    fn insert_gate(&self, gate: &DeliverableGate) -> StoreResult<()> {
        self.inner.insert_gate(gate)
    }

    fn insert_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        self.inner.insert_deliverable(deliverable)
    }

    fn update_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        self.inner.update_deliverable(deliverable)
    }

    fn insert_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        self.inner.insert_variation(variation)
    }

    fn update_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        self.inner.update_variation(variation)
    }

    fn commit_progress(
        &self,
        deliverable: &Deliverable,
        entries: &[ProgressEntry],
    ) -> StoreResult<Deliverable> {
        let stolen = self
            .stolen_progress_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stolen {
            self.concurrent_write(deliverable.id)?;
        }
        self.inner.commit_progress(deliverable, entries)
    }

    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable> {
        if self.broken_originals.lock().unwrap().contains(&original.id) {
            return Err(StoreError::backend("injected reconciliation failure"));
        }
        self.inner.apply_reconciliation(original, record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seeded engine
// ─────────────────────────────────────────────────────────────────────────────

pub type Engine = LedgerEngine<FaultyStore, FixedClock>;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Fixture {
    pub engine: Engine,
    pub project: Project,
    /// max 1.0, no auto percentage
    pub open_gate: DeliverableGate,
    /// max 0.5, no auto percentage
    pub half_gate: DeliverableGate,
}

impl Fixture {
    /// Project started 2024-01-01, clock on 2024-03-15 (period 3).
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let engine = LedgerEngine::with_clock(
            FaultyStore::default(),
            FixedClock::on(date(2024, 3, 15)),
            config,
        )
        .unwrap();
        let project = engine
            .create_project("North Plant Upgrade", Some(date(2024, 1, 1)))
            .unwrap();
        let open_gate = engine.create_gate("Issued for Construction", 1.0, None).unwrap();
        let half_gate = engine.create_gate("Issued for Review", 0.5, None).unwrap();
        Self {
            engine,
            project,
            open_gate,
            half_gate,
        }
    }

    pub fn store(&self) -> &FaultyStore {
        self.engine.store()
    }

    pub fn spec(&self, name: &str, budget_hours: f64, gate: &DeliverableGate) -> NewDeliverable {
        NewDeliverable {
            name: name.to_string(),
            scope: DeliverableScope {
                project_id: self.project.id,
                area: "Area 200".to_string(),
                discipline: "Piping".to_string(),
                document_type: "ISO".to_string(),
                booking_code: "PP-200".to_string(),
            },
            budget_hours,
            gate_id: Some(gate.id),
        }
    }

    pub fn deliverable(&self, budget_hours: f64) -> Deliverable {
        self.engine
            .create_deliverable(self.spec("Isometric", budget_hours, &self.open_gate))
            .unwrap()
    }

    pub fn draft_variation(&self, name: &str) -> Variation {
        self.engine.create_variation(self.project.id, name).unwrap().value
    }

    pub fn submit(&self, variation: &Variation) -> Variation {
        self.engine
            .submit_variation(variation.id, "estimator")
            .unwrap()
            .value
    }

    pub fn reload(&self, id: DeliverableId) -> Deliverable {
        self.engine.store().deliverable(id).unwrap().unwrap()
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
