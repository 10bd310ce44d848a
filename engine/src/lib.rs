//! Deliverable progress and variation accounting engine.
//!
//! Tracks how each deliverable's percentage complete evolves period over
//! period under gate ceilings, and how contract variations create, approve,
//! reject or cancel copies of deliverables while keeping the originals'
//! hour totals reconciled.
//!
//! The engine is stateless. All records live behind a [`LedgerStore`];
//! wall-clock time comes from an injected [`Clock`]. Every mutating
//! operation returns the committed value together with the
//! [`DomainEvent`]s it produced.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod clock;
pub mod config;
mod context;
pub mod errors;
pub mod events;
pub mod gates;
pub mod memory;
pub mod model;
pub mod period;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod variation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use errors::{ErrorCategory, LedgerError, Result, StoreError, StoreResult};
pub use events::{Applied, DomainEvent};
pub use gates::{GateChange, GateResolution, PercentageSource, resolve_gate_change};
pub use memory::MemoryStore;
pub use model::{
    Deliverable, DeliverableGate, DeliverableId, DeliverableScope, GateId, NewDeliverable,
    ProgressEntry, Project, ProjectId, ReconciliationRecord, Variation, VariationId,
    VariationState, VariationStatus,
};
pub use progress::{ProgressLedger, ProgressPlan};
pub use reconcile::{cancellation_remaining, reconcile_original};
pub use store::LedgerStore;
pub use variation::{ApprovalFailure, ApprovalOutcome};

use chrono::NaiveDate;

use crate::context::Ctx;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Operation surface over a store and a clock.
pub struct LedgerEngine<S, C = SystemClock> {
    store: S,
    clock: C,
    config: EngineConfig,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Engine reading the system clock
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: LedgerStore, C: Clock> LedgerEngine<S, C> {
    /// Engine with an explicit clock (tests, replays)
    pub fn with_clock(store: S, clock: C, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn ctx(&self) -> Ctx<'_, S, C> {
        Ctx {
            store: &self.store,
            clock: &self.clock,
            config: &self.config,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Master data
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        name: &str,
        progress_start: Option<NaiveDate>,
    ) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("project name must not be empty"));
        }
        let project = Project {
            id: ProjectId::new(),
            name: name.to_string(),
            progress_start,
        };
        self.store.insert_project(&project)?;
        tracing::info!(project_id = %project.id, name, "Project created");
        Ok(project)
    }

    pub fn create_gate(
        &self,
        name: &str,
        max_percentage: f64,
        auto_percentage: Option<f64>,
    ) -> Result<DeliverableGate> {
        let gate = DeliverableGate::new(name.trim(), max_percentage, auto_percentage)?;
        self.store.insert_gate(&gate)?;
        tracing::info!(
            gate_id = %gate.id,
            name = %gate.name,
            max_percentage,
            ?auto_percentage,
            "Gate created"
        );
        Ok(gate)
    }

    /// Create a baseline (`Standard`) deliverable.
    pub fn create_deliverable(&self, spec: NewDeliverable) -> Result<Deliverable> {
        let ctx = self.ctx();
        ctx.project(spec.scope.project_id)?;
        if let Some(gate_id) = spec.gate_id {
            ctx.gate(gate_id)?;
        }
        let deliverable = Deliverable::standard(spec);
        deliverable.check_invariants()?;
        let saved = self.store.insert_deliverable(&deliverable)?;
        tracing::info!(
            deliverable_id = %saved.id,
            project_id = %saved.scope.project_id,
            budget_hours = saved.budget_hours,
            "Deliverable created"
        );
        Ok(saved)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Live deliverable by id
    pub fn deliverable(&self, id: DeliverableId) -> Result<Deliverable> {
        self.ctx().deliverable(id)
    }

    pub fn variation(&self, id: VariationId) -> Result<Variation> {
        self.ctx().variation(id)
    }

    pub fn gate(&self, id: GateId) -> Result<DeliverableGate> {
        self.ctx().gate(id)
    }

    /// Live deliverables scoped to a variation
    pub fn variation_deliverables(&self, id: VariationId) -> Result<Vec<Deliverable>> {
        self.ctx().variation(id)?;
        Ok(self.store.variation_deliverables(id)?)
    }

    /// Hours earned by a deliverable across all recorded periods
    pub fn earned_hours(&self, id: DeliverableId) -> Result<f64> {
        let ctx = self.ctx();
        ctx.deliverable(id)?;
        reconcile::earned_hours(&ctx, id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Progress
    // ─────────────────────────────────────────────────────────────────────────

    /// Reporting period for a project as of the clock's today
    pub fn current_period(&self, project_id: ProjectId) -> Result<u32> {
        let project = self.ctx().project(project_id)?;
        let start = project.progress_start.ok_or_else(|| {
            LedgerError::domain(format!("project {project_id} has no progress start date"))
        })?;
        period::current_period(start, self.clock.today())
    }

    /// Set a deliverable's cumulative percentage for `period`. Without an
    /// explicit gate, the deliverable's current gate applies.
    pub fn record_progress(
        &self,
        deliverable_id: DeliverableId,
        period: u32,
        cumulative_percentage: f64,
        gate_id: Option<GateId>,
    ) -> Result<Applied<ProgressEntry>> {
        progress::record_progress(
            &self.ctx(),
            deliverable_id,
            period,
            cumulative_percentage,
            gate_id,
        )
    }

    pub fn progress_history(&self, deliverable_id: DeliverableId) -> Result<Vec<ProgressEntry>> {
        progress::progress_history(&self.ctx(), deliverable_id)
    }

    pub fn change_gate(
        &self,
        deliverable_id: DeliverableId,
        gate_id: GateId,
        user_entered_percentage: Option<f64>,
    ) -> Result<Applied<GateChange>> {
        gates::change_gate(&self.ctx(), deliverable_id, gate_id, user_entered_percentage)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Variations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_variation(&self, project_id: ProjectId, name: &str) -> Result<Applied<Variation>> {
        variation::create_variation(&self.ctx(), project_id, name)
    }

    pub fn submit_variation(
        &self,
        variation_id: VariationId,
        submitted_by: &str,
    ) -> Result<Applied<Variation>> {
        variation::submit_variation(&self.ctx(), variation_id, submitted_by)
    }

    /// Fails with a conflict if the pair already has a live copy.
    pub fn create_variation_copy(
        &self,
        original_id: DeliverableId,
        variation_id: VariationId,
        variation_hours: f64,
    ) -> Result<Applied<Deliverable>> {
        variation::create_variation_copy(&self.ctx(), original_id, variation_id, variation_hours)
    }

    pub fn upsert_variation_copy(
        &self,
        original_id: DeliverableId,
        variation_id: VariationId,
        variation_hours: f64,
        is_cancellation: bool,
    ) -> Result<Applied<Deliverable>> {
        variation::upsert_variation_copy(
            &self.ctx(),
            original_id,
            variation_id,
            variation_hours,
            is_cancellation,
        )
    }

    pub fn mark_for_cancellation(
        &self,
        original_id: DeliverableId,
        variation_id: VariationId,
    ) -> Result<Applied<Deliverable>> {
        variation::mark_for_cancellation(&self.ctx(), original_id, variation_id)
    }

    pub fn create_new_variation_deliverable(
        &self,
        variation_id: VariationId,
        spec: NewDeliverable,
        variation_hours: f64,
    ) -> Result<Applied<Deliverable>> {
        variation::create_new_variation_deliverable(&self.ctx(), variation_id, spec, variation_hours)
    }

    pub fn remove_variation_deliverable(
        &self,
        deliverable_id: DeliverableId,
    ) -> Result<Applied<Deliverable>> {
        variation::remove_variation_deliverable(&self.ctx(), deliverable_id)
    }

    /// Approve a submitted variation, or resume an approval that left copies
    /// unreconciled. Per-copy failures are reported in the outcome.
    pub fn approve_variation(
        &self,
        variation_id: VariationId,
        approved_by: &str,
    ) -> Result<Applied<ApprovalOutcome>> {
        variation::approve_variation(&self.ctx(), variation_id, approved_by)
    }

    /// Discard unapproved copies and reject the variation.
    pub fn reject_variation(&self, variation_id: VariationId) -> Result<Applied<usize>> {
        variation::reject_variation(&self.ctx(), variation_id)
    }
}
