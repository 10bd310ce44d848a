//! Persistence seam.
//!
//! The engine holds no state of its own; every read and write goes through a
//! [`LedgerStore`]. Implementations must provide:
//! - optimistic locking: `update_*`, `commit_progress` and
//!   `apply_reconciliation` fail with [`StoreError::VersionConflict`] when the
//!   stored version differs from the version on the record passed in, and
//!   return the record with its version bumped on success
//! - uniqueness of non-deleted copies per `(original_deliverable_id, variation_id)`
//! - atomicity of `commit_progress` (deliverable + entries) and of
//!   `apply_reconciliation` (original + audit record)
//!
//! Reads of deliverables return soft-deleted rows too; list reads do not.

use crate::errors::StoreResult;
use crate::model::{
    Deliverable, DeliverableGate, DeliverableId, GateId, ProgressEntry, Project, ProjectId,
    ReconciliationRecord, Variation, VariationId,
};

pub trait LedgerStore: Send + Sync {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>>;

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>>;

    fn deliverable(&self, id: DeliverableId) -> StoreResult<Option<Deliverable>>;

    fn variation(&self, id: VariationId) -> StoreResult<Option<Variation>>;

    /// The non-deleted copy of `original` scoped to `variation`, if any
    fn variation_copy(
        &self,
        original: DeliverableId,
        variation: VariationId,
    ) -> StoreResult<Option<Deliverable>>;

    /// Non-deleted deliverables scoped to `variation`
    fn variation_deliverables(&self, variation: VariationId) -> StoreResult<Vec<Deliverable>>;

    /// Non-deleted copies of `original` across all variations
    fn copies_of(&self, original: DeliverableId) -> StoreResult<Vec<Deliverable>>;

    /// Progress entries ordered by period
    fn progress_entries(&self, deliverable: DeliverableId) -> StoreResult<Vec<ProgressEntry>>;

    fn reconciliation_record(&self, copy: DeliverableId)
    -> StoreResult<Option<ReconciliationRecord>>;

    fn insert_project(&self, project: &Project) -> StoreResult<()>;

    fn insert_gate(&self, gate: &DeliverableGate) -> StoreResult<()>;

    /// Insert with version 0. Fails `Duplicate` on an id clash or on a
    /// second non-deleted copy for the same `(original, variation)` pair.
    fn insert_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable>;

    fn update_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable>;

    fn insert_variation(&self, variation: &Variation) -> StoreResult<Variation>;

    fn update_variation(&self, variation: &Variation) -> StoreResult<Variation>;

    /// Version-checked write of `deliverable` together with an upsert of
    /// `entries` keyed by `(deliverable_id, period)`.
    fn commit_progress(
        &self,
        deliverable: &Deliverable,
        entries: &[ProgressEntry],
    ) -> StoreResult<Deliverable>;

    /// Version-checked write of `original` together with the audit record.
    /// Fails `Duplicate` when a record for the same copy already exists.
    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<S> {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        (**self).project(id)
    }

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>> {
        (**self).gate(id)
    }

    fn deliverable(&self, id: DeliverableId) -> StoreResult<Option<Deliverable>> {
        (**self).deliverable(id)
    }

    fn variation(&self, id: VariationId) -> StoreResult<Option<Variation>> {
        (**self).variation(id)
    }

    fn variation_copy(
        &self,
        original: DeliverableId,
        variation: VariationId,
    ) -> StoreResult<Option<Deliverable>> {
        (**self).variation_copy(original, variation)
    }

    fn variation_deliverables(&self, variation: VariationId) -> StoreResult<Vec<Deliverable>> {
        (**self).variation_deliverables(variation)
    }

    fn copies_of(&self, original: DeliverableId) -> StoreResult<Vec<Deliverable>> {
        (**self).copies_of(original)
    }

    fn progress_entries(&self, deliverable: DeliverableId) -> StoreResult<Vec<ProgressEntry>> {
        (**self).progress_entries(deliverable)
    }

    fn reconciliation_record(
        &self,
        copy: DeliverableId,
    ) -> StoreResult<Option<ReconciliationRecord>> {
        (**self).reconciliation_record(copy)
    }

    fn insert_project(&self, project: &Project) -> StoreResult<()> {
        (**self).insert_project(project)
    }

    fn insert_gate(&self, gate: &DeliverableGate) -> StoreResult<()> {
        (**self).insert_gate(gate)
    }

    fn insert_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        (**self).insert_deliverable(deliverable)
    }

    fn update_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        (**self).update_deliverable(deliverable)
    }

    fn insert_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        (**self).insert_variation(variation)
    }

    fn update_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        (**self).update_variation(variation)
    }

    fn commit_progress(
        &self,
        deliverable: &Deliverable,
        entries: &[ProgressEntry],
    ) -> StoreResult<Deliverable> {
        (**self).commit_progress(deliverable, entries)
    }

    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable> {
        (**self).apply_reconciliation(original, record)
    }
}
