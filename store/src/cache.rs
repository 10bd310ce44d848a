//! Read-through gate cache.
//!
//! Gates are master data: created once, read on every progress write. The
//! cache wraps any [`LedgerStore`] and answers `gate` lookups from memory
//! after the first hit; everything else passes straight through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use ledger_engine::{
    Deliverable, DeliverableGate, DeliverableId, GateId, LedgerStore, ProgressEntry, Project,
    ProjectId, ReconciliationRecord, StoreResult, Variation, VariationId,
};

/// Gate cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct CachedStore<S> {
    inner: S,
    enabled: bool,
    gates: RwLock<HashMap<GateId, DeliverableGate>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: LedgerStore> CachedStore<S> {
    pub fn new(inner: S, enabled: bool) -> Self {
        Self {
            inner,
            enabled,
            gates: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.enabled,
            entries: self
                .gates
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn remember(&self, gate: &DeliverableGate) {
        self.gates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(gate.id, gate.clone());
    }
}

impl<S: LedgerStore> LedgerStore for CachedStore<S> {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        self.inner.project(id)
    }

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>> {
        if !self.enabled {
            return self.inner.gate(id);
        }
        let cached = self
            .gates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(gate) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(gate));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.inner.gate(id)?;
        if let Some(gate) = &loaded {
            self.remember(gate);
            tracing::trace!(gate_id = %id, "Gate cached");
        }
        Ok(loaded)
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
        self.inner.insert_gate(gate)?;
        if self.enabled {
            self.remember(gate);
        }
        Ok(())
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
        self.inner.commit_progress(deliverable, entries)
    }

    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable> {
        self.inner.apply_reconciliation(original, record)
    }
}
