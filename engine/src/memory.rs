//! In-process [`LedgerStore`] backed by hash maps.
//!
//! Same contract as the SQLite store (version checks, copy-pair uniqueness,
//! atomic multi-record commits). Used by tests and embedders that keep the
//! ledger in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::errors::{StoreError, StoreResult};
use crate::model::{
    Deliverable, DeliverableGate, DeliverableId, GateId, ProgressEntry, Project, ProjectId,
    ReconciliationRecord, Variation, VariationId,
};
use crate::store::LedgerStore;

#[derive(Debug, Default)]
struct MemoryState {
    projects: HashMap<ProjectId, Project>,
    gates: HashMap<GateId, DeliverableGate>,
    deliverables: HashMap<DeliverableId, Deliverable>,
    variations: HashMap<VariationId, Variation>,
    progress: HashMap<DeliverableId, BTreeMap<u32, ProgressEntry>>,
    reconciliations: HashMap<DeliverableId, ReconciliationRecord>,
}

impl MemoryState {
    fn check_deliverable_version(&self, deliverable: &Deliverable) -> StoreResult<()> {
        let stored = self
            .deliverables
            .get(&deliverable.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "deliverable",
                id: deliverable.id.to_string(),
            })?;
        if stored.version != deliverable.version {
            return Err(StoreError::VersionConflict {
                entity: "deliverable",
                id: deliverable.id.to_string(),
                expected: deliverable.version,
                found: stored.version,
            });
        }
        Ok(())
    }

    fn copy_pair_taken(&self, candidate: &Deliverable) -> bool {
        let Some(original) = candidate.original_deliverable_id else {
            return false;
        };
        !candidate.deleted
            && self.deliverables.values().any(|d| {
                d.id != candidate.id
                    && !d.deleted
                    && d.original_deliverable_id == Some(original)
                    && d.variation_id == candidate.variation_id
            })
    }

    fn write_deliverable(&mut self, deliverable: &Deliverable) -> Deliverable {
        let mut next = deliverable.clone();
        next.version += 1;
        self.deliverables.insert(next.id, next.clone());
        next
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::backend("memory store lock poisoned"))
    }
}

fn check_invariants(deliverable: &Deliverable) -> StoreResult<()> {
    deliverable
        .check_invariants()
        .map_err(|e| StoreError::Invariant {
            message: e.to_string(),
        })
}

impl LedgerStore for MemoryStore {
    fn project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.state()?.projects.get(&id).cloned())
    }

    fn gate(&self, id: GateId) -> StoreResult<Option<DeliverableGate>> {
        Ok(self.state()?.gates.get(&id).cloned())
    }

    fn deliverable(&self, id: DeliverableId) -> StoreResult<Option<Deliverable>> {
        Ok(self.state()?.deliverables.get(&id).cloned())
    }

    fn variation(&self, id: VariationId) -> StoreResult<Option<Variation>> {
        Ok(self.state()?.variations.get(&id).cloned())
    }

    fn variation_copy(
        &self,
        original: DeliverableId,
        variation: VariationId,
    ) -> StoreResult<Option<Deliverable>> {
        Ok(self
            .state()?
            .deliverables
            .values()
            .find(|d| {
                !d.deleted
                    && d.original_deliverable_id == Some(original)
                    && d.variation_id == Some(variation)
            })
            .cloned())
    }

    fn variation_deliverables(&self, variation: VariationId) -> StoreResult<Vec<Deliverable>> {
        let state = self.state()?;
        let mut found: Vec<Deliverable> = state
            .deliverables
            .values()
            .filter(|d| !d.deleted && d.variation_id == Some(variation))
            .cloned()
            .collect();
        found.sort_by_key(|d| d.id);
        Ok(found)
    }

    fn copies_of(&self, original: DeliverableId) -> StoreResult<Vec<Deliverable>> {
        let state = self.state()?;
        let mut found: Vec<Deliverable> = state
            .deliverables
            .values()
            .filter(|d| !d.deleted && d.original_deliverable_id == Some(original))
            .cloned()
            .collect();
        found.sort_by_key(|d| d.id);
        Ok(found)
    }

    fn progress_entries(&self, deliverable: DeliverableId) -> StoreResult<Vec<ProgressEntry>> {
        Ok(self
            .state()?
            .progress
            .get(&deliverable)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    fn reconciliation_record(
        &self,
        copy: DeliverableId,
    ) -> StoreResult<Option<ReconciliationRecord>> {
        Ok(self.state()?.reconciliations.get(&copy).cloned())
    }

    fn insert_project(&self, project: &Project) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.projects.contains_key(&project.id) {
            return Err(StoreError::Duplicate {
                entity: "project",
                id: project.id.to_string(),
            });
        }
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn insert_gate(&self, gate: &DeliverableGate) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.gates.contains_key(&gate.id) {
            return Err(StoreError::Duplicate {
                entity: "gate",
                id: gate.id.to_string(),
            });
        }
        state.gates.insert(gate.id, gate.clone());
        Ok(())
    }

    fn insert_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        check_invariants(deliverable)?;
        let mut state = self.state()?;
        if state.deliverables.contains_key(&deliverable.id) || state.copy_pair_taken(deliverable)
        {
            return Err(StoreError::Duplicate {
                entity: "deliverable",
                id: deliverable.id.to_string(),
            });
        }
        let mut row = deliverable.clone();
        row.version = 0;
        state.deliverables.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_deliverable(&self, deliverable: &Deliverable) -> StoreResult<Deliverable> {
        check_invariants(deliverable)?;
        let mut state = self.state()?;
        state.check_deliverable_version(deliverable)?;
        if state.copy_pair_taken(deliverable) {
            return Err(StoreError::Duplicate {
                entity: "deliverable",
                id: deliverable.id.to_string(),
            });
        }
        Ok(state.write_deliverable(deliverable))
    }

    fn insert_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        let mut state = self.state()?;
        if state.variations.contains_key(&variation.id) {
            return Err(StoreError::Duplicate {
                entity: "variation",
                id: variation.id.to_string(),
            });
        }
        let mut row = variation.clone();
        row.version = 0;
        state.variations.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_variation(&self, variation: &Variation) -> StoreResult<Variation> {
        let mut state = self.state()?;
        let stored = state
            .variations
            .get(&variation.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "variation",
                id: variation.id.to_string(),
            })?;
        if stored.version != variation.version {
            return Err(StoreError::VersionConflict {
                entity: "variation",
                id: variation.id.to_string(),
                expected: variation.version,
                found: stored.version,
            });
        }
        let mut next = variation.clone();
        next.version += 1;
        state.variations.insert(next.id, next.clone());
        Ok(next)
    }

    fn commit_progress(
        &self,
        deliverable: &Deliverable,
        entries: &[ProgressEntry],
    ) -> StoreResult<Deliverable> {
        check_invariants(deliverable)?;
        let mut state = self.state()?;
        state.check_deliverable_version(deliverable)?;
        if let Some(stray) = entries.iter().find(|e| e.deliverable_id != deliverable.id) {
            return Err(StoreError::Invariant {
                message: format!(
                    "progress entry for {} committed with deliverable {}",
                    stray.deliverable_id, deliverable.id
                ),
            });
        }
        let ledger = state.progress.entry(deliverable.id).or_default();
        for entry in entries {
            ledger.insert(entry.period, entry.clone());
        }
        Ok(state.write_deliverable(deliverable))
    }

    fn apply_reconciliation(
        &self,
        original: &Deliverable,
        record: &ReconciliationRecord,
    ) -> StoreResult<Deliverable> {
        check_invariants(original)?;
        let mut state = self.state()?;
        if state.reconciliations.contains_key(&record.copy_id) {
            return Err(StoreError::Duplicate {
                entity: "reconciliation",
                id: record.copy_id.to_string(),
            });
        }
        state.check_deliverable_version(original)?;
        state.reconciliations.insert(record.copy_id, record.clone());
        Ok(state.write_deliverable(original))
    }
}
