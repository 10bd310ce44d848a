//! Reconciliation of approved copies onto their originals.
//!
//! An approved copy's delta is added to the original's `variation_hours`
//! exactly once. The store writes the original together with a
//! [`ReconciliationRecord`] keyed by the copy id; an existing record means the
//! delta already landed and the step is skipped.

use crate::clock::Clock;
use crate::context::Ctx;
use crate::errors::{LedgerError, Result, StoreError};
use crate::events::DomainEvent;
use crate::model::{Deliverable, DeliverableId, ReconciliationRecord};
use crate::progress::ProgressLedger;
use crate::store::LedgerStore;

/// Hours credited to `deliverable` across all recorded periods.
pub(crate) fn earned_hours<S, C>(ctx: &Ctx<'_, S, C>, deliverable: DeliverableId) -> Result<f64>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    Ok(ProgressLedger::new(ctx.store.progress_entries(deliverable)?).earned_hours())
}

/// Budget left to cancel. Never negative: a fully (or over-) earned
/// deliverable cancels for exactly zero.
pub fn cancellation_remaining(budget_hours: f64, earned_hours: f64) -> f64 {
    (budget_hours - earned_hours).max(0.0)
}

/// The original with `delta` folded into its variation hours.
pub fn reconcile_original(original: &Deliverable, delta: f64) -> Deliverable {
    let mut next = original.clone();
    next.variation_hours += delta;
    next
}

/// Result of applying one copy's delta.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub original: Deliverable,
    pub record: ReconciliationRecord,
}

impl Reconciled {
    pub fn event(&self) -> DomainEvent {
        DomainEvent::ReconciliationApplied {
            variation_id: self.record.variation_id,
            copy_id: self.record.copy_id,
            original_deliverable_id: self.original.id,
            delta: self.record.delta,
            variation_hours_after: self.original.variation_hours,
        }
    }
}

/// Apply `delta` from `copy` onto its original at most once.
///
/// Returns `None` when the copy has no original or its delta was already
/// applied. Any failure is wrapped as [`LedgerError::Reconciliation`] and
/// logged with the identity needed to retry just this copy.
pub(crate) fn apply<S, C>(
    ctx: &Ctx<'_, S, C>,
    copy: &Deliverable,
    delta: f64,
) -> Result<Option<Reconciled>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let Some(original_id) = copy.original_deliverable_id else {
        return Ok(None);
    };
    let Some(variation_id) = copy.variation_id else {
        return Err(LedgerError::state(format!(
            "copy {} of {original_id} is not scoped to a variation",
            copy.id
        )));
    };

    let attempt = || -> Result<Option<Reconciled>> {
        if ctx.store.reconciliation_record(copy.id)?.is_some() {
            return Ok(None);
        }
        let original = ctx.deliverable(original_id)?;
        let record = ReconciliationRecord {
            copy_id: copy.id,
            variation_id,
            original_deliverable_id: original_id,
            delta,
            applied_at: ctx.clock.now(),
        };
        match ctx
            .store
            .apply_reconciliation(&reconcile_original(&original, delta), &record)
        {
            Ok(original) => Ok(Some(Reconciled { original, record })),
            // Another writer got there first.
            Err(StoreError::Duplicate { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    };

    match ctx.with_commit_retry("reconcile_original", &copy.id, attempt) {
        Ok(Some(done)) => {
            tracing::info!(
                variation_id = %variation_id,
                copy_id = %copy.id,
                original_deliverable_id = %original_id,
                delta,
                variation_hours_after = done.original.variation_hours,
                "Reconciliation applied"
            );
            Ok(Some(done))
        }
        Ok(None) => {
            tracing::debug!(
                variation_id = %variation_id,
                copy_id = %copy.id,
                "Reconciliation already recorded, skipping"
            );
            Ok(None)
        }
        Err(err) => {
            tracing::error!(
                variation_id = %variation_id,
                deliverable_id = %copy.id,
                original_deliverable_id = %original_id,
                delta,
                error = %err,
                category = err.category().as_str(),
                "Reconciliation failed; copy is approved but its original is not updated"
            );
            Err(LedgerError::reconciliation(variation_id, copy.id, err))
        }
    }
}
