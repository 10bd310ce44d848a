//! Variation lifecycle.
//!
//! Per deliverable within a variation:
//!
//! ```text
//! Standard ──copy──▶ UnapprovedVariation ──approve──▶ ApprovedVariation
//!          └cancel─▶ UnapprovedCancellation ─approve─▶ ApprovedCancellation
//!                    (either Unapproved* ──reject──▶ discarded)
//! ```
//!
//! Copies are only created or edited while their variation is `Draft` or
//! `Submitted`. Approval flips the variation to `ClientApproved` first, then
//! settles each copy on its own: a failure on one copy is reported and does
//! not stop the others. Calling approve again on a `ClientApproved` variation
//! finishes whatever an earlier pass left behind.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::context::Ctx;
use crate::errors::{ErrorCategory, LedgerError, Result, StoreError};
use crate::events::{Applied, DomainEvent};
use crate::model::{
    Deliverable, DeliverableId, NewDeliverable, ProjectId, Variation, VariationId,
    VariationState, VariationStatus,
};
use crate::reconcile::{self, Reconciled, cancellation_remaining, earned_hours};
use crate::store::LedgerStore;

/// One copy that could not be settled during approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFailure {
    pub variation_id: VariationId,
    pub deliverable_id: DeliverableId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_deliverable_id: Option<DeliverableId>,
    pub category: ErrorCategory,
    pub message: String,
}

/// What an approval pass changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub variation: Variation,
    /// Copies moved to an approved status by this pass
    pub approved: Vec<Deliverable>,
    /// Originals whose variation hours were adjusted by this pass
    pub reconciled: Vec<Deliverable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ApprovalFailure>,
}

impl ApprovalOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Variation records
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn create_variation<S, C>(
    ctx: &Ctx<'_, S, C>,
    project_id: ProjectId,
    name: &str,
) -> Result<Applied<Variation>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("variation name must not be empty"));
    }
    let project = ctx.project(project_id)?;
    let variation = ctx
        .store
        .insert_variation(&Variation::draft(project.id, name, ctx.clock.now()))?;

    tracing::info!(
        variation_id = %variation.id,
        project_id = %project.id,
        name,
        "Variation created"
    );
    let event = DomainEvent::VariationCreated {
        variation_id: variation.id,
        project_id: project.id,
    };
    Ok(Applied::new(variation, vec![event]))
}

pub(crate) fn submit_variation<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
    submitted_by: &str,
) -> Result<Applied<Variation>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let submitted_by = submitted_by.trim();
    if submitted_by.is_empty() {
        return Err(LedgerError::validation("submitter must not be empty"));
    }
    ctx.with_commit_retry("submit_variation", &variation_id, || {
        let variation = ctx.variation(variation_id)?;
        if variation.state != VariationState::Draft {
            return Err(LedgerError::state(format!(
                "variation {variation_id} is {} and cannot be submitted",
                variation.state.as_str()
            )));
        }
        let mut next = variation;
        next.state = VariationState::Submitted;
        next.submitted_at = Some(ctx.clock.now());
        next.submitted_by = Some(submitted_by.to_string());
        let saved = ctx.store.update_variation(&next)?;

        tracing::info!(variation_id = %saved.id, submitted_by, "Variation submitted");
        let event = DomainEvent::VariationSubmitted {
            variation_id: saved.id,
            submitted_by: submitted_by.to_string(),
        };
        Ok(Applied::new(saved, vec![event]))
    })
}

/// Variation that still accepts copy edits for `project_id`.
fn open_variation<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
    project_id: ProjectId,
) -> Result<Variation>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let variation = ctx.variation(variation_id)?;
    if !variation.state.is_open() {
        return Err(LedgerError::state(format!(
            "variation {variation_id} is {} and no longer accepts changes",
            variation.state.as_str()
        )));
    }
    if variation.project_id != project_id {
        return Err(LedgerError::validation(format!(
            "variation {variation_id} belongs to project {}, not {project_id}",
            variation.project_id
        )));
    }
    Ok(variation)
}

/// Live deliverable that may be the source of a copy: a `Standard` one, or a
/// variation-only deliverable whose variation has been approved.
fn copy_source<S, C>(ctx: &Ctx<'_, S, C>, original_id: DeliverableId) -> Result<Deliverable>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let original = ctx.deliverable(original_id)?;
    let copyable = match original.variation_status {
        VariationStatus::Standard => true,
        VariationStatus::ApprovedVariation => original.original_deliverable_id.is_none(),
        _ => false,
    };
    if !copyable {
        return Err(LedgerError::validation(format!(
            "deliverable {original_id} is {} and cannot be copied into a variation",
            original.variation_status.as_str()
        )));
    }
    Ok(original)
}

fn check_hours(variation_hours: f64) -> Result<()> {
    if !variation_hours.is_finite() {
        return Err(LedgerError::validation(format!(
            "variation hours {variation_hours} must be finite"
        )));
    }
    Ok(())
}

fn new_copy(
    original: &Deliverable,
    variation_id: VariationId,
    status: VariationStatus,
    variation_hours: f64,
) -> Deliverable {
    Deliverable {
        id: DeliverableId::new(),
        name: original.name.clone(),
        scope: original.scope.clone(),
        budget_hours: original.budget_hours,
        variation_hours,
        approved_variation_hours: 0.0,
        variation_status: status,
        variation_id: Some(variation_id),
        original_deliverable_id: Some(original.id),
        gate_id: original.gate_id,
        deleted: false,
        version: 0,
    }
}

fn insert_copy<S>(store: &S, copy: &Deliverable) -> Result<Deliverable>
where
    S: LedgerStore + ?Sized,
{
    store.insert_deliverable(copy).map_err(|err| match err {
        StoreError::Duplicate { .. } => LedgerError::conflict(format!(
            "a copy of {} already exists in variation {}",
            copy.original_deliverable_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            copy.variation_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        )),
        other => other.into(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Copies and variation-only deliverables
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn create_variation_copy<S, C>(
    ctx: &Ctx<'_, S, C>,
    original_id: DeliverableId,
    variation_id: VariationId,
    variation_hours: f64,
) -> Result<Applied<Deliverable>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    check_hours(variation_hours)?;
    let original = copy_source(ctx, original_id)?;
    open_variation(ctx, variation_id, original.scope.project_id)?;

    if let Some(existing) = ctx.store.variation_copy(original_id, variation_id)? {
        return Err(LedgerError::conflict(format!(
            "deliverable {original_id} already has copy {} in variation {variation_id}; \
             update it instead",
            existing.id
        )));
    }

    let copy = insert_copy(
        ctx.store,
        &new_copy(
            &original,
            variation_id,
            VariationStatus::UnapprovedVariation,
            variation_hours,
        ),
    )?;

    tracing::info!(
        variation_id = %variation_id,
        deliverable_id = %copy.id,
        original_deliverable_id = %original_id,
        variation_hours,
        "Variation copy created"
    );
    let event = DomainEvent::VariationCopyCreated {
        variation_id,
        deliverable_id: copy.id,
        original_deliverable_id: original_id,
        variation_hours,
    };
    Ok(Applied::new(copy, vec![event]))
}

/// Create the copy, or update the existing one in place.
pub(crate) fn upsert_variation_copy<S, C>(
    ctx: &Ctx<'_, S, C>,
    original_id: DeliverableId,
    variation_id: VariationId,
    variation_hours: f64,
    is_cancellation: bool,
) -> Result<Applied<Deliverable>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    if is_cancellation {
        return mark_for_cancellation(ctx, original_id, variation_id);
    }
    check_hours(variation_hours)?;

    ctx.with_commit_retry("upsert_variation_copy", &original_id, || {
        let original = copy_source(ctx, original_id)?;
        open_variation(ctx, variation_id, original.scope.project_id)?;

        let Some(existing) = ctx.store.variation_copy(original_id, variation_id)? else {
            return create_variation_copy(ctx, original_id, variation_id, variation_hours);
        };
        if existing.variation_status.is_approved() {
            return Err(LedgerError::state(format!(
                "copy {} is already {}",
                existing.id,
                existing.variation_status.as_str()
            )));
        }

        let mut next = existing;
        next.variation_status = VariationStatus::UnapprovedVariation;
        next.variation_hours = variation_hours;
        next.approved_variation_hours = 0.0;
        let saved = ctx.store.update_deliverable(&next)?;

        tracing::info!(
            variation_id = %variation_id,
            deliverable_id = %saved.id,
            variation_hours,
            "Variation copy updated"
        );
        let event = DomainEvent::VariationCopyUpdated {
            variation_id,
            deliverable_id: saved.id,
            variation_status: saved.variation_status,
            variation_hours,
        };
        Ok(Applied::new(saved, vec![event]))
    })
}

pub(crate) fn mark_for_cancellation<S, C>(
    ctx: &Ctx<'_, S, C>,
    original_id: DeliverableId,
    variation_id: VariationId,
) -> Result<Applied<Deliverable>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    ctx.with_commit_retry("mark_for_cancellation", &original_id, || {
        let original = copy_source(ctx, original_id)?;
        open_variation(ctx, variation_id, original.scope.project_id)?;

        if let Some(done) = ctx
            .store
            .copies_of(original_id)?
            .into_iter()
            .find(|c| c.variation_status == VariationStatus::ApprovedCancellation)
        {
            return Err(LedgerError::validation(format!(
                "deliverable {original_id} was already cancelled by variation {}",
                done.variation_id.as_ref().map(ToString::to_string).unwrap_or_default()
            )));
        }

        let earned = earned_hours(ctx, original_id)?;
        if cancellation_remaining(original.budget_hours, earned) <= 0.0 {
            return Err(LedgerError::validation(format!(
                "deliverable {original_id} is fully earned ({earned} of {} hours); \
                 nothing left to cancel",
                original.budget_hours
            )));
        }

        let copy = match ctx.store.variation_copy(original_id, variation_id)? {
            Some(existing) if existing.variation_status.is_approved() => {
                return Err(LedgerError::state(format!(
                    "copy {} is already {}",
                    existing.id,
                    existing.variation_status.as_str()
                )));
            }
            Some(existing) => {
                let mut next = existing;
                next.variation_status = VariationStatus::UnapprovedCancellation;
                next.variation_hours = 0.0;
                next.approved_variation_hours = 0.0;
                ctx.store.update_deliverable(&next)?
            }
            None => insert_copy(
                ctx.store,
                &new_copy(
                    &original,
                    variation_id,
                    VariationStatus::UnapprovedCancellation,
                    0.0,
                ),
            )?,
        };

        tracing::info!(
            variation_id = %variation_id,
            deliverable_id = %copy.id,
            original_deliverable_id = %original_id,
            "Cancellation requested"
        );
        let event = DomainEvent::CancellationRequested {
            variation_id,
            deliverable_id: copy.id,
            original_deliverable_id: original_id,
        };
        Ok(Applied::new(copy, vec![event]))
    })
}

pub(crate) fn create_new_variation_deliverable<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
    spec: NewDeliverable,
    variation_hours: f64,
) -> Result<Applied<Deliverable>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    check_hours(variation_hours)?;
    open_variation(ctx, variation_id, spec.scope.project_id)?;
    if let Some(gate_id) = spec.gate_id {
        ctx.gate(gate_id)?;
    }

    let mut deliverable = Deliverable::standard(spec);
    deliverable.variation_status = VariationStatus::UnapprovedVariation;
    deliverable.variation_id = Some(variation_id);
    deliverable.variation_hours = variation_hours;
    deliverable.check_invariants()?;
    let saved = ctx.store.insert_deliverable(&deliverable)?;

    tracing::info!(
        variation_id = %variation_id,
        deliverable_id = %saved.id,
        variation_hours,
        "Variation-only deliverable created"
    );
    let event = DomainEvent::VariationDeliverableCreated {
        variation_id,
        deliverable_id: saved.id,
        variation_hours,
    };
    Ok(Applied::new(saved, vec![event]))
}

/// Soft-delete a never-approved variation-only deliverable.
pub(crate) fn remove_variation_deliverable<S, C>(
    ctx: &Ctx<'_, S, C>,
    deliverable_id: DeliverableId,
) -> Result<Applied<Deliverable>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    ctx.with_commit_retry("remove_variation_deliverable", &deliverable_id, || {
        let deliverable = ctx.deliverable(deliverable_id)?;
        let variation_id = match (deliverable.variation_status, deliverable.variation_id) {
            (VariationStatus::UnapprovedVariation, Some(v))
                if deliverable.original_deliverable_id.is_none() =>
            {
                v
            }
            _ => {
                return Err(LedgerError::state(format!(
                    "deliverable {deliverable_id} is not an unapproved variation-only deliverable"
                )));
            }
        };
        open_variation(ctx, variation_id, deliverable.scope.project_id)?;

        let mut next = deliverable;
        next.deleted = true;
        let saved = ctx.store.update_deliverable(&next)?;

        tracing::info!(
            variation_id = %variation_id,
            deliverable_id = %deliverable_id,
            "Variation-only deliverable removed"
        );
        let event = DomainEvent::VariationDeliverableRemoved {
            variation_id,
            deliverable_id,
        };
        Ok(Applied::new(saved, vec![event]))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Approval
// ─────────────────────────────────────────────────────────────────────────────

/// Move the variation to `ClientApproved`. Returns `true` when this call made
/// the transition, `false` for a resume pass.
fn mark_client_approved<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
    approved_by: &str,
) -> Result<(Variation, bool)>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    ctx.with_commit_retry("approve_variation", &variation_id, || {
        let variation = ctx.variation(variation_id)?;
        match variation.state {
            VariationState::Submitted => {
                let mut next = variation;
                next.state = VariationState::ClientApproved;
                next.approved_at = Some(ctx.clock.now());
                next.approved_by = Some(approved_by.to_string());
                Ok((ctx.store.update_variation(&next)?, true))
            }
            VariationState::ClientApproved => Ok((variation, false)),
            VariationState::Draft | VariationState::Rejected => Err(LedgerError::state(format!(
                "variation {variation_id} is {}; only submitted variations can be approved",
                variation.state.as_str()
            ))),
        }
    })
}

/// Settle one copy: flip it to its approved status (if not already) and
/// reconcile its original. Returns the freshly approved copy, if any, and the
/// reconciliation, if one was applied.
fn settle_copy<S, C>(
    ctx: &Ctx<'_, S, C>,
    copy_id: DeliverableId,
) -> Result<(Option<Deliverable>, Option<Reconciled>)>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let (copy, newly_approved) = ctx.with_commit_retry("approve_copy", &copy_id, || {
        let copy = ctx.deliverable(copy_id)?;
        let mut next = copy.clone();
        match copy.variation_status {
            VariationStatus::UnapprovedVariation => {
                next.variation_status = VariationStatus::ApprovedVariation;
                next.approved_variation_hours = next.variation_hours;
            }
            VariationStatus::UnapprovedCancellation => {
                let Some(original_id) = copy.original_deliverable_id else {
                    return Err(LedgerError::state(format!(
                        "cancellation {copy_id} has no original deliverable"
                    )));
                };
                let original = ctx.deliverable(original_id)?;
                let earned = earned_hours(ctx, original_id)?;
                let remaining = cancellation_remaining(original.budget_hours, earned);
                tracing::debug!(
                    deliverable_id = %copy_id,
                    original_deliverable_id = %original_id,
                    earned,
                    remaining,
                    "Cancellation sized at approval"
                );
                next.variation_status = VariationStatus::ApprovedCancellation;
                next.variation_hours = 0.0 - remaining;
                next.approved_variation_hours = 0.0 - remaining;
            }
            VariationStatus::ApprovedVariation | VariationStatus::ApprovedCancellation => {
                return Ok((copy, false));
            }
            VariationStatus::Standard => {
                return Err(LedgerError::state(format!(
                    "deliverable {copy_id} is standard and cannot be approved"
                )));
            }
        }
        Ok((ctx.store.update_deliverable(&next)?, true))
    })?;

    let reconciled = reconcile::apply(ctx, &copy, copy.approved_variation_hours)?;
    Ok((newly_approved.then_some(copy), reconciled))
}

pub(crate) fn approve_variation<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
    approved_by: &str,
) -> Result<Applied<ApprovalOutcome>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let approved_by = approved_by.trim();
    if approved_by.is_empty() {
        return Err(LedgerError::validation("approver must not be empty"));
    }

    let (variation, transitioned) = mark_client_approved(ctx, variation_id, approved_by)?;
    let mut events = Vec::new();
    if transitioned {
        tracing::info!(variation_id = %variation_id, approved_by, "Variation approved");
        events.push(DomainEvent::VariationApproved {
            variation_id,
            approved_by: approved_by.to_string(),
        });
    } else {
        tracing::info!(variation_id = %variation_id, "Resuming approval of variation");
    }

    let mut outcome = ApprovalOutcome {
        variation,
        approved: Vec::new(),
        reconciled: Vec::new(),
        failures: Vec::new(),
    };

    for copy in ctx.store.variation_deliverables(variation_id)? {
        match settle_copy(ctx, copy.id) {
            Ok((approved, reconciled)) => {
                if let Some(approved) = approved {
                    events.push(DomainEvent::DeliverableApproved {
                        variation_id,
                        deliverable_id: approved.id,
                        variation_status: approved.variation_status,
                        approved_variation_hours: approved.approved_variation_hours,
                    });
                    outcome.approved.push(approved);
                }
                if let Some(reconciled) = reconciled {
                    events.push(reconciled.event());
                    outcome.reconciled.push(reconciled.original);
                }
            }
            Err(err) => {
                if !matches!(err, LedgerError::Reconciliation { .. }) {
                    tracing::error!(
                        variation_id = %variation_id,
                        deliverable_id = %copy.id,
                        error = %err,
                        "Copy could not be approved"
                    );
                }
                outcome.failures.push(ApprovalFailure {
                    variation_id,
                    deliverable_id: copy.id,
                    original_deliverable_id: copy.original_deliverable_id,
                    category: err.category(),
                    message: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        variation_id = %variation_id,
        approved = outcome.approved.len(),
        reconciled = outcome.reconciled.len(),
        failed = outcome.failures.len(),
        "Approval pass finished"
    );
    Ok(Applied::new(outcome, events))
}

// ─────────────────────────────────────────────────────────────────────────────
// Rejection
// ─────────────────────────────────────────────────────────────────────────────

/// Discard every unapproved copy, then mark the variation rejected. Returns
/// the number of copies discarded by this call.
pub(crate) fn reject_variation<S, C>(
    ctx: &Ctx<'_, S, C>,
    variation_id: VariationId,
) -> Result<Applied<usize>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let variation = ctx.variation(variation_id)?;
    match variation.state {
        VariationState::Rejected => return Ok(Applied::new(0, Vec::new())),
        VariationState::Submitted => {}
        VariationState::Draft | VariationState::ClientApproved => {
            return Err(LedgerError::state(format!(
                "variation {variation_id} is {}; only submitted variations can be rejected",
                variation.state.as_str()
            )));
        }
    }

    let mut events = Vec::new();
    for copy in ctx.store.variation_deliverables(variation_id)? {
        if !copy.variation_status.is_unapproved() {
            continue;
        }
        let discarded = ctx.with_commit_retry("discard_copy", &copy.id, || {
            let current = ctx.deliverable(copy.id)?;
            if !current.variation_status.is_unapproved() {
                return Ok(false);
            }
            let mut next = current;
            next.deleted = true;
            ctx.store.update_deliverable(&next)?;
            Ok(true)
        });
        match discarded {
            Ok(true) => events.push(DomainEvent::CopyDiscarded {
                variation_id,
                deliverable_id: copy.id,
            }),
            Ok(false) => {}
            Err(LedgerError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    let discarded = events.len();

    ctx.with_commit_retry("reject_variation", &variation_id, || {
        let mut next = ctx.variation(variation_id)?;
        match next.state {
            VariationState::Rejected => return Ok(()),
            VariationState::Submitted => {}
            other => {
                return Err(LedgerError::state(format!(
                    "variation {variation_id} became {} while being rejected",
                    other.as_str()
                )));
            }
        }
        next.state = VariationState::Rejected;
        next.rejected_at = Some(ctx.clock.now());
        ctx.store.update_variation(&next)?;
        Ok(())
    })?;

    tracing::info!(variation_id = %variation_id, discarded, "Variation rejected");
    events.push(DomainEvent::VariationRejected {
        variation_id,
        discarded,
    });
    Ok(Applied::new(discarded, events))
}
