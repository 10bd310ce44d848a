use ledger_engine::{
    DomainEvent, EngineConfig, ErrorCategory, LedgerError, LedgerStore, VariationState,
    VariationStatus,
};
use pretty_assertions::assert_eq;

use super::support::{Fixture, assert_close};

#[test]
fn approved_copy_adds_its_hours_to_the_original() {
    let fx = Fixture::new();
    let original = fx.deliverable(50.0);
    let variation = fx.draft_variation("VO-001 extra tie-ins");

    let copy = fx
        .engine
        .create_variation_copy(original.id, variation.id, 12.0)
        .unwrap()
        .value;
    assert_eq!(copy.variation_status, VariationStatus::UnapprovedVariation);
    assert_eq!(copy.original_deliverable_id, Some(original.id));
    assert_eq!(copy.budget_hours, 50.0);
    assert_eq!(copy.approved_variation_hours, 0.0);

    fx.submit(&variation);
    let applied = fx.engine.approve_variation(variation.id, "client.rep").unwrap();
    let outcome = applied.value;
    assert!(outcome.is_complete());
    assert_eq!(outcome.variation.state, VariationState::ClientApproved);
    assert_eq!(outcome.variation.approved_by.as_deref(), Some("client.rep"));
    assert_eq!(outcome.approved.len(), 1);
    assert_eq!(outcome.approved[0].variation_status, VariationStatus::ApprovedVariation);
    assert_eq!(outcome.approved[0].approved_variation_hours, 12.0);
    assert_eq!(outcome.reconciled.len(), 1);
    assert_eq!(outcome.reconciled[0].variation_hours, 12.0);

    let kinds: Vec<&str> = applied.events.iter().map(DomainEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["variation_approved", "deliverable_approved", "reconciliation_applied"]
    );

    let original = fx.engine.deliverable(original.id).unwrap();
    assert_eq!(original.variation_hours, 12.0);
    assert_eq!(original.total_hours(), 62.0);
    assert_eq!(original.approved_variation_hours, 0.0);
}

#[test]
fn cancellation_is_sized_from_earned_hours_at_approval() {
    let fx = Fixture::new();
    let original = fx.deliverable(50.0);
    fx.engine.record_progress(original.id, 1, 0.4, None).unwrap();
    assert_close(fx.engine.earned_hours(original.id).unwrap(), 20.0);

    let variation = fx.draft_variation("VO-002 descope");
    let copy = fx
        .engine
        .mark_for_cancellation(original.id, variation.id)
        .unwrap()
        .value;
    assert_eq!(copy.variation_status, VariationStatus::UnapprovedCancellation);
    assert_eq!(copy.variation_hours, 0.0);

    fx.submit(&variation);
    let outcome = fx.engine.approve_variation(variation.id, "client.rep").unwrap().value;

    let copy = fx.engine.deliverable(copy.id).unwrap();
    assert_eq!(copy.variation_status, VariationStatus::ApprovedCancellation);
    assert_close(copy.variation_hours, -30.0);
    assert_close(copy.approved_variation_hours, -30.0);
    assert_close(outcome.reconciled[0].variation_hours, -30.0);
    assert_close(fx.engine.deliverable(original.id).unwrap().total_hours(), 20.0);
}

#[test]
fn approving_twice_reconciles_once() {
    let fx = Fixture::new();
    let original = fx.deliverable(50.0);
    let variation = fx.draft_variation("VO-003");
    fx.engine
        .create_variation_copy(original.id, variation.id, 8.0)
        .unwrap();
    fx.submit(&variation);

    fx.engine.approve_variation(variation.id, "client.rep").unwrap();
    let second = fx.engine.approve_variation(variation.id, "client.rep").unwrap();
    assert!(second.value.approved.is_empty());
    assert!(second.value.reconciled.is_empty());
    assert!(second.events.is_empty());

    assert_eq!(fx.engine.deliverable(original.id).unwrap().variation_hours, 8.0);
}

#[test]
fn cancellation_never_adds_hours_back() {
    let fx = Fixture::new();
    let original = fx.deliverable(50.0);
    fx.engine.record_progress(original.id, 1, 0.4, None).unwrap();

    // Grow the original to 60 hours through an approved variation.
    let growth = fx.draft_variation("VO-004 growth");
    fx.engine
        .create_variation_copy(original.id, growth.id, 10.0)
        .unwrap();
    fx.submit(&growth);
    fx.engine.approve_variation(growth.id, "client.rep").unwrap();

    let cancel = fx.draft_variation("VO-005 cancel");
    fx.engine.mark_for_cancellation(original.id, cancel.id).unwrap();

    // Earned now exceeds the 50 hour budget: 20 + 0.6 * 60.
    fx.engine.record_progress(original.id, 2, 1.0, None).unwrap();
    assert_close(fx.engine.earned_hours(original.id).unwrap(), 56.0);

    fx.submit(&cancel);
    fx.engine.approve_variation(cancel.id, "client.rep").unwrap();

    let copies = fx.engine.variation_deliverables(cancel.id).unwrap();
    assert_eq!(copies[0].variation_status, VariationStatus::ApprovedCancellation);
    assert_eq!(copies[0].variation_hours, 0.0);
    assert_eq!(fx.engine.deliverable(original.id).unwrap().variation_hours, 10.0);
}

#[test]
fn fully_earned_deliverable_cannot_be_cancelled() {
    let fx = Fixture::new();
    let original = fx.deliverable(30.0);
    fx.engine.record_progress(original.id, 1, 1.0, None).unwrap();

    let variation = fx.draft_variation("VO-006");
    let err = fx
        .engine
        .mark_for_cancellation(original.id, variation.id)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[test]
fn small_unearned_remainder_can_still_be_cancelled() {
    // A loose percentage tolerance must not swallow a few minutes of budget.
    let fx = Fixture::with_config(EngineConfig {
        percentage_tolerance: 0.01,
        ..EngineConfig::default()
    });
    let original = fx.deliverable(8.0);
    fx.engine.record_progress(original.id, 1, 0.999, None).unwrap();

    let variation = fx.draft_variation("VO-022");
    let copy = fx
        .engine
        .mark_for_cancellation(original.id, variation.id)
        .unwrap()
        .value;
    assert_eq!(copy.variation_status, VariationStatus::UnapprovedCancellation);

    fx.submit(&variation);
    fx.engine.approve_variation(variation.id, "client.rep").unwrap();
    assert_close(fx.reload(original.id).variation_hours, -0.008);
}

#[test]
fn approved_variation_only_deliverable_can_be_cancelled_later() {
    let fx = Fixture::new();
    let first = fx.draft_variation("VO-019");
    let added = fx
        .engine
        .create_new_variation_deliverable(
            first.id,
            fx.spec("Flare knock-out drum", 24.0, &fx.open_gate),
            24.0,
        )
        .unwrap()
        .value;

    // Not copyable while its own variation is still pending.
    let pending = fx.draft_variation("VO-020");
    let err = fx
        .engine
        .mark_for_cancellation(added.id, pending.id)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    fx.submit(&first);
    fx.engine.approve_variation(first.id, "client.rep").unwrap();
    let added = fx.reload(added.id);
    assert_eq!(added.variation_status, VariationStatus::ApprovedVariation);

    let second = fx.draft_variation("VO-021");
    let cancellation = fx
        .engine
        .mark_for_cancellation(added.id, second.id)
        .unwrap()
        .value;
    assert_eq!(cancellation.original_deliverable_id, Some(added.id));
    assert_eq!(
        cancellation.variation_status,
        VariationStatus::UnapprovedCancellation
    );

    fx.submit(&second);
    let outcome = fx
        .engine
        .approve_variation(second.id, "client.rep")
        .unwrap()
        .value;
    assert!(outcome.is_complete());
    assert_close(outcome.approved[0].approved_variation_hours, -24.0);
    assert_close(fx.reload(added.id).variation_hours, 0.0);
}

#[test]
fn already_cancelled_deliverable_cannot_be_cancelled_again() {
    let fx = Fixture::new();
    let original = fx.deliverable(30.0);
    let first = fx.draft_variation("VO-007");
    fx.engine.mark_for_cancellation(original.id, first.id).unwrap();
    fx.submit(&first);
    fx.engine.approve_variation(first.id, "client.rep").unwrap();

    let second = fx.draft_variation("VO-008");
    let err = fx
        .engine
        .upsert_variation_copy(original.id, second.id, 0.0, true)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(err.to_string().contains(&first.id.to_string()), "{err}");
}

#[test]
fn duplicate_copy_is_a_conflict_and_upsert_updates() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let variation = fx.draft_variation("VO-009");

    let copy = fx
        .engine
        .create_variation_copy(original.id, variation.id, 5.0)
        .unwrap()
        .value;
    let err = fx
        .engine
        .create_variation_copy(original.id, variation.id, 6.0)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Conflict);

    let updated = fx
        .engine
        .upsert_variation_copy(original.id, variation.id, 6.0, false)
        .unwrap();
    assert_eq!(updated.value.id, copy.id);
    assert_eq!(updated.value.variation_hours, 6.0);
    assert!(matches!(
        updated.events.as_slice(),
        [DomainEvent::VariationCopyUpdated { .. }]
    ));

    // Flip the same copy to a cancellation and back.
    let cancelled = fx
        .engine
        .upsert_variation_copy(original.id, variation.id, 0.0, true)
        .unwrap()
        .value;
    assert_eq!(cancelled.id, copy.id);
    assert_eq!(cancelled.variation_status, VariationStatus::UnapprovedCancellation);
    assert_eq!(fx.engine.variation_deliverables(variation.id).unwrap().len(), 1);
}

#[test]
fn a_copy_cannot_be_the_source_of_another_copy() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let variation = fx.draft_variation("VO-010");
    let copy = fx
        .engine
        .create_variation_copy(original.id, variation.id, 5.0)
        .unwrap()
        .value;

    let other = fx.draft_variation("VO-011");
    let err = fx
        .engine
        .create_variation_copy(copy.id, other.id, 1.0)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[test]
fn approval_requires_a_submitted_variation() {
    let fx = Fixture::new();
    let variation = fx.draft_variation("VO-012");
    let err = fx
        .engine
        .approve_variation(variation.id, "client.rep")
        .unwrap_err();
    assert!(matches!(err, LedgerError::State { .. }));

    let err = fx.engine.reject_variation(variation.id).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::State);
}

#[test]
fn approved_variation_no_longer_accepts_copies() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let variation = fx.draft_variation("VO-013");
    fx.submit(&variation);
    fx.engine.approve_variation(variation.id, "client.rep").unwrap();

    let err = fx
        .engine
        .upsert_variation_copy(original.id, variation.id, 3.0, false)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::State);
}

#[test]
fn reject_discards_unapproved_copies_only() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let variation = fx.draft_variation("VO-014");
    let copy = fx
        .engine
        .create_variation_copy(original.id, variation.id, 4.0)
        .unwrap()
        .value;
    let added = fx
        .engine
        .create_new_variation_deliverable(
            variation.id,
            fx.spec("New pipe rack", 16.0, &fx.open_gate),
            16.0,
        )
        .unwrap()
        .value;
    assert_eq!(added.original_deliverable_id, None);
    assert_eq!(added.variation_status, VariationStatus::UnapprovedVariation);
    fx.submit(&variation);

    let applied = fx.engine.reject_variation(variation.id).unwrap();
    assert_eq!(applied.value, 2);
    assert_eq!(
        applied.events.last(),
        Some(&DomainEvent::VariationRejected {
            variation_id: variation.id,
            discarded: 2
        })
    );

    assert!(matches!(
        fx.engine.deliverable(copy.id),
        Err(LedgerError::NotFound { .. })
    ));
    assert!(fx.reload(added.id).deleted);
    let original_after = fx.engine.deliverable(original.id).unwrap();
    assert_eq!(original_after.variation_hours, 0.0);
    assert_eq!(original_after.variation_status, VariationStatus::Standard);
    assert_eq!(
        fx.engine.variation(variation.id).unwrap().state,
        VariationState::Rejected
    );

    // Rejecting again is a no-op.
    assert_eq!(fx.engine.reject_variation(variation.id).unwrap().value, 0);
}

#[test]
fn variation_only_deliverable_can_be_removed_before_approval() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let variation = fx.draft_variation("VO-015");
    let copy = fx
        .engine
        .create_variation_copy(original.id, variation.id, 4.0)
        .unwrap()
        .value;
    let added = fx
        .engine
        .create_new_variation_deliverable(
            variation.id,
            fx.spec("Tank foundation", 24.0, &fx.open_gate),
            24.0,
        )
        .unwrap()
        .value;

    let err = fx.engine.remove_variation_deliverable(copy.id).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::State);

    let removed = fx.engine.remove_variation_deliverable(added.id).unwrap();
    assert!(removed.value.deleted);
    assert_eq!(fx.engine.variation_deliverables(variation.id).unwrap().len(), 1);
}

#[test]
fn copy_must_belong_to_the_variations_project() {
    let fx = Fixture::new();
    let original = fx.deliverable(40.0);
    let elsewhere = fx.engine.create_project("South Yard", None).unwrap();
    let variation = fx
        .engine
        .create_variation(elsewhere.id, "VO-016")
        .unwrap()
        .value;

    let err = fx
        .engine
        .create_variation_copy(original.id, variation.id, 2.0)
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[test]
fn failed_reconciliation_is_reported_and_resumable() {
    let fx = Fixture::new();
    let broken = fx.deliverable(50.0);
    let healthy = fx.deliverable(70.0);
    let variation = fx.draft_variation("VO-017");
    let broken_copy = fx
        .engine
        .create_variation_copy(broken.id, variation.id, 5.0)
        .unwrap()
        .value;
    fx.engine
        .create_variation_copy(healthy.id, variation.id, 7.0)
        .unwrap();
    fx.submit(&variation);

    fx.store().break_reconciliation(broken.id);
    let first = fx.engine.approve_variation(variation.id, "client.rep").unwrap().value;

    assert_eq!(first.failures.len(), 1);
    let failure = &first.failures[0];
    assert_eq!(failure.deliverable_id, broken_copy.id);
    assert_eq!(failure.variation_id, variation.id);
    assert_eq!(failure.original_deliverable_id, Some(broken.id));
    assert_eq!(failure.category, ErrorCategory::Reconciliation);

    // The other copy was settled, and the broken copy is approved but its
    // original has not moved.
    assert_eq!(fx.engine.deliverable(healthy.id).unwrap().variation_hours, 7.0);
    assert_eq!(fx.engine.deliverable(broken.id).unwrap().variation_hours, 0.0);
    assert_eq!(
        fx.engine.deliverable(broken_copy.id).unwrap().variation_status,
        VariationStatus::ApprovedVariation
    );
    assert!(fx.store().reconciliation_record(broken_copy.id).unwrap().is_none());

    fx.store().heal_reconciliation();
    let resumed = fx.engine.approve_variation(variation.id, "client.rep").unwrap().value;
    assert!(resumed.is_complete());
    assert!(resumed.approved.is_empty());
    assert_eq!(resumed.reconciled.len(), 1);

    assert_eq!(fx.engine.deliverable(broken.id).unwrap().variation_hours, 5.0);
    assert_eq!(fx.engine.deliverable(healthy.id).unwrap().variation_hours, 7.0);
}

#[test]
fn submit_stamps_submitter_once() {
    let fx = Fixture::new();
    let variation = fx.draft_variation("VO-018");
    let submitted = fx.submit(&variation);
    assert_eq!(submitted.state, VariationState::Submitted);
    assert_eq!(submitted.submitted_by.as_deref(), Some("estimator"));
    assert!(submitted.submitted_at.is_some());

    let err = fx
        .engine
        .submit_variation(variation.id, "estimator")
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::State);
}
