use ledger_engine::{DomainEvent, ErrorCategory, GateResolution, LedgerError, PercentageSource};
use pretty_assertions::assert_eq;

use super::support::{Fixture, assert_close, date};

#[test]
fn current_period_counts_months_from_progress_start() {
    let fx = Fixture::new();
    assert_eq!(fx.engine.current_period(fx.project.id).unwrap(), 3);

    fx.engine.clock().set_date(date(2025, 1, 2));
    assert_eq!(fx.engine.current_period(fx.project.id).unwrap(), 13);
}

#[test]
fn current_period_without_start_date_is_domain_error() {
    let fx = Fixture::new();
    let undated = fx.engine.create_project("Feasibility", None).unwrap();
    let err = fx.engine.current_period(undated.id).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Domain);
}

#[test]
fn progress_above_gate_ceiling_is_rejected() {
    let fx = Fixture::new();
    let d = fx
        .engine
        .create_deliverable(fx.spec("Datasheet", 100.0, &fx.half_gate))
        .unwrap();

    let err = fx.engine.record_progress(d.id, 1, 0.6, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(fx.engine.progress_history(d.id).unwrap().is_empty());
}

#[test]
fn rebasing_cannot_lift_later_periods_over_gate_ceiling() {
    let fx = Fixture::new();
    let d = fx
        .engine
        .create_deliverable(fx.spec("Datasheet", 100.0, &fx.half_gate))
        .unwrap();

    fx.engine.record_progress(d.id, 1, 0.2, None).unwrap();
    fx.engine.record_progress(d.id, 2, 0.5, None).unwrap();

    // Period 2 earned 0.3 on its own; raising period 1 to 0.3 would put it at 0.6.
    let err = fx.engine.record_progress(d.id, 1, 0.3, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let history = fx.engine.progress_history(d.id).unwrap();
    assert_close(history[0].cumulative_percentage, 0.2);
    assert_close(history[1].cumulative_percentage, 0.5);
    assert!(
        history
            .iter()
            .all(|e| e.cumulative_percentage <= fx.half_gate.max_percentage + 1e-9)
    );

    // Lowering period 1 shifts period 2 down and stays legal.
    fx.engine.record_progress(d.id, 1, 0.1, None).unwrap();
    let history = fx.engine.progress_history(d.id).unwrap();
    assert_close(history[1].cumulative_percentage, 0.4);
}

#[test]
fn units_earned_and_same_period_correction() {
    let fx = Fixture::new();
    let d = fx
        .engine
        .create_deliverable(fx.spec("Datasheet", 100.0, &fx.half_gate))
        .unwrap();

    let first = fx.engine.record_progress(d.id, 1, 0.3, None).unwrap();
    assert_close(first.value.units_earned_this_period, 30.0);

    // Lowering the value of the only recorded period replaces its entry.
    let corrected = fx.engine.record_progress(d.id, 1, 0.2, None).unwrap();
    assert_close(corrected.value.units_earned_this_period, 20.0);

    let history = fx.engine.progress_history(d.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_close(history[0].cumulative_percentage, 0.2);
    assert_close(fx.engine.earned_hours(d.id).unwrap(), 20.0);
}

#[test]
fn later_period_cannot_drop_below_earlier_progress() {
    let fx = Fixture::new();
    let d = fx.deliverable(80.0);

    fx.engine.record_progress(d.id, 1, 0.4, None).unwrap();
    let err = fx.engine.record_progress(d.id, 2, 0.35, None).unwrap_err();
    assert!(matches!(err, LedgerError::Validation { .. }));

    fx.engine.record_progress(d.id, 2, 0.4, None).unwrap();
    fx.engine.record_progress(d.id, 3, 0.9, None).unwrap();

    let history = fx.engine.progress_history(d.id).unwrap();
    let periods: Vec<u32> = history.iter().map(|e| e.period).collect();
    assert_eq!(periods, vec![1, 2, 3]);
    for pair in history.windows(2) {
        assert!(pair[0].cumulative_percentage <= pair[1].cumulative_percentage);
    }
}

#[test]
fn correcting_an_earlier_period_rebases_later_ones() {
    let fx = Fixture::new();
    let d = fx.deliverable(10.0);

    fx.engine.record_progress(d.id, 1, 0.2, None).unwrap();
    fx.engine.record_progress(d.id, 2, 0.5, None).unwrap();

    // Period 2 earned 0.3 on its own, so period 1 may rise to 0.7 at most.
    let err = fx.engine.record_progress(d.id, 1, 0.75, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let applied = fx.engine.record_progress(d.id, 1, 0.6, None).unwrap();
    assert!(applied.events.iter().any(|e| matches!(
        e,
        DomainEvent::ProgressRecorded { rebased_periods, .. } if rebased_periods == &vec![2]
    )));

    let history = fx.engine.progress_history(d.id).unwrap();
    assert_close(history[1].cumulative_percentage, 0.9);
    assert_close(history[1].units_earned_this_period, 3.0);
}

#[test]
fn earned_units_add_up_to_final_percentage() {
    let fx = Fixture::new();
    let d = fx.deliverable(120.0);

    for (period, pct) in [(1, 0.1), (2, 0.25), (3, 0.25), (5, 0.6), (6, 0.85)] {
        fx.engine.record_progress(d.id, period, pct, None).unwrap();
    }
    // Re-record a middle period and an earlier one.
    fx.engine.record_progress(d.id, 3, 0.3, None).unwrap();
    fx.engine.record_progress(d.id, 1, 0.05, None).unwrap();

    let history = fx.engine.progress_history(d.id).unwrap();
    let total_units: f64 = history.iter().map(|e| e.units_earned_this_period).sum();
    let last = history.last().unwrap().cumulative_percentage;
    assert_close(total_units, 120.0 * last);
}

#[test]
fn progress_without_any_gate_is_rejected() {
    let fx = Fixture::new();
    let mut spec = fx.spec("Sketch", 10.0, &fx.open_gate);
    spec.gate_id = None;
    let d = fx.engine.create_deliverable(spec).unwrap();

    let err = fx.engine.record_progress(d.id, 1, 0.1, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let applied = fx
        .engine
        .record_progress(d.id, 1, 0.1, Some(fx.open_gate.id))
        .unwrap();
    assert!(
        applied
            .events
            .iter()
            .any(|e| matches!(e, DomainEvent::GateChanged { .. }))
    );
    assert_eq!(fx.engine.deliverable(d.id).unwrap().gate_id, Some(fx.open_gate.id));
}

#[test]
fn lost_lock_is_retried_with_fresh_snapshot() {
    let fx = Fixture::new();
    let d = fx.deliverable(40.0);

    fx.store().steal_progress_commits(1);
    fx.engine.record_progress(d.id, 1, 0.5, None).unwrap();

    // insert (0), concurrent write (1), commit (2)
    assert_eq!(fx.reload(d.id).version, 2);
    assert_eq!(fx.engine.progress_history(d.id).unwrap().len(), 1);
}

#[test]
fn lock_conflict_surfaces_after_max_attempts() {
    let fx = Fixture::new();
    let d = fx.deliverable(40.0);

    fx.store().steal_progress_commits(10);
    let err = fx.engine.record_progress(d.id, 1, 0.5, None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Store);
    assert!(err.is_retryable());
    assert!(fx.engine.progress_history(d.id).unwrap().is_empty());
}

#[test]
fn gate_auto_percentage_catches_deliverable_up() {
    let fx = Fixture::new();
    let d = fx.deliverable(100.0);
    let ifr = fx
        .engine
        .create_gate("Issued for Approval", 0.6, Some(0.4))
        .unwrap();
    fx.engine.record_progress(d.id, 2, 0.2, None).unwrap();

    let applied = fx.engine.change_gate(d.id, ifr.id, Some(0.1)).unwrap();
    let change = applied.value;
    assert_eq!(change.period, 3);
    assert_eq!(
        change.resolution,
        GateResolution::Apply {
            percentage: 0.4,
            source: PercentageSource::GateAuto
        }
    );
    let entry = change.entry.unwrap();
    assert_close(entry.cumulative_percentage, 0.4);
    assert_close(entry.units_earned_this_period, 20.0);
    assert_eq!(fx.engine.deliverable(d.id).unwrap().gate_id, Some(ifr.id));
}

#[test]
fn gate_only_change_leaves_progress_when_already_ahead() {
    let fx = Fixture::new();
    let d = fx.deliverable(100.0);
    let ifr = fx
        .engine
        .create_gate("Issued for Approval", 0.6, Some(0.4))
        .unwrap();
    fx.engine.record_progress(d.id, 3, 0.5, None).unwrap();

    let applied = fx.engine.change_gate(d.id, ifr.id, None).unwrap();
    assert_eq!(applied.value.resolution, GateResolution::Unchanged);
    assert_eq!(applied.value.applied_percentage(), None);
    assert_eq!(
        applied.events,
        vec![DomainEvent::GateChanged {
            deliverable_id: d.id,
            previous_gate_id: Some(fx.open_gate.id),
            gate_id: ifr.id,
        }]
    );
    let history = fx.engine.progress_history(d.id).unwrap();
    assert_close(history[0].cumulative_percentage, 0.5);
}

#[test]
fn gate_only_change_applies_auto_when_behind() {
    let fx = Fixture::new();
    let d = fx.deliverable(100.0);
    let ifr = fx
        .engine
        .create_gate("Issued for Approval", 0.6, Some(0.4))
        .unwrap();
    fx.engine.record_progress(d.id, 1, 0.1, None).unwrap();

    let applied = fx.engine.change_gate(d.id, ifr.id, None).unwrap();
    assert_eq!(applied.value.applied_percentage(), Some(0.4));
    let history = fx.engine.progress_history(d.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].period, 3);
}
