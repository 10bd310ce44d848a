//! Progress ledger.
//!
//! Each deliverable owns one entry per reporting period. The per-period
//! increment (`percentage_earned`) is authoritative; cumulative values are
//! running sums of increments. Re-recording a period replaces its entry and
//! re-bases every later entry so that their increments and earned hours are
//! preserved while their cumulative values shift by the same amount.
//!
//! Validation order for a new cumulative value `c` at period `p`:
//! 1. `c <= gate.max_percentage`
//! 2. `c >= cumulative of all periods before p`
//! 3. `c + sum(increments of periods after p) <= 1`
//! 4. re-based later periods stay within `gate.max_percentage`

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::context::Ctx;
use crate::errors::{LedgerError, Result};
use crate::events::{Applied, DomainEvent};
use crate::model::{Deliverable, DeliverableGate, DeliverableId, GateId, ProgressEntry};
use crate::store::LedgerStore;

/// Snapshot of one deliverable's progress entries, ordered by period.
#[derive(Debug, Clone, Default)]
pub struct ProgressLedger {
    entries: Vec<ProgressEntry>,
}

/// Entries to write for one accepted progress request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressPlan {
    pub entry: ProgressEntry,
    /// Later entries with their cumulative value shifted
    pub rebased: Vec<ProgressEntry>,
}

impl ProgressPlan {
    /// Everything to upsert, the requested period first.
    pub fn entries(&self) -> Vec<ProgressEntry> {
        std::iter::once(self.entry.clone())
            .chain(self.rebased.iter().cloned())
            .collect()
    }
}

impl ProgressLedger {
    pub fn new(mut entries: Vec<ProgressEntry>) -> Self {
        entries.sort_by_key(|e| e.period);
        Self { entries }
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ProgressEntry> {
        self.entries
    }

    pub fn entry(&self, period: u32) -> Option<&ProgressEntry> {
        self.entries.iter().find(|e| e.period == period)
    }

    /// Cumulative percentage reached by all periods strictly before `period`.
    pub fn cumulative_before(&self, period: u32) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.period < period)
            .map(|e| e.percentage_earned)
            .sum()
    }

    /// Cumulative percentage standing at `period`, including its own entry.
    pub fn cumulative_through(&self, period: u32) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.period <= period)
            .map(|e| e.percentage_earned)
            .sum()
    }

    /// Sum of the increments recorded for periods after `period`.
    pub fn future_increment(&self, period: u32) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.period > period)
            .map(|e| e.percentage_earned)
            .sum()
    }

    /// Latest cumulative percentage, 0 when nothing is recorded.
    pub fn latest_cumulative(&self) -> f64 {
        self.entries
            .last()
            .map_or(0.0, |e| e.cumulative_percentage)
    }

    /// Hours earned across all recorded periods.
    pub fn earned_hours(&self) -> f64 {
        self.entries.iter().map(|e| e.units_earned_this_period).sum()
    }

    /// Validate a request and build the entries that implement it.
    pub fn plan(
        &self,
        deliverable: &Deliverable,
        gate: &DeliverableGate,
        period: u32,
        cumulative_percentage: f64,
        tolerance: f64,
        now: DateTime<Utc>,
    ) -> Result<ProgressPlan> {
        if period == 0 {
            return Err(LedgerError::validation("reporting periods start at 1"));
        }
        if !cumulative_percentage.is_finite() || !(0.0..=1.0).contains(&cumulative_percentage) {
            return Err(LedgerError::validation(format!(
                "cumulative percentage {cumulative_percentage} is outside 0..=1"
            )));
        }

        if cumulative_percentage > gate.max_percentage + tolerance {
            return Err(LedgerError::validation(format!(
                "cumulative percentage {cumulative_percentage} exceeds gate '{}' maximum {}",
                gate.name, gate.max_percentage
            )));
        }

        let previous = self.cumulative_before(period);
        if cumulative_percentage + tolerance < previous {
            return Err(LedgerError::validation(format!(
                "cumulative percentage {cumulative_percentage} is below {previous} already \
                 reported before period {period}"
            )));
        }

        let future = self.future_increment(period);
        if cumulative_percentage + future > 1.0 + tolerance {
            return Err(LedgerError::validation(format!(
                "cumulative percentage {cumulative_percentage} plus {future} recorded after \
                 period {period} exceeds 100%"
            )));
        }
        if future > 0.0 && cumulative_percentage + future > gate.max_percentage + tolerance {
            return Err(LedgerError::validation(format!(
                "cumulative percentage {cumulative_percentage} would lift later periods to {} \
                 above gate '{}' maximum {}",
                cumulative_percentage + future,
                gate.name,
                gate.max_percentage
            )));
        }

        let increment = (cumulative_percentage - previous).max(0.0);
        let entry = ProgressEntry {
            deliverable_id: deliverable.id,
            period,
            cumulative_percentage,
            percentage_earned: increment,
            units_earned_this_period: deliverable.total_hours() * increment,
            gate_id: Some(gate.id),
            recorded_at: now,
        };

        let mut running = cumulative_percentage;
        let rebased = self
            .entries
            .iter()
            .filter(|e| e.period > period)
            .filter_map(|e| {
                running += e.percentage_earned;
                let shifted = running.min(1.0);
                ((shifted - e.cumulative_percentage).abs() > f64::EPSILON).then(|| {
                    let mut next = e.clone();
                    next.cumulative_percentage = shifted;
                    next
                })
            })
            .collect();

        Ok(ProgressPlan { entry, rebased })
    }
}

/// Validate and commit one cumulative value for `deliverable` under `gate`.
/// Also assigns `gate` to the deliverable when it differs.
pub(crate) fn commit_entry<S, C>(
    ctx: &Ctx<'_, S, C>,
    deliverable: &Deliverable,
    gate: &DeliverableGate,
    period: u32,
    cumulative_percentage: f64,
) -> Result<(ProgressEntry, Vec<DomainEvent>)>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let ledger = ProgressLedger::new(ctx.store.progress_entries(deliverable.id)?);
    let plan = ledger
        .plan(
            deliverable,
            gate,
            period,
            cumulative_percentage,
            ctx.tolerance(),
            ctx.clock.now(),
        )
        .inspect_err(|err| {
            tracing::debug!(
                deliverable_id = %deliverable.id,
                period,
                cumulative_percentage,
                error = %err,
                "Progress rejected"
            );
        })?;

    let previous_gate_id = deliverable.gate_id;
    let mut next = deliverable.clone();
    next.gate_id = Some(gate.id);
    ctx.store.commit_progress(&next, &plan.entries())?;

    let mut events = Vec::with_capacity(2);
    if previous_gate_id != Some(gate.id) {
        events.push(DomainEvent::GateChanged {
            deliverable_id: deliverable.id,
            previous_gate_id,
            gate_id: gate.id,
        });
    }
    events.push(DomainEvent::ProgressRecorded {
        deliverable_id: deliverable.id,
        period,
        cumulative_percentage,
        units_earned: plan.entry.units_earned_this_period,
        rebased_periods: plan.rebased.iter().map(|e| e.period).collect(),
    });

    tracing::info!(
        deliverable_id = %deliverable.id,
        period,
        cumulative_percentage,
        units_earned = plan.entry.units_earned_this_period,
        rebased = plan.rebased.len(),
        "Progress recorded"
    );

    Ok((plan.entry, events))
}

pub(crate) fn record_progress<S, C>(
    ctx: &Ctx<'_, S, C>,
    deliverable_id: DeliverableId,
    period: u32,
    cumulative_percentage: f64,
    gate_id: Option<GateId>,
) -> Result<Applied<ProgressEntry>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    ctx.with_commit_retry("record_progress", &deliverable_id, || {
        let deliverable = ctx.deliverable(deliverable_id)?;
        let gate_id = gate_id.or(deliverable.gate_id).ok_or_else(|| {
            LedgerError::validation(format!(
                "deliverable {deliverable_id} has no gate assigned and none was given"
            ))
        })?;
        let gate = ctx.gate(gate_id)?;
        let (entry, events) =
            commit_entry(ctx, &deliverable, &gate, period, cumulative_percentage)?;
        Ok(Applied::new(entry, events))
    })
}

pub(crate) fn progress_history<S, C>(
    ctx: &Ctx<'_, S, C>,
    deliverable_id: DeliverableId,
) -> Result<Vec<ProgressEntry>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    let deliverable = ctx.deliverable(deliverable_id)?;
    Ok(ProgressLedger::new(ctx.store.progress_entries(deliverable.id)?).into_entries())
}
