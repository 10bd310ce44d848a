//! Gate resolution.
//!
//! When a deliverable moves to a new gate, the gate's auto-percentage can
//! "catch up" the deliverable: it wins over a lower manual entry and over a
//! lower previous-period baseline. A gate change alone applies the
//! auto-percentage only when it moves progress forward.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::context::Ctx;
use crate::errors::{LedgerError, Result};
use crate::events::{Applied, DomainEvent};
use crate::model::{DeliverableGate, DeliverableId, GateId, ProgressEntry};
use crate::period::current_period;
use crate::progress::{ProgressLedger, commit_entry};
use crate::store::LedgerStore;

/// Where an applied percentage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentageSource {
    GateAuto,
    UserEntered,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum GateResolution {
    /// Record this cumulative percentage for the current period
    Apply {
        percentage: f64,
        source: PercentageSource,
    },
    /// Leave progress as it is
    Unchanged,
}

impl GateResolution {
    pub fn percentage(&self) -> Option<f64> {
        match self {
            Self::Apply { percentage, .. } => Some(*percentage),
            Self::Unchanged => None,
        }
    }
}

/// Effective percentage for a gate change combined with a manual entry.
pub fn resolve_gate_change(
    new_gate: &DeliverableGate,
    user_entered_percentage: f64,
    previous_periods_cumulative: f64,
) -> f64 {
    match new_gate.auto_percentage {
        Some(auto) if auto > user_entered_percentage && auto > previous_periods_cumulative => {
            auto
        }
        _ => user_entered_percentage,
    }
}

/// Resolve a gate change with or without a manual percentage in the same
/// request.
pub fn resolve(
    new_gate: &DeliverableGate,
    user_entered_percentage: Option<f64>,
    previous_periods_cumulative: f64,
) -> GateResolution {
    match user_entered_percentage {
        Some(user) => {
            let percentage = resolve_gate_change(new_gate, user, previous_periods_cumulative);
            let source = if new_gate.auto_percentage == Some(percentage) && percentage != user {
                PercentageSource::GateAuto
            } else {
                PercentageSource::UserEntered
            };
            GateResolution::Apply { percentage, source }
        }
        None => match new_gate.auto_percentage {
            Some(auto) if auto > previous_periods_cumulative => GateResolution::Apply {
                percentage: auto,
                source: PercentageSource::GateAuto,
            },
            _ => GateResolution::Unchanged,
        },
    }
}

/// Outcome of a gate change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateChange {
    pub deliverable_id: DeliverableId,
    pub gate_id: GateId,
    pub period: u32,
    pub resolution: GateResolution,
    /// Entry written for `period` when a percentage was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ProgressEntry>,
}

impl GateChange {
    /// Effective percentage applied, if any
    pub fn applied_percentage(&self) -> Option<f64> {
        self.resolution.percentage()
    }
}

/// Move a deliverable to `gate_id` in the project's current period.
///
/// The baseline for the auto-percentage comparison is the cumulative value
/// already standing at the current period, so a gate change never lowers
/// progress recorded earlier in the same period.
pub(crate) fn change_gate<S, C>(
    ctx: &Ctx<'_, S, C>,
    deliverable_id: DeliverableId,
    gate_id: GateId,
    user_entered_percentage: Option<f64>,
) -> Result<Applied<GateChange>>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    ctx.with_commit_retry("change_gate", &deliverable_id, || {
        let deliverable = ctx.deliverable(deliverable_id)?;
        let gate = ctx.gate(gate_id)?;
        let project = ctx.project(deliverable.scope.project_id)?;
        let start = project.progress_start.ok_or_else(|| {
            LedgerError::domain(format!("project {} has no progress start date", project.id))
        })?;
        let period = current_period(start, ctx.clock.today())?;

        let ledger = ProgressLedger::new(ctx.store.progress_entries(deliverable.id)?);
        let baseline = match user_entered_percentage {
            Some(_) => ledger.cumulative_before(period),
            None => ledger.cumulative_through(period),
        };
        let resolution = resolve(&gate, user_entered_percentage, baseline);
        tracing::debug!(
            deliverable_id = %deliverable.id,
            gate_id = %gate.id,
            period,
            baseline,
            ?resolution,
            "Gate change resolved"
        );

        let (entry, events) = match resolution {
            GateResolution::Apply { percentage, .. } => {
                let (entry, events) = commit_entry(ctx, &deliverable, &gate, period, percentage)?;
                (Some(entry), events)
            }
            GateResolution::Unchanged if deliverable.gate_id == Some(gate.id) => (None, Vec::new()),
            GateResolution::Unchanged => {
                let mut next = deliverable.clone();
                next.gate_id = Some(gate.id);
                ctx.store.update_deliverable(&next)?;
                tracing::info!(
                    deliverable_id = %deliverable.id,
                    gate_id = %gate.id,
                    "Gate changed without progress update"
                );
                (
                    None,
                    vec![DomainEvent::GateChanged {
                        deliverable_id: deliverable.id,
                        previous_gate_id: deliverable.gate_id,
                        gate_id: gate.id,
                    }],
                )
            }
        };

        Ok(Applied::new(
            GateChange {
                deliverable_id: deliverable.id,
                gate_id: gate.id,
                period,
                resolution,
                entry,
            },
            events,
        ))
    })
}
