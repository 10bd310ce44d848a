//! Domain events returned by mutating operations.
//!
//! Events describe what was committed. Callers (the service, audit sinks,
//! notification fan-out) act on them after the operation returns; nothing in
//! the engine hooks store writes.

use serde::{Deserialize, Serialize};

use crate::model::{DeliverableId, GateId, ProjectId, VariationId, VariationStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ProgressRecorded {
        deliverable_id: DeliverableId,
        period: u32,
        cumulative_percentage: f64,
        units_earned: f64,
        /// Later periods whose cumulative value shifted with this entry
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rebased_periods: Vec<u32>,
    },
    GateChanged {
        deliverable_id: DeliverableId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_gate_id: Option<GateId>,
        gate_id: GateId,
    },
    VariationCreated {
        variation_id: VariationId,
        project_id: ProjectId,
    },
    VariationSubmitted {
        variation_id: VariationId,
        submitted_by: String,
    },
    VariationCopyCreated {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        original_deliverable_id: DeliverableId,
        variation_hours: f64,
    },
    VariationDeliverableCreated {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        variation_hours: f64,
    },
    VariationCopyUpdated {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        variation_status: VariationStatus,
        variation_hours: f64,
    },
    CancellationRequested {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        original_deliverable_id: DeliverableId,
    },
    DeliverableApproved {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        variation_status: VariationStatus,
        approved_variation_hours: f64,
    },
    ReconciliationApplied {
        variation_id: VariationId,
        copy_id: DeliverableId,
        original_deliverable_id: DeliverableId,
        delta: f64,
        variation_hours_after: f64,
    },
    CopyDiscarded {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
    },
    VariationDeliverableRemoved {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
    },
    VariationApproved {
        variation_id: VariationId,
        approved_by: String,
    },
    VariationRejected {
        variation_id: VariationId,
        discarded: usize,
    },
}

impl DomainEvent {
    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProgressRecorded { .. } => "progress_recorded",
            Self::GateChanged { .. } => "gate_changed",
            Self::VariationCreated { .. } => "variation_created",
            Self::VariationSubmitted { .. } => "variation_submitted",
            Self::VariationCopyCreated { .. } => "variation_copy_created",
            Self::VariationDeliverableCreated { .. } => "variation_deliverable_created",
            Self::VariationCopyUpdated { .. } => "variation_copy_updated",
            Self::CancellationRequested { .. } => "cancellation_requested",
            Self::DeliverableApproved { .. } => "deliverable_approved",
            Self::ReconciliationApplied { .. } => "reconciliation_applied",
            Self::CopyDiscarded { .. } => "copy_discarded",
            Self::VariationDeliverableRemoved { .. } => "variation_deliverable_removed",
            Self::VariationApproved { .. } => "variation_approved",
            Self::VariationRejected { .. } => "variation_rejected",
        }
    }
}

/// Value produced by a mutating operation plus the events it committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Applied<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<DomainEvent>,
}

impl<T> Applied<T> {
    pub fn new(value: T, events: Vec<DomainEvent>) -> Self {
        Self { value, events }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            value: f(self.value),
            events: self.events,
        }
    }
}
