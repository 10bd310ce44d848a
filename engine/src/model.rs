//! Record types for the ledger.
//!
//! - **Deliverable**: a unit of engineering work with a budget, and possibly a
//!   variation-scoped copy of another deliverable
//! - **Variation**: a proposed contract change owning a set of copies
//! - **DeliverableGate**: a completion milestone with a ceiling
//! - **ProgressEntry**: one period's earned progress for a deliverable
//!
//! Total hours are always derived (`budget_hours + variation_hours`) and never
//! stored.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{LedgerError, Result};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from the hyphenated text form used in storage
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

record_id!(
    /// Deliverable identifier
    DeliverableId
);
record_id!(
    /// Variation identifier
    VariationId
);
record_id!(
    /// Gate identifier
    GateId
);
record_id!(
    /// Project identifier
    ProjectId
);

/// Where a deliverable stands with respect to variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationStatus {
    /// Baseline deliverable, not scoped to any variation
    Standard,
    UnapprovedVariation,
    ApprovedVariation,
    UnapprovedCancellation,
    ApprovedCancellation,
}

impl VariationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::UnapprovedVariation => "unapproved_variation",
            Self::ApprovedVariation => "approved_variation",
            Self::UnapprovedCancellation => "unapproved_cancellation",
            Self::ApprovedCancellation => "approved_cancellation",
        }
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "unapproved_variation" => Some(Self::UnapprovedVariation),
            "approved_variation" => Some(Self::ApprovedVariation),
            "unapproved_cancellation" => Some(Self::UnapprovedCancellation),
            "approved_cancellation" => Some(Self::ApprovedCancellation),
            _ => None,
        }
    }

    /// Pending client decision; discarded on rejection
    pub fn is_unapproved(&self) -> bool {
        matches!(
            self,
            Self::UnapprovedVariation | Self::UnapprovedCancellation
        )
    }

    /// Terminal approved states
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::ApprovedVariation | Self::ApprovedCancellation)
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::UnapprovedCancellation | Self::ApprovedCancellation
        )
    }
}

/// Lifecycle of a variation (Draft → Submitted → ClientApproved | Rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationState {
    Draft,
    Submitted,
    ClientApproved,
    Rejected,
}

impl VariationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::ClientApproved => "client_approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "client_approved" => Some(Self::ClientApproved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Whether the variation still accepts copy edits
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Draft | Self::Submitted)
    }
}

/// Project, reduced to what the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// First day of the progress reporting calendar (period 1's month).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_start: Option<NaiveDate>,
}

/// Scope fields shared between an original deliverable and its copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverableScope {
    pub project_id: ProjectId,
    pub area: String,
    pub discipline: String,
    pub document_type: String,
    pub booking_code: String,
}

/// A unit of engineering work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: DeliverableId,
    pub name: String,
    #[serde(flatten)]
    pub scope: DeliverableScope,

    /// Immutable baseline
    pub budget_hours: f64,
    /// Sum of unapproved and approved variation deltas
    pub variation_hours: f64,
    /// Sum of approved-only deltas
    pub approved_variation_hours: f64,

    pub variation_status: VariationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<VariationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_deliverable_id: Option<DeliverableId>,

    /// Current completion gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<GateId>,

    /// Soft-delete marker
    #[serde(default)]
    pub deleted: bool,

    /// Optimistic-lock version, bumped by the store on every write
    #[serde(default)]
    pub version: u64,
}

impl Deliverable {
    /// Build a fresh `Standard` deliverable from a specification.
    pub fn standard(spec: NewDeliverable) -> Self {
        Self {
            id: DeliverableId::new(),
            name: spec.name,
            scope: spec.scope,
            budget_hours: spec.budget_hours,
            variation_hours: 0.0,
            approved_variation_hours: 0.0,
            variation_status: VariationStatus::Standard,
            variation_id: None,
            original_deliverable_id: None,
            gate_id: spec.gate_id,
            deleted: false,
            version: 0,
        }
    }

    /// Derived: `budget_hours + variation_hours`
    pub fn total_hours(&self) -> f64 {
        self.budget_hours + self.variation_hours
    }

    /// Check the structural invariants of the data model.
    pub fn check_invariants(&self) -> Result<()> {
        if self.variation_status == VariationStatus::Standard && self.variation_id.is_some() {
            return Err(LedgerError::validation(format!(
                "standard deliverable {} must not carry a variation id",
                self.id
            )));
        }
        if self.variation_status != VariationStatus::Standard && self.variation_id.is_none() {
            return Err(LedgerError::validation(format!(
                "variation-scoped deliverable {} has no variation id",
                self.id
            )));
        }
        if self.original_deliverable_id.is_some() && self.variation_id.is_none() {
            return Err(LedgerError::validation(format!(
                "copy {} has an original deliverable but no variation id",
                self.id
            )));
        }
        if !self.budget_hours.is_finite() || self.budget_hours < 0.0 {
            return Err(LedgerError::validation(format!(
                "deliverable {} has invalid budget hours {}",
                self.id, self.budget_hours
            )));
        }
        if !self.variation_hours.is_finite() || !self.approved_variation_hours.is_finite() {
            return Err(LedgerError::validation(format!(
                "deliverable {} has non-finite variation hours",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether this record is a variation-scoped copy of another deliverable
    pub fn is_copy(&self) -> bool {
        self.original_deliverable_id.is_some()
    }
}

/// Caller-provided shape of a new deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeliverable {
    pub name: String,
    #[serde(flatten)]
    pub scope: DeliverableScope,
    pub budget_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<GateId>,
}

/// A proposed contract change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub id: VariationId,
    pub project_id: ProjectId,
    pub name: String,
    pub state: VariationState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Variation {
    pub fn draft(project_id: ProjectId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: VariationId::new(),
            project_id,
            name: name.into(),
            state: VariationState::Draft,
            created_at: now,
            submitted_at: None,
            submitted_by: None,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            version: 0,
        }
    }
}

/// A named completion milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverableGate {
    pub id: GateId,
    pub name: String,
    /// Hard ceiling, 0..=1
    pub max_percentage: f64,
    /// Applied automatically when a deliverable enters this gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_percentage: Option<f64>,
}

impl DeliverableGate {
    /// Validated constructor.
    pub fn new(
        name: impl Into<String>,
        max_percentage: f64,
        auto_percentage: Option<f64>,
    ) -> Result<Self> {
        let gate = Self {
            id: GateId::new(),
            name: name.into(),
            max_percentage,
            auto_percentage,
        };
        gate.validate()?;
        Ok(gate)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_percentage) {
            return Err(LedgerError::validation(format!(
                "gate '{}' max percentage {} is outside 0..=1",
                self.name, self.max_percentage
            )));
        }
        if let Some(auto) = self.auto_percentage {
            if !(0.0..=1.0).contains(&auto) {
                return Err(LedgerError::validation(format!(
                    "gate '{}' auto percentage {auto} is outside 0..=1",
                    self.name
                )));
            }
            if auto > self.max_percentage {
                return Err(LedgerError::validation(format!(
                    "gate '{}' auto percentage {auto} exceeds its max {}",
                    self.name, self.max_percentage
                )));
            }
        }
        Ok(())
    }
}

/// Earned progress for one deliverable in one reporting period.
///
/// `percentage_earned` (this period's increment) is the authoritative value;
/// `cumulative_percentage` is the running total as of this period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub deliverable_id: DeliverableId,
    pub period: u32,
    pub cumulative_percentage: f64,
    pub percentage_earned: f64,
    pub units_earned_this_period: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<GateId>,
    pub recorded_at: DateTime<Utc>,
}

/// Audit record proving a copy's delta reached its original.
///
/// At most one exists per copy; its presence is the at-most-once guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub copy_id: DeliverableId,
    pub variation_id: VariationId,
    pub original_deliverable_id: DeliverableId,
    pub delta: f64,
    pub applied_at: DateTime<Utc>,
}
