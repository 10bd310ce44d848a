//! Ledger error types
//!
//! Every engine operation returns [`LedgerError`]. The variants map one-to-one
//! onto [`ErrorCategory`], which is what callers log and what the service
//! layer turns into wire error codes.
//!
//! Policy:
//! - validation, state and conflict errors are raised before any write
//! - store version conflicts are retried inside the engine (full re-validation)
//! - reconciliation failures are never retried silently; they carry the
//!   variation and deliverable identity needed for a targeted retry

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{DeliverableId, VariationId};

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller-supplied percentage/gate/cancellation breaks an invariant
    Validation,
    /// Transition is illegal for the current variation/deliverable state
    State,
    /// Uniqueness or idempotency invariant would be violated
    Conflict,
    /// Referenced record does not exist
    NotFound,
    /// Original-deliverable update failed after the copy was committed
    Reconciliation,
    /// Domain input outside the engine's definition (e.g. dates out of order)
    Domain,
    /// Persistence collaborator failed
    Store,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::State => "STATE_ERROR",
            Self::Conflict => "CONFLICT_ERROR",
            Self::NotFound => "NOT_FOUND_ERROR",
            Self::Reconciliation => "RECONCILIATION_FAILURE",
            Self::Domain => "DOMAIN_ERROR",
            Self::Store => "STORE_ERROR",
        }
    }

    /// Whether the caller can fix the request and resubmit it as-is
    pub fn caller_recoverable(&self) -> bool {
        matches!(self, Self::Validation | Self::Conflict | Self::Domain)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a [`crate::store::LedgerStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic lock lost: the record changed since it was read.
    #[error("version conflict on {entity} {id}: expected v{expected}, found v{found}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },

    #[error("{entity} {id} is not in the store")]
    Missing { entity: &'static str, id: String },

    /// A record handed to the store violates a data-model invariant.
    #[error("invariant violated: {message}")]
    Invariant { message: String },

    #[error("store backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Create a backend error without a source
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error with source
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Ledger error with category and context
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("state error: {message}")]
    State { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(
        "reconciliation failed for deliverable {deliverable_id} in variation {variation_id}: {source}"
    )]
    Reconciliation {
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("domain error: {message}")]
    Domain { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::State { .. } => ErrorCategory::State,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Reconciliation { .. } => ErrorCategory::Reconciliation,
            Self::Domain { .. } => ErrorCategory::Domain,
            Self::Store(_) => ErrorCategory::Store,
        }
    }

    /// Whether the engine may re-run the whole operation on its own.
    ///
    /// Only lost optimistic locks qualify. A reconciliation failure is
    /// deliberately excluded even when its cause was a version conflict.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_version_conflict())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Wrap a failure that happened after a copy's status was committed.
    pub fn reconciliation(
        variation_id: VariationId,
        deliverable_id: DeliverableId,
        source: LedgerError,
    ) -> Self {
        Self::Reconciliation {
            variation_id,
            deliverable_id,
            source: Box::new(source),
        }
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_have_stable_codes() {
        assert_eq!(
            LedgerError::validation("x").category().as_str(),
            "VALIDATION_ERROR"
        );
        assert_eq!(LedgerError::state("x").category(), ErrorCategory::State);
        assert_eq!(
            LedgerError::not_found("deliverable", "d-1").category(),
            ErrorCategory::NotFound
        );
    }

    #[test]
    fn only_version_conflicts_are_retryable() {
        let conflict = LedgerError::from(StoreError::VersionConflict {
            entity: "deliverable",
            id: "d-1".to_string(),
            expected: 1,
            found: 2,
        });
        assert!(conflict.is_retryable());
        assert!(!LedgerError::conflict("duplicate copy").is_retryable());
        assert!(!LedgerError::from(StoreError::backend("disk full")).is_retryable());
    }

    #[test]
    fn reconciliation_failure_is_not_retryable_even_for_lock_loss() {
        let inner = LedgerError::from(StoreError::VersionConflict {
            entity: "deliverable",
            id: "orig".to_string(),
            expected: 3,
            found: 4,
        });
        let err = LedgerError::reconciliation(VariationId::new(), DeliverableId::new(), inner);
        assert_eq!(err.category(), ErrorCategory::Reconciliation);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("reconciliation failed"));
    }
}
