//! Borrowed collaborators shared by the operation modules.

use std::fmt::Display;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::errors::{LedgerError, Result};
use crate::model::{
    Deliverable, DeliverableGate, DeliverableId, GateId, Project, ProjectId, Variation,
    VariationId,
};
use crate::store::LedgerStore;

pub(crate) struct Ctx<'a, S: ?Sized, C: ?Sized> {
    pub store: &'a S,
    pub clock: &'a C,
    pub config: &'a EngineConfig,
}

impl<S, C> Ctx<'_, S, C>
where
    S: LedgerStore + ?Sized,
    C: Clock + ?Sized,
{
    /// Live (non-deleted) deliverable
    pub fn deliverable(&self, id: DeliverableId) -> Result<Deliverable> {
        match self.store.deliverable(id)? {
            Some(d) if !d.deleted => {
                d.check_invariants()?;
                Ok(d)
            }
            _ => Err(LedgerError::not_found("deliverable", id)),
        }
    }

    pub fn variation(&self, id: VariationId) -> Result<Variation> {
        self.store
            .variation(id)?
            .ok_or_else(|| LedgerError::not_found("variation", id))
    }

    pub fn gate(&self, id: GateId) -> Result<DeliverableGate> {
        self.store
            .gate(id)?
            .ok_or_else(|| LedgerError::not_found("gate", id))
    }

    pub fn project(&self, id: ProjectId) -> Result<Project> {
        self.store
            .project(id)?
            .ok_or_else(|| LedgerError::not_found("project", id))
    }

    /// Run `attempt` until it succeeds, fails for a reason other than a lost
    /// optimistic lock, or runs out of attempts. Each attempt must re-read its
    /// snapshot and re-validate from scratch.
    pub fn with_commit_retry<T>(
        &self,
        operation: &'static str,
        subject: &dyn Display,
        mut attempt: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let max = self.config.max_commit_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt() {
                Err(err) if err.is_retryable() && tries < max => {
                    tracing::warn!(
                        operation,
                        subject = %subject,
                        attempt = tries,
                        error = %err,
                        "Optimistic lock lost, re-validating"
                    );
                    tries += 1;
                }
                other => return other,
            }
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.config.percentage_tolerance
    }
}
