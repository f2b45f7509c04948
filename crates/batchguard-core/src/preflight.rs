use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{BatchCatalogEntry, ExecutionStatus, IssuerIdentity, ReferenceDate};
use crate::store::{AuditStore, IssuerStore};

/// Options that relax or extend the precondition checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreflightOptions {
    /// Take the routine out of the batch catalog instead of refusing to run.
    pub remove_from_catalog: bool,
    /// Retry a previous attempt that did not succeed.
    pub force: bool,
}

/// Statuses that block a new attempt for the same tuple.
pub fn blocking_statuses(force: bool) -> &'static [ExecutionStatus] {
    if force {
        &[ExecutionStatus::Succeeded]
    } else {
        &[ExecutionStatus::Registered, ExecutionStatus::Succeeded]
    }
}

pub struct PreflightValidator {
    issuer: Arc<dyn IssuerStore>,
    audit: Arc<dyn AuditStore>,
}

impl PreflightValidator {
    pub fn new(issuer: Arc<dyn IssuerStore>, audit: Arc<dyn AuditStore>) -> Self {
        Self { issuer, audit }
    }

    /// The issuer's own spelling of the routine name, if it exists.
    pub async fn resolve_routine(&self, routine: &str) -> Result<Option<String>> {
        Ok(self.issuer.resolve_routine(routine).await?)
    }

    pub async fn catalog_lookup(&self, routine: &str) -> Result<Option<BatchCatalogEntry>> {
        Ok(self.issuer.catalog_entry(routine).await?)
    }

    pub async fn remove_from_catalog(&self, entry: &BatchCatalogEntry) -> Result<u64> {
        Ok(self.issuer.remove_catalog_entry(entry).await?)
    }

    /// Whether a prior attempt blocks this one. Without `force` a registered
    /// (possibly still running) or succeeded attempt blocks; with `force` only
    /// a success does.
    pub async fn already_executed(
        &self,
        routine: &str,
        issuer: &IssuerIdentity,
        date: ReferenceDate,
        force: bool,
    ) -> Result<bool> {
        let blocking = blocking_statuses(force);
        let records = self.audit.executions_for(routine, issuer, date).await?;

        Ok(records.iter().any(|r| {
            let blocks = blocking.contains(&r.status);
            if blocks {
                tracing::debug!(
                    record_id = %r.id,
                    status = %r.status,
                    "Prior execution blocks this run"
                );
            }
            blocks
        }))
    }

    /// Existence, catalog membership, then idempotency. Stops at the first
    /// failed check and otherwise returns the routine name as the issuer
    /// spells it, which every later lookup and the invocation must use.
    pub async fn run(
        &self,
        requested: &str,
        date: ReferenceDate,
        options: PreflightOptions,
    ) -> Result<String> {
        let identity = self.issuer.identity().clone();

        tracing::info!(routine = requested, "Checking that the routine exists");
        let routine = match self.resolve_routine(requested).await? {
            Some(name) => name,
            None => {
                tracing::error!(
                    routine = requested,
                    database = %identity.database,
                    "Routine not found"
                );
                return Err(Error::RoutineNotFound {
                    routine: requested.to_string(),
                    database: identity.database,
                });
            }
        };
        if routine != requested {
            tracing::info!(requested, routine = %routine, "Using the issuer's routine name");
        }
        let routine = routine.as_str();

        tracing::info!(routine, "Checking the batch service catalog");
        match self.catalog_lookup(routine).await? {
            Some(entry) if options.remove_from_catalog => {
                tracing::info!(
                    routine,
                    execution_order = entry.execution_order,
                    "Removing routine from the batch service catalog (--remove-from-batch)"
                );
                let removed = self.remove_from_catalog(&entry).await?;
                if removed == 0 {
                    tracing::warn!(routine, "Catalog entry was already gone when removing it");
                }
            }
            Some(entry) => {
                tracing::error!(
                    routine,
                    execution_order = entry.execution_order,
                    "Routine is registered to run in the batch service catalog"
                );
                return Err(Error::AlreadyScheduled(routine.to_string()));
            }
            None => {
                tracing::info!(routine, "Routine not registered in the batch service catalog");
            }
        }

        tracing::info!(
            routine,
            run_date = %date,
            force = options.force,
            "Checking previous executions for the reference date"
        );
        if self
            .already_executed(routine, &identity, date, options.force)
            .await?
        {
            tracing::error!(
                routine,
                run_date = %date,
                "Routine already has an execution for the reference date"
            );
            return Err(Error::AlreadyExecuted {
                routine: routine.to_string(),
                reference_date: date,
            });
        }

        Ok(routine.to_string())
    }
}
