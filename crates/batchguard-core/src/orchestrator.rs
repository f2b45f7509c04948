use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::classifier::ErrorClassifier;
use crate::engine::ExecutionEngine;
use crate::error::{exit_codes, Error, Result};
use crate::model::{RecordId, ReferenceDate, RoutineArgs, RoutineCall};
use crate::preflight::{PreflightOptions, PreflightValidator};
use crate::store::{AuditStore, IssuerStore};

/// Progress of a single invocation. A run stops at the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Init,
    PreflightChecked,
    Registered,
    Executed,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub routine: String,
    pub reference_date: ReferenceDate,
    pub force: bool,
    pub remove_from_catalog: bool,
}

/// A clearing routine takes no arguments and is neither catalog- nor
/// idempotency-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearingRequest {
    pub routine: String,
    /// Date the audit record is filed under.
    pub reference_date: ReferenceDate,
}

#[derive(Debug)]
pub struct RunReport {
    /// Last state reached.
    pub state: RunState,
    pub record_id: Option<RecordId>,
    pub result: Result<()>,
}

impl RunReport {
    fn failed(state: RunState, record_id: Option<RecordId>, err: Error) -> Self {
        Self {
            state,
            record_id,
            result: Err(err),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(()) => exit_codes::SUCCESS,
            Err(err) => err.exit_code(),
        }
    }

    pub fn clearing_exit_code(&self) -> u8 {
        match &self.result {
            Ok(()) => exit_codes::SUCCESS,
            Err(err) => err.clearing_exit_code(),
        }
    }
}

fn advance(state: &mut RunState, next: RunState) {
    tracing::debug!(from = ?state, to = ?next, "Run state transition");
    *state = next;
}

/// Sequences preflight, registration, execution and finalization across the
/// issuer and audit stores.
pub struct Orchestrator {
    issuer: Arc<dyn IssuerStore>,
    preflight: PreflightValidator,
    engine: ExecutionEngine,
    classifier: ErrorClassifier,
    audit: AuditLogger,
}

impl Orchestrator {
    pub fn new(issuer: Arc<dyn IssuerStore>, audit: Arc<dyn AuditStore>) -> Self {
        Self::with_classifier(issuer, audit, ErrorClassifier::new())
    }

    pub fn with_classifier(
        issuer: Arc<dyn IssuerStore>,
        audit: Arc<dyn AuditStore>,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            preflight: PreflightValidator::new(issuer.clone(), audit.clone()),
            engine: ExecutionEngine::with_classifier(issuer.clone(), classifier.clone()),
            classifier,
            audit: AuditLogger::new(audit),
            issuer,
        }
    }

    /// Run the routine once for the reference date. Every failure after the
    /// audit record is registered is written to that record before returning.
    pub async fn run_routine(&self, request: &RunRequest) -> RunReport {
        let date = request.reference_date;
        let identity = self.issuer.identity().clone();
        let mut state = RunState::Init;

        tracing::info!(
            routine = %request.routine,
            run_date = %date,
            issuer = %identity,
            "Starting routine execution process"
        );

        let options = PreflightOptions {
            remove_from_catalog: request.remove_from_catalog,
            force: request.force,
        };
        let routine = match self.preflight.run(&request.routine, date, options).await {
            Ok(routine) => routine,
            Err(err) => return RunReport::failed(state, None, err),
        };
        let routine = routine.as_str();
        advance(&mut state, RunState::PreflightChecked);

        tracing::info!(routine, run_date = %date, "Registering new execution");
        let record_id = match self.audit.register_pending(&identity, routine, date).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(routine, error = %err, "Could not register the execution");
                return RunReport::failed(state, None, err.into());
            }
        };
        advance(&mut state, RunState::Registered);

        let call = RoutineCall::new(routine, RoutineArgs::ReferenceDate(date));
        self.execute_and_finalize(&call, record_id, state).await
    }

    /// Run a clearing routine. The attempt is registered before anything is
    /// asked of the issuer, so a routine that cannot be found still leaves a
    /// failed record behind.
    pub async fn run_clearing(&self, request: &ClearingRequest) -> RunReport {
        let date = request.reference_date;
        let identity = self.issuer.identity().clone();
        let requested = request.routine.as_str();
        let mut state = RunState::Init;

        tracing::info!(
            routine = requested,
            issuer = %identity,
            "Starting clearing routine execution process"
        );

        let record_id = match self.audit.register_pending(&identity, requested, date).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(
                    routine = requested,
                    error = %err,
                    "Could not register the execution"
                );
                return RunReport::failed(state, None, err.into());
            }
        };
        advance(&mut state, RunState::Registered);

        tracing::info!(routine = requested, "Checking that the routine exists");
        let failure = match self.issuer.resolve_routine(requested).await {
            Ok(Some(routine)) => {
                let call = RoutineCall::new(routine, RoutineArgs::None);
                return self.execute_and_finalize(&call, record_id, state).await;
            }
            Ok(None) => {
                tracing::error!(
                    routine = requested,
                    database = %identity.database,
                    "Routine not found"
                );
                Error::RoutineNotFound {
                    routine: requested.to_string(),
                    database: identity.database,
                }
            }
            Err(err) => {
                let classified = self.classifier.classify(err, Some(requested));
                tracing::error!(routine = requested, "{}", classified);
                Error::Execution(classified)
            }
        };

        let recorded = match &failure {
            Error::Execution(classified) => self.audit.finalize(record_id, Err(classified)).await,
            other => self.audit.record_failure(record_id, &other.to_string()).await,
        };
        if let Err(err) = recorded {
            tracing::error!(
                record_id = %record_id,
                error = %err,
                "Could not finalize the execution record"
            );
            tracing::error!(record_id = %record_id, "Unrecorded failure: {}", failure);
            return RunReport::failed(state, Some(record_id), err.into());
        }
        advance(&mut state, RunState::Finalized);

        RunReport::failed(state, Some(record_id), failure)
    }

    async fn execute_and_finalize(
        &self,
        call: &RoutineCall,
        record_id: RecordId,
        mut state: RunState,
    ) -> RunReport {
        let routine = call.routine.as_str();
        let outcome = self.engine.invoke(call).await;
        advance(&mut state, RunState::Executed);

        if let Err(err) = self.audit.finalize(record_id, outcome.as_ref().map(|_| ())).await {
            tracing::error!(
                record_id = %record_id,
                error = %err,
                "Could not finalize the execution record"
            );
            if let Err(execution) = &outcome {
                tracing::error!(
                    record_id = %record_id,
                    "Unrecorded execution failure: {}",
                    execution
                );
            }
            return RunReport::failed(state, Some(record_id), err.into());
        }
        advance(&mut state, RunState::Finalized);

        let result = outcome.map_err(Error::Execution);
        match &result {
            Ok(()) => {
                tracing::info!(routine, record_id = %record_id, "Routine executed successfully")
            }
            Err(err) => tracing::error!(routine, record_id = %record_id, "{}", err),
        }

        RunReport {
            state,
            record_id: Some(record_id),
            result,
        }
    }
}
