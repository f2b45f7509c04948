pub mod audit;
pub mod calendar;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod params;
pub mod preflight;
pub mod store;

// Re-exports
pub use audit::AuditLogger;
pub use calendar::{CalendarGate, GateDecision};
pub use classifier::{ClassifiedError, ErrorClass, ErrorClassifier};
pub use engine::ExecutionEngine;
pub use error::{exit_codes, CalendarBlock, Error, ParameterError, Result};
pub use model::{
    BatchCatalogEntry, BatchControlRecord, DiagnosticMessage, ExecutionRecord, ExecutionStatus,
    IssuerIdentity, MovementType, NewExecution, RecordId, ReferenceDate, RoutineArgs, RoutineCall,
    SubProcessStatus,
};
pub use orchestrator::{ClearingRequest, Orchestrator, RunReport, RunRequest, RunState};
pub use preflight::{PreflightOptions, PreflightValidator};
pub use store::{AuditStore, Invocation, IssuerStore, ServerFailure, StoreError, StoreResult};
