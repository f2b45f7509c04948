//! Boundaries to the two external stores.
//!
//! The issuer store owns the routines, the batch catalog and the calendar
//! control tables; the audit store owns the execution history. Each is reached
//! through its own connection and commits independently.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    BatchCatalogEntry, BatchControlRecord, DiagnosticMessage, ExecutionRecord, IssuerIdentity,
    NewExecution, RecordId, ReferenceDate, RoutineCall, SubProcessStatus,
};

/// Diagnostics reported by the server alongside a failure raised inside a routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    /// Vendor error code (SQLSTATE for PostgreSQL).
    pub code: String,
    pub severity: String,
    pub message: String,
    /// Routine that raised the failure, when the server reports one.
    pub routine: Option<String>,
    pub line: Option<u32>,
}

/// Raw failure reported by a store adapter, before classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, protocol, TLS or timeout failure.
    #[error("{0}")]
    Communication(String),

    /// Failure raised by the server while running a statement or routine.
    #[error("{}", .0.message)]
    Server(ServerFailure),

    /// Failure inside the driver that never reached the server.
    #[error("{0}")]
    Driver(String),

    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of invoking a routine: the messages the server emitted while it ran,
/// whether or not the call succeeded.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub messages: Vec<DiagnosticMessage>,
    pub result: StoreResult<()>,
}

impl Invocation {
    pub fn succeeded(messages: Vec<DiagnosticMessage>) -> Self {
        Self {
            messages,
            result: Ok(()),
        }
    }

    pub fn failed(messages: Vec<DiagnosticMessage>, error: StoreError) -> Self {
        Self {
            messages,
            result: Err(error),
        }
    }
}

#[async_trait]
pub trait IssuerStore: Send + Sync {
    /// Server and database this store is connected to.
    fn identity(&self) -> &IssuerIdentity;

    /// Name under which the store knows the executable routine matching
    /// `routine` (case-insensitively), or `None` when the session cannot see
    /// or execute one.
    async fn resolve_routine(&self, routine: &str) -> StoreResult<Option<String>>;

    /// Batch service catalog entry for the routine, if scheduled. Names
    /// compare case-insensitively.
    async fn catalog_entry(&self, routine: &str) -> StoreResult<Option<BatchCatalogEntry>>;

    /// Delete the entry and close the gap it leaves in `execution_order`, in
    /// one transaction. Returns the number of entries removed.
    async fn remove_catalog_entry(&self, entry: &BatchCatalogEntry) -> StoreResult<u64>;

    /// Full catalog ordered by `execution_order`.
    async fn catalog(&self) -> StoreResult<Vec<BatchCatalogEntry>>;

    async fn control_record(&self, date: ReferenceDate) -> StoreResult<Option<BatchControlRecord>>;

    async fn sub_processes(&self, date: ReferenceDate) -> StoreResult<Vec<SubProcessStatus>>;

    /// Run the routine, committing on success and rolling back on failure.
    async fn invoke_routine(&self, call: &RoutineCall) -> Invocation;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// All attempts recorded for the (routine, issuer, date) tuple.
    async fn executions_for(
        &self,
        routine: &str,
        issuer: &IssuerIdentity,
        date: ReferenceDate,
    ) -> StoreResult<Vec<ExecutionRecord>>;

    /// Insert a `Registered` row stamped with the store's clock and commit it.
    async fn insert_registered(&self, execution: &NewExecution) -> StoreResult<RecordId>;

    /// Move a `Registered` row to `Succeeded`. Returns rows updated.
    async fn mark_succeeded(&self, id: RecordId) -> StoreResult<u64>;

    /// Move a `Registered` row to `Failed` with the error message. Returns rows updated.
    async fn mark_failed(&self, id: RecordId, error_message: &str) -> StoreResult<u64>;

    async fn execution(&self, id: RecordId) -> StoreResult<Option<ExecutionRecord>>;
}
