//! In-memory issuer and audit stores.
//!
//! They follow the same contracts as the database adapters (dense catalog
//! ordering, single-shot status transitions, store-side clock) and can be told
//! to fail, which makes them suitable for exercising the orchestration paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use crate::model::{
    BatchCatalogEntry, BatchControlRecord, DiagnosticMessage, ExecutionRecord, ExecutionStatus,
    IssuerIdentity, NewExecution, RecordId, ReferenceDate, RoutineCall, SubProcessStatus,
};
use crate::store::{AuditStore, Invocation, IssuerStore, StoreError, StoreResult};

#[derive(Default)]
struct IssuerState {
    routines: HashSet<String>,
    catalog: Vec<BatchCatalogEntry>,
    control: HashMap<ReferenceDate, BatchControlRecord>,
    sub_processes: HashMap<ReferenceDate, Vec<SubProcessStatus>>,
    messages: Vec<DiagnosticMessage>,
    invocation_failure: Option<StoreError>,
    query_failure: Option<StoreError>,
    invocations: Vec<RoutineCall>,
}

pub struct MemoryIssuerStore {
    identity: IssuerIdentity,
    state: Mutex<IssuerState>,
}

impl MemoryIssuerStore {
    pub fn new(identity: IssuerIdentity) -> Self {
        Self {
            identity,
            state: Mutex::new(IssuerState::default()),
        }
    }

    pub async fn add_routine(&self, routine: &str) {
        self.state.lock().await.routines.insert(routine.to_string());
    }

    /// Append a routine to the batch catalog at the next free position.
    pub async fn schedule(&self, routine: &str) -> BatchCatalogEntry {
        let mut state = self.state.lock().await;
        let entry = BatchCatalogEntry {
            routine_name: routine.to_string(),
            execution_order: state.catalog.len() as i32 + 1,
        };
        state.catalog.push(entry.clone());
        entry
    }

    pub async fn set_control(&self, record: BatchControlRecord) {
        self.state
            .lock()
            .await
            .control
            .insert(record.reference_date, record);
    }

    pub async fn add_sub_process(&self, date: ReferenceDate, status: SubProcessStatus) {
        self.state
            .lock()
            .await
            .sub_processes
            .entry(date)
            .or_default()
            .push(status);
    }

    /// Messages emitted by every subsequent invocation.
    pub async fn emit_messages(&self, messages: Vec<DiagnosticMessage>) {
        self.state.lock().await.messages = messages;
    }

    /// Make the next invocation fail with `error`.
    pub async fn fail_next_invocation(&self, error: StoreError) {
        self.state.lock().await.invocation_failure = Some(error);
    }

    /// Make every lookup (routine, catalog, control) fail with `error`.
    pub async fn fail_queries(&self, error: StoreError) {
        self.state.lock().await.query_failure = Some(error);
    }

    pub async fn invocations(&self) -> Vec<RoutineCall> {
        self.state.lock().await.invocations.clone()
    }

    fn check(state: &IssuerState) -> StoreResult<()> {
        match &state.query_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IssuerStore for MemoryIssuerStore {
    fn identity(&self) -> &IssuerIdentity {
        &self.identity
    }

    async fn resolve_routine(&self, routine: &str) -> StoreResult<Option<String>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        if state.routines.contains(routine) {
            return Ok(Some(routine.to_string()));
        }
        Ok(state
            .routines
            .iter()
            .find(|r| r.eq_ignore_ascii_case(routine))
            .cloned())
    }

    async fn catalog_entry(&self, routine: &str) -> StoreResult<Option<BatchCatalogEntry>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state
            .catalog
            .iter()
            .find(|e| e.routine_name.eq_ignore_ascii_case(routine))
            .cloned())
    }

    async fn remove_catalog_entry(&self, entry: &BatchCatalogEntry) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        Self::check(&state)?;

        let before = state.catalog.len();
        state
            .catalog
            .retain(|e| e.routine_name != entry.routine_name);
        let removed = (before - state.catalog.len()) as u64;

        if removed > 0 {
            for e in state
                .catalog
                .iter_mut()
                .filter(|e| e.execution_order >= entry.execution_order)
            {
                e.execution_order -= 1;
            }
        }

        Ok(removed)
    }

    async fn catalog(&self) -> StoreResult<Vec<BatchCatalogEntry>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        let mut entries = state.catalog.clone();
        entries.sort_by_key(|e| e.execution_order);
        Ok(entries)
    }

    async fn control_record(&self, date: ReferenceDate) -> StoreResult<Option<BatchControlRecord>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state.control.get(&date).cloned())
    }

    async fn sub_processes(&self, date: ReferenceDate) -> StoreResult<Vec<SubProcessStatus>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state.sub_processes.get(&date).cloned().unwrap_or_default())
    }

    async fn invoke_routine(&self, call: &RoutineCall) -> Invocation {
        let mut state = self.state.lock().await;
        state.invocations.push(call.clone());
        let messages = state.messages.clone();

        match state.invocation_failure.take() {
            Some(err) => Invocation::failed(messages, err),
            None => Invocation::succeeded(messages),
        }
    }
}

struct AuditState {
    records: Vec<ExecutionRecord>,
    next_id: i64,
    register_failure: Option<StoreError>,
    finalize_failure: Option<StoreError>,
}

pub struct MemoryAuditStore {
    state: Mutex<AuditState>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Identities are handed out from `first_id` upwards.
    pub fn starting_at(first_id: i64) -> Self {
        Self {
            state: Mutex::new(AuditState {
                records: Vec::new(),
                next_id: first_id,
                register_failure: None,
                finalize_failure: None,
            }),
        }
    }

    /// Seed a record as if written by an earlier invocation.
    pub async fn seed(&self, execution: NewExecution, status: ExecutionStatus) -> RecordId {
        let mut state = self.state.lock().await;
        let id = RecordId(state.next_id);
        state.next_id += 1;

        let concluded = status != ExecutionStatus::Registered;
        state.records.push(ExecutionRecord {
            id,
            reference_date: execution.reference_date,
            issuer: execution.issuer,
            routine_name: execution.routine_name,
            started_at: Utc::now(),
            finished_at: concluded.then(Utc::now),
            error_message: (status == ExecutionStatus::Failed)
                .then(|| "seeded failure".to_string()),
            status,
        });
        id
    }

    pub async fn fail_registration(&self, error: StoreError) {
        self.state.lock().await.register_failure = Some(error);
    }

    pub async fn fail_finalization(&self, error: StoreError) {
        self.state.lock().await.finalize_failure = Some(error);
    }

    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.state.lock().await.records.clone()
    }

    async fn transition(
        &self,
        id: RecordId,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.finalize_failure.clone() {
            return Err(err);
        }

        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id && r.status == ExecutionStatus::Registered);

        match record {
            Some(record) => {
                record.status = status;
                record.finished_at = Some(Utc::now());
                record.error_message = error_message.map(str::to_string);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn executions_for(
        &self,
        routine: &str,
        issuer: &IssuerIdentity,
        date: ReferenceDate,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| {
                r.routine_name == routine && &r.issuer == issuer && r.reference_date == date
            })
            .cloned()
            .collect())
    }

    async fn insert_registered(&self, execution: &NewExecution) -> StoreResult<RecordId> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.register_failure.clone() {
            return Err(err);
        }

        let id = RecordId(state.next_id);
        state.next_id += 1;
        state.records.push(ExecutionRecord {
            id,
            reference_date: execution.reference_date,
            issuer: execution.issuer.clone(),
            routine_name: execution.routine_name.clone(),
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            status: ExecutionStatus::Registered,
        });
        Ok(id)
    }

    async fn mark_succeeded(&self, id: RecordId) -> StoreResult<u64> {
        self.transition(id, ExecutionStatus::Succeeded, None).await
    }

    async fn mark_failed(&self, id: RecordId, error_message: &str) -> StoreResult<u64> {
        self.transition(id, ExecutionStatus::Failed, Some(error_message))
            .await
    }

    async fn execution(&self, id: RecordId) -> StoreResult<Option<ExecutionRecord>> {
        let state = self.state.lock().await;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> IssuerIdentity {
        IssuerIdentity::new("10.0.0.5", "issuer_db")
    }

    #[tokio::test]
    async fn test_transition_happens_once() {
        let audit = MemoryAuditStore::new();
        let id = audit
            .insert_registered(&NewExecution {
                reference_date: ReferenceDate::parse("2024-03-01").unwrap(),
                issuer: identity(),
                routine_name: "SYNC_POSITIONS".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(audit.mark_succeeded(id).await.unwrap(), 1);
        assert_eq!(audit.mark_failed(id, "late failure").await.unwrap(), 0);

        let record = audit.execution(id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_resolve_routine_returns_stored_name() {
        let issuer = MemoryIssuerStore::new(identity());
        issuer.add_routine("SYNC_POSITIONS").await;

        assert_eq!(
            issuer.resolve_routine("sync_positions").await.unwrap().as_deref(),
            Some("SYNC_POSITIONS")
        );
        assert!(issuer.resolve_routine("accrue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schedule_keeps_order_dense() {
        let issuer = MemoryIssuerStore::new(identity());
        issuer.schedule("A").await;
        let b = issuer.schedule("B").await;
        assert_eq!(b.execution_order, 2);

        let catalog = issuer.catalog().await.unwrap();
        let orders: Vec<i32> = catalog.iter().map(|e| e.execution_order).collect();
        assert_eq!(orders, vec![1, 2]);
    }
}
