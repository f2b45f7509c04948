use batchguard_core::memory::{MemoryAuditStore, MemoryIssuerStore};
use batchguard_core::{
    BatchControlRecord, CalendarBlock, CalendarGate, ClearingRequest, Error, ErrorClass,
    ExecutionStatus, IssuerIdentity, IssuerStore, NewExecution, Orchestrator, RecordId,
    ReferenceDate, RoutineArgs, RunRequest, RunState, ServerFailure, StoreError,
    SubProcessStatus,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

const ROUTINE: &str = "SYNC_POSITIONS";

fn identity() -> IssuerIdentity {
    IssuerIdentity::new("10.20.0.15", "issuer_prod")
}

fn run_date() -> ReferenceDate {
    ReferenceDate::parse("2024-03-01").unwrap()
}

fn request(force: bool) -> RunRequest {
    RunRequest {
        routine: ROUTINE.to_string(),
        reference_date: run_date(),
        force,
        remove_from_catalog: false,
    }
}

async fn stores(first_id: i64) -> (Arc<MemoryIssuerStore>, Arc<MemoryAuditStore>) {
    let issuer = Arc::new(MemoryIssuerStore::new(identity()));
    issuer.add_routine(ROUTINE).await;
    (issuer, Arc::new(MemoryAuditStore::starting_at(first_id)))
}

async fn seed(audit: &MemoryAuditStore, status: ExecutionStatus) -> RecordId {
    audit
        .seed(
            NewExecution {
                reference_date: run_date(),
                issuer: identity(),
                routine_name: ROUTINE.to_string(),
            },
            status,
        )
        .await
}

#[tokio::test]
async fn test_end_to_end_run_and_rerun() {
    let (issuer, audit) = stores(42).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let first = orchestrator.run_routine(&request(false)).await;
    assert_eq!(first.record_id, Some(RecordId(42)));
    assert_eq!(first.state, RunState::Finalized);
    assert_eq!(first.exit_code(), 0);

    let record = audit.records().await.remove(0);
    assert_eq!(record.id, RecordId(42));
    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert!(record.finished_at.is_some());
    assert!(record.error_message.is_none());
    assert_eq!(record.issuer, identity());

    // Same tuple, no force: blocked without a new registration
    let second = orchestrator.run_routine(&request(false)).await;
    assert!(matches!(second.result, Err(Error::AlreadyExecuted { .. })));
    assert_eq!(second.exit_code(), 101);
    assert!(second.record_id.is_none());
    assert_eq!(audit.records().await.len(), 1);
    assert_eq!(issuer.invocations().await.len(), 1);
}

#[tokio::test]
async fn test_rerun_with_other_casing_is_blocked() {
    let (issuer, audit) = stores(1).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let first = orchestrator.run_routine(&request(false)).await;
    assert_eq!(first.exit_code(), 0);

    let second = orchestrator
        .run_routine(&RunRequest {
            routine: "sync_positions".to_string(),
            ..request(false)
        })
        .await;
    assert_eq!(second.exit_code(), 101);
    assert_eq!(issuer.invocations().await.len(), 1);

    let records = audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].routine_name, ROUTINE);
}

#[tokio::test]
async fn test_catalogued_routine_with_other_casing_is_refused() {
    let (issuer, audit) = stores(1).await;
    issuer.schedule(ROUTINE).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let report = orchestrator
        .run_routine(&RunRequest {
            routine: "sync_positions".to_string(),
            ..request(false)
        })
        .await;
    assert_eq!(report.exit_code(), 100);
    assert!(issuer.invocations().await.is_empty());
    assert!(audit.records().await.is_empty());
}

#[tokio::test]
async fn test_lowercase_request_runs_under_issuer_name() {
    let (issuer, audit) = stores(1).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let report = orchestrator
        .run_routine(&RunRequest {
            routine: "sync_positions".to_string(),
            ..request(false)
        })
        .await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(issuer.invocations().await[0].routine, ROUTINE);
    assert_eq!(audit.records().await[0].routine_name, ROUTINE);
}

#[tokio::test]
async fn test_force_retries_failed_attempt() {
    let (issuer, audit) = stores(1).await;
    let failed = seed(&audit, ExecutionStatus::Failed).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let report = orchestrator.run_routine(&request(true)).await;
    assert_eq!(report.exit_code(), 0);
    assert_ne!(report.record_id, Some(failed));
    assert_eq!(issuer.invocations().await.len(), 1);

    let records = audit.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[1].status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_force_retries_abandoned_attempt() {
    let (issuer, audit) = stores(1).await;
    seed(&audit, ExecutionStatus::Registered).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let blocked = orchestrator.run_routine(&request(false)).await;
    assert_eq!(blocked.exit_code(), 101);

    let forced = orchestrator.run_routine(&request(true)).await;
    assert_eq!(forced.exit_code(), 0);

    // The abandoned row is never rewritten
    let records = audit.records().await;
    assert_eq!(records[0].status, ExecutionStatus::Registered);
    assert_eq!(records[1].status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_force_never_reruns_success() {
    let (issuer, audit) = stores(1).await;
    seed(&audit, ExecutionStatus::Succeeded).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let report = orchestrator.run_routine(&request(true)).await;
    assert_eq!(report.exit_code(), 101);
    assert!(issuer.invocations().await.is_empty());
}

#[tokio::test]
async fn test_catalog_removal_compacts_order() {
    let (issuer, audit) = stores(1).await;
    let names = ["OPEN_DAY", "LOAD_RATES", ROUTINE, "ACCRUE", "CLOSE_DAY"];
    for name in names {
        issuer.schedule(name).await;
    }
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());

    let report = orchestrator
        .run_routine(&RunRequest {
            remove_from_catalog: true,
            ..request(false)
        })
        .await;
    assert_eq!(report.exit_code(), 0);

    let catalog = issuer.catalog().await.unwrap();
    let layout: Vec<(&str, i32)> = catalog
        .iter()
        .map(|e| (e.routine_name.as_str(), e.execution_order))
        .collect();
    assert_eq!(
        layout,
        vec![("OPEN_DAY", 1), ("LOAD_RATES", 2), ("ACCRUE", 3), ("CLOSE_DAY", 4)]
    );
}

#[tokio::test]
async fn test_execution_failure_message_is_preserved() {
    let (issuer, audit) = stores(7).await;
    let raw = "new row for relation \"positions\" violates check constraint \"qty_positive\"";
    issuer
        .fail_next_invocation(StoreError::Server(ServerFailure {
            code: "23514".to_string(),
            severity: "ERROR".to_string(),
            message: raw.to_string(),
            routine: Some("sync_positions".to_string()),
            line: Some(88),
        }))
        .await;
    let orchestrator = Orchestrator::new(issuer, audit.clone());

    let report = orchestrator.run_routine(&request(false)).await;
    match &report.result {
        Err(Error::Execution(err)) => assert_eq!(err.class, ErrorClass::Integrity),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(report.exit_code(), 203);

    let record = audit.records().await.remove(0);
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.finished_at.is_some());
    let message = record.error_message.unwrap();
    assert!(message.starts_with(raw));
    assert!(message.ends_with(
        "IntegrityError: server message 23514, severity ERROR, routine sync_positions, line 88"
    ));
}

#[tokio::test]
async fn test_lost_connection_during_execution() {
    let (issuer, audit) = stores(1).await;
    issuer
        .fail_next_invocation(StoreError::Communication(
            "server closed the connection unexpectedly".into(),
        ))
        .await;
    let orchestrator = Orchestrator::new(issuer, audit.clone());

    let report = orchestrator.run_routine(&request(false)).await;
    assert!(matches!(
        report.result,
        Err(Error::Execution(ref e)) if e.class == ErrorClass::DatabaseCommunication
    ));

    let record = audit.records().await.remove(0);
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_readiness_gate() {
    let (issuer, _) = stores(1).await;
    let gate = CalendarGate::new(issuer.clone());

    let missing = gate.check_ready(run_date(), false).await.unwrap_err();
    assert_eq!(missing.exit_code(), 103);

    issuer
        .set_control(BatchControlRecord {
            reference_date: run_date(),
            completed_at: Some(Utc.with_ymd_and_hms(2024, 3, 2, 3, 15, 0).unwrap()),
            movement_type: Some(1),
        })
        .await;
    issuer
        .add_sub_process(
            run_date(),
            SubProcessStatus {
                process_id: 31,
                routine_name: None,
                completion_flag: 0,
            },
        )
        .await;

    assert!(gate.check_ready(run_date(), false).await.is_ok());

    let blocked = gate.check_ready(run_date(), true).await.unwrap_err();
    assert!(matches!(
        blocked,
        Error::CalendarNotReady(CalendarBlock::SubProcessesPending { ref pending, .. })
            if pending.len() == 1
    ));
    assert_eq!(blocked.exit_code(), 100);
}

#[tokio::test]
async fn test_clearing_registers_before_lookup() {
    let (issuer, audit) = stores(500).await;
    let orchestrator = Orchestrator::new(issuer.clone(), audit.clone());
    let request = |routine: &str| ClearingRequest {
        routine: routine.to_string(),
        reference_date: run_date(),
    };

    let missing = orchestrator.run_clearing(&request("CLEAR_TRADES")).await;
    assert_eq!(missing.record_id, Some(RecordId(500)));
    assert_eq!(missing.clearing_exit_code(), 201);

    issuer.add_routine("CLEAR_TRADES").await;
    // clearing runs are not idempotency-checked
    for expected in [RecordId(501), RecordId(502)] {
        let report = orchestrator.run_clearing(&request("CLEAR_TRADES")).await;
        assert_eq!(report.record_id, Some(expected));
        assert_eq!(report.clearing_exit_code(), 0);
    }

    let statuses: Vec<ExecutionStatus> = audit.records().await.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ExecutionStatus::Failed,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Succeeded
        ]
    );
    let invocations = issuer.invocations().await;
    assert_eq!(invocations.len(), 2);
    assert!(invocations.iter().all(|c| c.args == RoutineArgs::None));
}
