use batchguard_core::{
    BatchCatalogEntry, BatchControlRecord, ExecutionRecord, ExecutionStatus, IssuerIdentity,
    RecordId, ReferenceDate, SubProcessStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

use crate::{Error, Result};

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRow {
    pub id: i64,
    pub reference_date: NaiveDate,
    pub issuer_database: String,
    pub server_address: String,
    pub routine_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub status: i16,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = Error;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let status = ExecutionStatus::try_from(row.status).map_err(|code| {
            Error::Query(format!("execution {} has unknown status {}", row.id, code))
        })?;

        Ok(ExecutionRecord {
            id: RecordId(row.id),
            reference_date: ReferenceDate(row.reference_date),
            issuer: IssuerIdentity::new(row.server_address, row.issuer_database),
            routine_name: row.routine_name,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error_message: row.error_message,
            status,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CatalogRow {
    pub routine_name: String,
    pub execution_order: i32,
}

impl From<CatalogRow> for BatchCatalogEntry {
    fn from(row: CatalogRow) -> Self {
        BatchCatalogEntry {
            routine_name: row.routine_name,
            execution_order: row.execution_order,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ControlRow {
    pub reference_date: NaiveDate,
    pub completed_at: Option<DateTime<Utc>>,
    pub movement_type: Option<i32>,
}

impl From<ControlRow> for BatchControlRecord {
    fn from(row: ControlRow) -> Self {
        BatchControlRecord {
            reference_date: ReferenceDate(row.reference_date),
            completed_at: row.completed_at,
            movement_type: row.movement_type,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubProcessRow {
    pub process_id: i32,
    pub routine_name: Option<String>,
    pub completion_flag: i32,
}

impl From<SubProcessRow> for SubProcessStatus {
    fn from(row: SubProcessRow) -> Self {
        SubProcessStatus {
            process_id: row.process_id,
            routine_name: row.routine_name,
            completion_flag: row.completion_flag,
        }
    }
}
