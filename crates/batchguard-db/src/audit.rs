use async_trait::async_trait;
use batchguard_core::{
    AuditStore, ExecutionRecord, ExecutionStatus, IssuerIdentity, NewExecution, RecordId,
    ReferenceDate, StoreResult,
};
use sqlx::PgPool;

use crate::models::ExecutionRow;
use crate::{Error, Result};

/// PostgreSQL audit store backed by the `execution_history` table.
#[derive(Clone)]
pub struct AuditDatabase {
    pool: PgPool,
}

impl AuditDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id BIGSERIAL PRIMARY KEY,
                reference_date DATE NOT NULL,
                issuer_database VARCHAR(128) NOT NULL,
                server_address VARCHAR(255) NOT NULL,
                routine_name VARCHAR(255) NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                error_message TEXT,
                status SMALLINT NOT NULL CHECK (status IN (1, 2, 3))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_history_lookup
            ON execution_history (routine_name, server_address, issuer_database, reference_date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Audit schema initialized");
        Ok(())
    }

    async fn conclude(
        &self,
        id: RecordId,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE execution_history
            SET status = $2, finished_at = clock_timestamp(), error_message = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id.0)
        .bind(status.code())
        .bind(error_message)
        .bind(ExecutionStatus::Registered.code())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for AuditDatabase {
    async fn executions_for(
        &self,
        routine: &str,
        issuer: &IssuerIdentity,
        date: ReferenceDate,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT * FROM execution_history
            WHERE routine_name = $1
              AND server_address = $2
              AND issuer_database = $3
              AND reference_date = $4
            ORDER BY id
            "#,
        )
        .bind(routine)
        .bind(&issuer.server)
        .bind(&issuer.database)
        .bind(date.date())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;

        let records = rows
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn insert_registered(&self, execution: &NewExecution) -> StoreResult<RecordId> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO execution_history
                (reference_date, issuer_database, server_address, routine_name, started_at, status)
            VALUES ($1, $2, $3, $4, clock_timestamp(), $5)
            RETURNING id
            "#,
        )
        .bind(execution.reference_date.date())
        .bind(&execution.issuer.database)
        .bind(&execution.issuer.server)
        .bind(&execution.routine_name)
        .bind(ExecutionStatus::Registered.code())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(RecordId(id))
    }

    async fn mark_succeeded(&self, id: RecordId) -> StoreResult<u64> {
        Ok(self.conclude(id, ExecutionStatus::Succeeded, None).await?)
    }

    async fn mark_failed(&self, id: RecordId, error_message: &str) -> StoreResult<u64> {
        Ok(self
            .conclude(id, ExecutionStatus::Failed, Some(error_message))
            .await?)
    }

    async fn execution(&self, id: RecordId) -> StoreResult<Option<ExecutionRecord>> {
        let row = sqlx::query_as::<_, ExecutionRow>("SELECT * FROM execution_history WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?;

        Ok(row.map(ExecutionRecord::try_from).transpose()?)
    }
}
