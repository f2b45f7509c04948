//! PostgreSQL issuer store.
//!
//! The issuer owns these tables; this adapter only reads them, except for the
//! catalog removal:
//!
//! ```sql
//! batch_catalog       (routine_name TEXT, process_id INTEGER, execution_order INTEGER)
//! batch_control       (reference_date DATE, completed_at TIMESTAMPTZ, movement_type INTEGER)
//! sub_process_control (process_id INTEGER, reference_date DATE, completion_flag INTEGER)
//! ```
//!
//! `NOTICE` and `WARNING` messages raised by a routine only reach this adapter
//! through a [`NoticeSink`] fed by the tracing layer in [`crate::notice`];
//! without one, invocations report no messages.

use std::time::Duration;

use async_trait::async_trait;
use batchguard_core::model::DeadlockPriority;
use batchguard_core::{
    BatchCatalogEntry, BatchControlRecord, DiagnosticMessage, Invocation, IssuerIdentity,
    IssuerStore, ReferenceDate, RoutineArgs, RoutineCall, StoreResult, SubProcessStatus,
};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use crate::models::{CatalogRow, ControlRow, SubProcessRow};
use crate::notice::NoticeSink;
use crate::Result;

pub const DEFAULT_ROUTINE_SCHEMA: &str = "public";

#[derive(Clone)]
pub struct IssuerDatabase {
    pool: PgPool,
    identity: IssuerIdentity,
    routine_schema: String,
    deadlock_timeout: Option<Duration>,
    notices: Option<NoticeSink>,
}

impl IssuerDatabase {
    pub fn new(pool: PgPool, identity: IssuerIdentity) -> Self {
        Self {
            pool,
            identity,
            routine_schema: DEFAULT_ROUTINE_SCHEMA.to_string(),
            deadlock_timeout: Some(Duration::from_secs(10)),
            notices: None,
        }
    }

    /// Schema searched for routines.
    pub fn with_routine_schema(mut self, schema: impl Into<String>) -> Self {
        self.routine_schema = schema.into();
        self
    }

    /// How long this session waits on a lock before running deadlock
    /// detection when the call asks for high priority. The server default is
    /// one second, so a longer wait makes the other session the victim.
    ///
    /// `deadlock_timeout` can only be set by superusers or roles granted
    /// `SET` on it; `None` skips the step for everyone else.
    pub fn with_deadlock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadlock_timeout = timeout;
        self
    }

    /// Report the notices collected in `sink` as the invocation's messages.
    pub fn with_notice_sink(mut self, sink: NoticeSink) -> Self {
        self.notices = Some(sink);
        self
    }

    /// Quoted, schema-qualified name of the procedure, resolved from the
    /// catalog so it can be spliced into a `CALL`.
    async fn resolve_procedure(
        &self,
        conn: &mut PoolConnection<Postgres>,
        routine: &str,
    ) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT quote_ident(n.nspname) || '.' || quote_ident(p.proname)
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1
              AND lower(p.proname) = lower($2)
              AND p.prokind = 'p'
            ORDER BY (p.proname = $2) DESC
            LIMIT 1
            "#,
        )
        .bind(&self.routine_schema)
        .bind(routine)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(name)
    }

    async fn raise_deadlock_priority(&self, conn: &mut PoolConnection<Postgres>) {
        let Some(timeout) = self.deadlock_timeout else {
            tracing::debug!("Deadlock priority step disabled");
            return;
        };
        let value = timeout_setting(timeout);
        let result = sqlx::query("SELECT set_config('deadlock_timeout', $1, false)")
            .bind(&value)
            .execute(&mut **conn)
            .await;

        if let Err(e) = result {
            tracing::warn!(
                deadlock_timeout = %value,
                error = %e,
                "Could not raise deadlock priority, continuing without it"
            );
        }
    }

    async fn call(&self, call: &RoutineCall) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        if call.priority == DeadlockPriority::High {
            self.raise_deadlock_priority(&mut conn).await;
        }

        let procedure = self
            .resolve_procedure(&mut conn, &call.routine)
            .await?
            .ok_or_else(|| crate::Error::RoutineNotFound(call.routine.clone()))?;

        tracing::debug!(procedure = %procedure, args = ?call.args, "Calling procedure");
        match call.args {
            RoutineArgs::None => {
                sqlx::query(&format!("CALL {}()", procedure))
                    .execute(&mut *conn)
                    .await?;
            }
            RoutineArgs::ReferenceDate(date) => {
                sqlx::query(&format!("CALL {}($1)", procedure))
                    .bind(date.date())
                    .execute(&mut *conn)
                    .await?;
            }
        }

        Ok(())
    }

    async fn delete_and_compact(&self, routine: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query_scalar::<_, i32>(
            "DELETE FROM batch_catalog WHERE routine_name = $1 RETURNING execution_order",
        )
        .bind(routine)
        .fetch_all(&mut *tx)
        .await?;

        if let Some(&order) = removed.iter().min() {
            sqlx::query(
                "UPDATE batch_catalog SET execution_order = execution_order - 1 \
                 WHERE execution_order >= $1",
            )
            .bind(order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed.len() as u64)
    }

    fn collect_messages(&self) -> Vec<DiagnosticMessage> {
        match &self.notices {
            Some(sink) => sink
                .drain()
                .into_iter()
                .map(|notice| notice.into_diagnostic(&self.identity.server))
                .collect(),
            None => Vec::new(),
        }
    }
}

fn timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis())
}

#[async_trait]
impl IssuerStore for IssuerDatabase {
    fn identity(&self) -> &IssuerIdentity {
        &self.identity
    }

    async fn resolve_routine(&self, routine: &str) -> StoreResult<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.proname::text
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1
              AND lower(p.proname) = lower($2)
              AND p.prokind = 'p'
              AND has_function_privilege(p.oid, 'EXECUTE')
            ORDER BY (p.proname = $2) DESC
            LIMIT 1
            "#,
        )
        .bind(&self.routine_schema)
        .bind(routine)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::from)?;

        Ok(name)
    }

    async fn catalog_entry(&self, routine: &str) -> StoreResult<Option<BatchCatalogEntry>> {
        let row = sqlx::query_as::<_, CatalogRow>(
            r#"
            SELECT routine_name, execution_order
            FROM batch_catalog
            WHERE lower(routine_name) = lower($1)
            ORDER BY (routine_name = $1) DESC, execution_order
            LIMIT 1
            "#,
        )
        .bind(routine)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::from)?;

        Ok(row.map(Into::into))
    }

    async fn remove_catalog_entry(&self, entry: &BatchCatalogEntry) -> StoreResult<u64> {
        Ok(self.delete_and_compact(&entry.routine_name).await?)
    }

    async fn catalog(&self) -> StoreResult<Vec<BatchCatalogEntry>> {
        let rows = sqlx::query_as::<_, CatalogRow>(
            "SELECT routine_name, execution_order FROM batch_catalog ORDER BY execution_order",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn control_record(
        &self,
        date: ReferenceDate,
    ) -> StoreResult<Option<BatchControlRecord>> {
        let row = sqlx::query_as::<_, ControlRow>(
            r#"
            SELECT reference_date,
                   completed_at::timestamptz AS completed_at,
                   movement_type::integer AS movement_type
            FROM batch_control
            WHERE reference_date = $1
            "#,
        )
        .bind(date.date())
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::from)?;

        Ok(row.map(Into::into))
    }

    async fn sub_processes(&self, date: ReferenceDate) -> StoreResult<Vec<SubProcessStatus>> {
        let rows = sqlx::query_as::<_, SubProcessRow>(
            r#"
            SELECT sp.process_id::integer AS process_id,
                   bc.routine_name,
                   sp.completion_flag::integer AS completion_flag
            FROM sub_process_control sp
            LEFT JOIN batch_catalog bc ON bc.process_id = sp.process_id
            WHERE sp.reference_date = $1
            ORDER BY sp.process_id
            "#,
        )
        .bind(date.date())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::Error::from)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn invoke_routine(&self, call: &RoutineCall) -> Invocation {
        if let Some(sink) = &self.notices {
            let stale = sink.drain();
            if !stale.is_empty() {
                tracing::debug!(count = stale.len(), "Discarding notices raised before the call");
            }
        }

        let result = self.call(call).await;
        let messages = self.collect_messages();
        match result {
            Ok(()) => Invocation::succeeded(messages),
            Err(e) => Invocation::failed(messages, e.into()),
        }
    }
}
