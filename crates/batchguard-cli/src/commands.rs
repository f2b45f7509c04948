use chrono::Local;
use std::sync::Arc;

use crate::cli::Commands;
use crate::settings::Settings;
use batchguard_core::params::{self, ConnectionParams, StoreRole};
use batchguard_core::{
    AuditStore, CalendarGate, ClearingRequest, Error, IssuerIdentity, IssuerStore, Orchestrator,
    ReferenceDate, Result, RunReport, RunRequest, StoreError,
};
use batchguard_db::{AuditDatabase, IssuerDatabase, NoticeSink};

fn store_failure(err: batchguard_db::Error) -> Error {
    Error::from(StoreError::from(err))
}

/// Shared state for the command being run.
pub struct Context<'a> {
    pub settings: &'a Settings,
    pub notices: NoticeSink,
}

impl Context<'_> {
    async fn open_issuer(&self, params: &ConnectionParams) -> Result<Arc<dyn IssuerStore>> {
        let pool = batchguard_db::connect(params, &self.settings.connection())
            .await
            .map_err(store_failure)?;
        let identity = IssuerIdentity::new(params.server.as_str(), params.database.as_str());

        Ok(Arc::new(
            IssuerDatabase::new(pool, identity)
                .with_routine_schema(self.settings.routine_schema.as_str())
                .with_deadlock_timeout(self.settings.deadlock_timeout())
                .with_notice_sink(self.notices.clone()),
        ))
    }

    async fn open_audit(&self, params: &ConnectionParams) -> Result<AuditDatabase> {
        let pool = batchguard_db::connect(params, &self.settings.connection())
            .await
            .map_err(store_failure)?;
        Ok(AuditDatabase::new(pool))
    }

    async fn orchestrator(
        &self,
        issuer: &ConnectionParams,
        audit: &ConnectionParams,
    ) -> Result<Orchestrator> {
        let issuer_store = self.open_issuer(issuer).await?;
        let audit_store: Arc<dyn AuditStore> = Arc::new(self.open_audit(audit).await?);
        Ok(Orchestrator::new(issuer_store, audit_store))
    }
}

fn today() -> chrono::NaiveDate {
    Local::now().date_naive()
}

fn report_outcome(report: RunReport) -> Result<()> {
    if let Some(id) = report.record_id {
        println!("  Execution record: {}", id);
    }
    report.result?;
    println!("✓ Routine executed successfully");
    Ok(())
}

pub async fn execute(command: &Commands, context: &Context<'_>) -> Result<()> {
    match command {
        Commands::Execute {
            issuer,
            audit,
            issuer_routine,
            run_date,
            force_execution,
            remove_from_batch,
        } => {
            let issuer = ConnectionParams::from(issuer.clone());
            let audit = ConnectionParams::from(audit.clone());
            issuer.validate(StoreRole::Issuer)?;
            audit.validate(StoreRole::Audit)?;
            params::require(issuer_routine, "--issuer-routine")?;
            let reference_date = params::resolve_run_date(run_date.as_deref(), today())?;

            println!("Running {} for {}...", issuer_routine.trim(), reference_date);
            let report = context
                .orchestrator(&issuer, &audit)
                .await?
                .run_routine(&RunRequest {
                    routine: issuer_routine.trim().to_string(),
                    reference_date,
                    force: *force_execution,
                    remove_from_catalog: *remove_from_batch,
                })
                .await;
            report_outcome(report)?;
        }

        Commands::ExecuteClearing {
            issuer,
            audit,
            issuer_routine,
        } => {
            let issuer = ConnectionParams::from(issuer.clone());
            let audit = ConnectionParams::from(audit.clone());
            issuer.validate(StoreRole::Issuer)?;
            audit.validate(StoreRole::Audit)?;
            params::require(issuer_routine, "--issuer-routine")?;

            println!("Running clearing routine {}...", issuer_routine.trim());
            let report = context
                .orchestrator(&issuer, &audit)
                .await?
                .run_clearing(&ClearingRequest {
                    routine: issuer_routine.trim().to_string(),
                    reference_date: ReferenceDate(today()),
                })
                .await;
            report_outcome(report)?;
        }

        Commands::ValidateBatch {
            issuer,
            run_date,
            wait_batch_complement,
        } => {
            let issuer = ConnectionParams::from(issuer.clone());
            issuer.validate(StoreRole::Issuer)?;
            let reference_date = params::resolve_run_date(run_date.as_deref(), today())?;

            println!("Validating batch for {}...", reference_date);
            let issuer_store = context.open_issuer(&issuer).await?;

            CalendarGate::new(issuer_store)
                .check_ready(reference_date, *wait_batch_complement)
                .await?;
            println!("✓ Batch finished for {}", reference_date);
        }

        Commands::InitAuditSchema { audit } => {
            let audit = ConnectionParams::from(audit.clone());
            audit.validate(StoreRole::Audit)?;

            println!("Initializing audit schema on {}/{}...", audit.server, audit.database);
            context
                .open_audit(&audit)
                .await?
                .init_schema()
                .await
                .map_err(store_failure)?;
            println!("✓ Audit schema ready");
        }
    }

    Ok(())
}
