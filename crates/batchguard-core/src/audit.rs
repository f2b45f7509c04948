use std::sync::Arc;

use crate::classifier::ClassifiedError;
use crate::model::{IssuerIdentity, NewExecution, RecordId, ReferenceDate};
use crate::store::{AuditStore, StoreResult};

/// Longest error message persisted, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 4000;

/// Writes the attempt's lifecycle to the audit store: a pending row before the
/// routine runs, and its conclusion afterwards.
pub struct AuditLogger {
    audit: Arc<dyn AuditStore>,
}

impl AuditLogger {
    pub fn new(audit: Arc<dyn AuditStore>) -> Self {
        Self { audit }
    }

    /// Insert and commit a `Registered` row. Must complete before the routine
    /// is invoked.
    pub async fn register_pending(
        &self,
        issuer: &IssuerIdentity,
        routine: &str,
        date: ReferenceDate,
    ) -> StoreResult<RecordId> {
        let id = self
            .audit
            .insert_registered(&NewExecution {
                reference_date: date,
                issuer: issuer.clone(),
                routine_name: routine.to_string(),
            })
            .await?;

        tracing::info!(record_id = %id, routine, run_date = %date, "Execution registered");
        Ok(id)
    }

    /// Conclude the record. Zero rows updated means the record vanished or was
    /// already concluded; that is logged but does not change the run's outcome.
    pub async fn finalize(
        &self,
        id: RecordId,
        outcome: Result<(), &ClassifiedError>,
    ) -> StoreResult<u64> {
        match outcome {
            Ok(()) => self.conclude(id, None).await,
            Err(err) => self.conclude(id, Some(&err.message())).await,
        }
    }

    /// Conclude the record as failed for a reason that never reached the
    /// server, such as a routine that could not be found.
    pub async fn record_failure(&self, id: RecordId, message: &str) -> StoreResult<u64> {
        self.conclude(id, Some(message)).await
    }

    async fn conclude(&self, id: RecordId, failure: Option<&str>) -> StoreResult<u64> {
        let updated = match failure {
            None => self.audit.mark_succeeded(id).await?,
            Some(message) => self.audit.mark_failed(id, &sanitize_message(message)).await?,
        };

        if updated == 0 {
            tracing::warn!(
                record_id = %id,
                "No execution record updated, it was removed or already concluded"
            );
        } else {
            tracing::info!(
                record_id = %id,
                succeeded = failure.is_none(),
                "Execution record finalized"
            );
        }

        Ok(updated)
    }
}

/// Strip NUL characters and cap the length on a char boundary. Quoting is left
/// to parameter binding.
pub fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .filter(|c| *c != '\0')
        .take(MAX_ERROR_MESSAGE_CHARS)
        .collect()
}
