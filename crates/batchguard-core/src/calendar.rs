use std::sync::Arc;

use crate::error::{CalendarBlock, Error, Result};
use crate::model::{MovementType, ReferenceDate, SubProcessStatus};
use crate::store::IssuerStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Blocked(CalendarBlock),
}

/// Decides whether the issuer's batch for a reference date is complete.
pub struct CalendarGate {
    issuer: Arc<dyn IssuerStore>,
}

impl CalendarGate {
    pub fn new(issuer: Arc<dyn IssuerStore>) -> Self {
        Self { issuer }
    }

    /// Classify the reference date. With `wait_sub_processes`, a business day
    /// whose core batch finished is still blocked while any complementary
    /// process is pending or running.
    pub async fn evaluate(
        &self,
        date: ReferenceDate,
        wait_sub_processes: bool,
    ) -> Result<GateDecision> {
        tracing::info!(run_date = %date, "Reading batch control record");

        let Some(control) = self.issuer.control_record(date).await? else {
            tracing::error!(run_date = %date, "No batch control record for the reference date");
            return Ok(GateDecision::Blocked(CalendarBlock::ControlRecordMissing(date)));
        };

        let completed_at = match control.movement() {
            MovementType::Unknown(raw) => {
                tracing::error!(
                    run_date = %date,
                    movement_type = ?raw,
                    "Could not determine the movement type"
                );
                return Ok(GateDecision::Blocked(CalendarBlock::IndeterminateMovement {
                    date,
                    raw,
                }));
            }
            MovementType::Weekend => {
                tracing::warn!(run_date = %date, "Reference date is a WEEKEND");
                return Ok(GateDecision::Blocked(CalendarBlock::Weekend(date)));
            }
            MovementType::Holiday => {
                tracing::warn!(run_date = %date, "Reference date is a HOLIDAY");
                return Ok(GateDecision::Blocked(CalendarBlock::Holiday(date)));
            }
            MovementType::BusinessDay => match control.completed_at {
                Some(at) => at,
                None => {
                    tracing::error!(
                        run_date = %date,
                        "Batch not yet finished for the reference date"
                    );
                    return Ok(GateDecision::Blocked(CalendarBlock::BatchNotFinished(date)));
                }
            },
        };

        tracing::info!(run_date = %date, completed_at = %completed_at, "Core batch finished");

        if !wait_sub_processes {
            return Ok(GateDecision::Proceed);
        }

        let pending: Vec<SubProcessStatus> = self
            .issuer
            .sub_processes(date)
            .await?
            .into_iter()
            .filter(SubProcessStatus::is_unfinished)
            .collect();

        if pending.is_empty() {
            tracing::info!(run_date = %date, "Complementary batch finished");
            return Ok(GateDecision::Proceed);
        }

        tracing::error!(
            run_date = %date,
            pending = pending.len(),
            "Complementary batch still running or failed"
        );
        for process in &pending {
            tracing::error!(
                process_id = process.process_id,
                routine = process.routine_name.as_deref().unwrap_or("<unknown>"),
                completion_flag = process.completion_flag,
                "Sub-process not finished"
            );
        }

        Ok(GateDecision::Blocked(CalendarBlock::SubProcessesPending { date, pending }))
    }

    /// Like [`evaluate`](Self::evaluate), with any block reported as
    /// [`Error::CalendarNotReady`].
    pub async fn check_ready(&self, date: ReferenceDate, wait_sub_processes: bool) -> Result<()> {
        tracing::info!(
            run_date = %date,
            issuer = %self.issuer.identity(),
            "Starting batch validation process"
        );

        match self.evaluate(date, wait_sub_processes).await? {
            GateDecision::Proceed => {
                tracing::info!(run_date = %date, "Batch ready");
                Ok(())
            }
            GateDecision::Blocked(block) => Err(Error::CalendarNotReady(block)),
        }
    }
}
