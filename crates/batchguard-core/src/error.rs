use thiserror::Error;

use crate::classifier::ClassifiedError;
use crate::model::{ReferenceDate, SubProcessStatus};
use crate::store::StoreError;

/// Process exit codes. These values are consumed by the calling scheduler and
/// must never be renumbered.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;

    // execute
    pub const ROUTINE_IN_BATCH_CATALOG: u8 = 100;
    pub const ROUTINE_ALREADY_EXECUTED: u8 = 101;

    // validate-batch
    pub const BATCH_NOT_FINISHED: u8 = 100;
    pub const BATCH_WEEKEND: u8 = 101;
    pub const BATCH_HOLIDAY: u8 = 102;
    pub const BATCH_CONTROL_MISSING: u8 = 103;
    pub const BATCH_MOVEMENT_INDETERMINATE: u8 = 104;

    pub const PARAM_RUN_DATE_INVALID: u8 = 201;
    pub const PARAM_REQUIRED_EMPTY: u8 = 202;
    pub const DATABASE_ERROR: u8 = 203;
    pub const ROUTINE_NOT_FOUND: u8 = 204;

    // execute-clearing
    pub const CLEARING_PARAMETER_ERROR: u8 = 100;
    pub const CLEARING_DATABASE_ERROR: u8 = 200;
    pub const CLEARING_ROUTINE_ERROR: u8 = 201;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("parameter {flag} is empty")]
    Empty { flag: &'static str },

    #[error("reference date '{value}' is invalid, expected YYYY-MM-DD")]
    InvalidDate { value: String },
}

/// Reason the calendar gate refused to let a run proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarBlock {
    #[error("reference date {0} is a weekend")]
    Weekend(ReferenceDate),

    #[error("reference date {0} is a holiday")]
    Holiday(ReferenceDate),

    #[error("batch not yet finished for reference date {0}")]
    BatchNotFinished(ReferenceDate),

    #[error(
        "{} complementary batch process(es) still pending or running for reference date {date}",
        .pending.len()
    )]
    SubProcessesPending {
        date: ReferenceDate,
        pending: Vec<SubProcessStatus>,
    },

    #[error("no batch control record for reference date {0}")]
    ControlRecordMissing(ReferenceDate),

    #[error("movement type {raw:?} for reference date {date} is indeterminate")]
    IndeterminateMovement {
        date: ReferenceDate,
        raw: Option<i32>,
    },
}

impl CalendarBlock {
    /// Weekends and holidays are expected outcomes rather than faults.
    pub fn is_non_business_day(&self) -> bool {
        matches!(self, CalendarBlock::Weekend(_) | CalendarBlock::Holiday(_))
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            CalendarBlock::Weekend(_) => exit_codes::BATCH_WEEKEND,
            CalendarBlock::Holiday(_) => exit_codes::BATCH_HOLIDAY,
            CalendarBlock::BatchNotFinished(_) | CalendarBlock::SubProcessesPending { .. } => {
                exit_codes::BATCH_NOT_FINISHED
            }
            CalendarBlock::ControlRecordMissing(_) => exit_codes::BATCH_CONTROL_MISSING,
            CalendarBlock::IndeterminateMovement { .. } => {
                exit_codes::BATCH_MOVEMENT_INDETERMINATE
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter: {0}")]
    Parameter(#[from] ParameterError),

    #[error(
        "Routine '{routine}' not found in database '{database}' or not executable by this user"
    )]
    RoutineNotFound { routine: String, database: String },

    #[error("Routine '{0}' is registered in the batch service catalog")]
    AlreadyScheduled(String),

    #[error("Routine '{routine}' already has an execution for reference date {reference_date}")]
    AlreadyExecuted {
        routine: String,
        reference_date: ReferenceDate,
    },

    #[error("Calendar not ready: {0}")]
    CalendarNotReady(CalendarBlock),

    #[error("Database communication error: {0}")]
    DatabaseCommunication(String),

    #[error("Routine execution failed: {0}")]
    Execution(ClassifiedError),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Parameter(ParameterError::InvalidDate { .. }) => {
                exit_codes::PARAM_RUN_DATE_INVALID
            }
            Error::Parameter(_) => exit_codes::PARAM_REQUIRED_EMPTY,
            Error::RoutineNotFound { .. } => exit_codes::ROUTINE_NOT_FOUND,
            Error::AlreadyScheduled(_) => exit_codes::ROUTINE_IN_BATCH_CATALOG,
            Error::AlreadyExecuted { .. } => exit_codes::ROUTINE_ALREADY_EXECUTED,
            Error::CalendarNotReady(block) => block.exit_code(),
            Error::DatabaseCommunication(_) | Error::Execution(_) => exit_codes::DATABASE_ERROR,
        }
    }

    /// Exit code for `execute-clearing`, which reports parameter, audit
    /// store and routine failures on their own scale.
    pub fn clearing_exit_code(&self) -> u8 {
        match self {
            Error::Parameter(_) => exit_codes::CLEARING_PARAMETER_ERROR,
            Error::DatabaseCommunication(_) => exit_codes::CLEARING_DATABASE_ERROR,
            _ => exit_codes::CLEARING_ROUTINE_ERROR,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::DatabaseCommunication(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
