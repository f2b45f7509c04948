use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity assigned by the audit store when an attempt is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Business date a run applies to, independent of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceDate(pub NaiveDate);

impl ReferenceDate {
    pub const FORMAT: &'static str = "%Y-%m-%d";

    /// Parse a strict `YYYY-MM-DD` date.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        // chrono accepts unpadded fields, the CLI contract does not
        if value.len() != 10 {
            return None;
        }
        NaiveDate::parse_from_str(value, Self::FORMAT).ok().map(Self)
    }

    /// The day before `today`.
    pub fn previous_day(today: NaiveDate) -> Self {
        Self(today - Duration::days(1))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for ReferenceDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

/// (server address, database name) pair identifying the target system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuerIdentity {
    pub server: String,
    pub database: String,
}

impl IssuerIdentity {
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
        }
    }
}

impl fmt::Display for IssuerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ExecutionStatus {
    Registered = 1,
    Succeeded = 2,
    Failed = 3,
}

impl ExecutionStatus {
    pub fn code(self) -> i16 {
        self as i16
    }
}

impl TryFrom<i16> for ExecutionStatus {
    type Error = i16;

    fn try_from(value: i16) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(ExecutionStatus::Registered),
            2 => Ok(ExecutionStatus::Succeeded),
            3 => Ok(ExecutionStatus::Failed),
            other => Err(other),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Registered => write!(f, "registered"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row per invocation attempt in the audit store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: RecordId,
    pub reference_date: ReferenceDate,
    pub issuer: IssuerIdentity,
    pub routine_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub status: ExecutionStatus,
}

/// Values supplied when registering a new attempt. Timestamps come from the
/// audit store's clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExecution {
    pub reference_date: ReferenceDate,
    pub issuer: IssuerIdentity,
    pub routine_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    Weekend,
    BusinessDay,
    Holiday,
    /// The control table held something outside the known range.
    Unknown(Option<i32>),
}

impl MovementType {
    pub fn from_raw(raw: Option<i32>) -> Self {
        match raw {
            Some(0) => MovementType::Weekend,
            Some(1) => MovementType::BusinessDay,
            Some(2) => MovementType::Holiday,
            other => MovementType::Unknown(other),
        }
    }
}

/// Control-table row for a reference date, read from the issuer store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchControlRecord {
    pub reference_date: ReferenceDate,
    pub completed_at: Option<DateTime<Utc>>,
    pub movement_type: Option<i32>,
}

impl BatchControlRecord {
    pub fn movement(&self) -> MovementType {
        MovementType::from_raw(self.movement_type)
    }
}

/// A routine scheduled by the external batch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCatalogEntry {
    pub routine_name: String,
    pub execution_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProcessStatus {
    pub process_id: i32,
    pub routine_name: Option<String>,
    pub completion_flag: i32,
}

impl SubProcessStatus {
    pub const PENDING: i32 = 0;
    pub const RUNNING: i32 = 1;

    pub fn is_unfinished(&self) -> bool {
        matches!(self.completion_flag, Self::PENDING | Self::RUNNING)
    }
}

/// Arguments passed to the remote routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineArgs {
    None,
    ReferenceDate(ReferenceDate),
}

/// Lock-contention preference requested for the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlockPriority {
    Normal,
    /// Ordinary contenders should be chosen as the deadlock victim first.
    #[default]
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineCall {
    pub routine: String,
    pub args: RoutineArgs,
    pub priority: DeadlockPriority,
}

impl RoutineCall {
    pub fn new(routine: impl Into<String>, args: RoutineArgs) -> Self {
        Self {
            routine: routine.into(),
            args,
            priority: DeadlockPriority::High,
        }
    }
}

/// Non-fatal message emitted by the issuer while a routine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub server: String,
    pub severity: String,
    pub state: String,
    pub routine: Option<String>,
    pub line: Option<u32>,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_date_parse_is_strict() {
        assert_eq!(
            ReferenceDate::parse("2024-03-01"),
            Some(ReferenceDate(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        assert!(ReferenceDate::parse("2024-3-1").is_none());
        assert!(ReferenceDate::parse("01/03/2024").is_none());
        assert!(ReferenceDate::parse("2024-02-30").is_none());
        assert!(ReferenceDate::parse("").is_none());
    }

    #[test]
    fn test_previous_day_crosses_month() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(ReferenceDate::previous_day(today).to_string(), "2024-02-29");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ExecutionStatus::Registered.code(), 1);
        assert_eq!(ExecutionStatus::Succeeded.code(), 2);
        assert_eq!(ExecutionStatus::Failed.code(), 3);
        assert_eq!(ExecutionStatus::try_from(2), Ok(ExecutionStatus::Succeeded));
        assert_eq!(ExecutionStatus::try_from(7), Err(7));
    }

    #[test]
    fn test_movement_type_from_raw() {
        assert_eq!(MovementType::from_raw(Some(0)), MovementType::Weekend);
        assert_eq!(MovementType::from_raw(Some(1)), MovementType::BusinessDay);
        assert_eq!(MovementType::from_raw(Some(2)), MovementType::Holiday);
        assert_eq!(MovementType::from_raw(Some(5)), MovementType::Unknown(Some(5)));
        assert_eq!(MovementType::from_raw(None), MovementType::Unknown(None));
    }

    #[test]
    fn test_sub_process_unfinished() {
        let mut status = SubProcessStatus {
            process_id: 7,
            routine_name: Some("LOAD_RATES".to_string()),
            completion_flag: SubProcessStatus::RUNNING,
        };
        assert!(status.is_unfinished());
        status.completion_flag = 2;
        assert!(!status.is_unfinished());
        status.completion_flag = 9;
        assert!(!status.is_unfinished());
    }
}
