//! Validation of caller-supplied values, done before any connection opens.

use chrono::NaiveDate;

use crate::error::ParameterError;
use crate::model::ReferenceDate;

/// Credentials and location of one store.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Issuer,
    Audit,
}

impl StoreRole {
    /// Flag names for server, database and user.
    fn flags(self) -> [&'static str; 3] {
        match self {
            StoreRole::Issuer => ["--issuer-server", "--issuer-database", "--issuer-user"],
            StoreRole::Audit => ["--audit-server", "--audit-database", "--audit-user"],
        }
    }
}

impl ConnectionParams {
    /// Server, database and user must be non-blank. The password may be empty
    /// for trusted authentication.
    pub fn validate(&self, role: StoreRole) -> Result<(), ParameterError> {
        let [server, database, user] = role.flags();
        require(&self.server, server)?;
        require(&self.database, database)?;
        require(&self.user, user)
    }
}

pub fn require(value: &str, flag: &'static str) -> Result<(), ParameterError> {
    if value.trim().is_empty() {
        return Err(ParameterError::Empty { flag });
    }
    Ok(())
}

/// Resolve the reference date. A missing or blank value means the day before
/// `today`.
pub fn resolve_run_date(
    value: Option<&str>,
    today: NaiveDate,
) -> Result<ReferenceDate, ParameterError> {
    match value.map(str::trim) {
        None | Some("") => Ok(ReferenceDate::previous_day(today)),
        Some(raw) => ReferenceDate::parse(raw).ok_or_else(|| ParameterError::InvalidDate {
            value: raw.to_string(),
        }),
    }
}
