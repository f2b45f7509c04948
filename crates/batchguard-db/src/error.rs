use batchguard_core::{ServerFailure, StoreError};
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// The procedure disappeared between the existence check and the call.
    #[error("procedure {0} does not exist")]
    RoutineNotFound(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE for an undefined function or procedure.
const UNDEFINED_FUNCTION: &str = "42883";

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Connection(message) => StoreError::Communication(message),
            Error::Query(message) => StoreError::Driver(message),
            Error::RoutineNotFound(routine) => StoreError::Server(ServerFailure {
                code: UNDEFINED_FUNCTION.to_string(),
                severity: "ERROR".to_string(),
                message: format!("procedure {} does not exist", routine),
                routine: None,
                line: None,
            }),
            Error::Sqlx(err) => from_sqlx(&err),
        }
    }
}

fn from_sqlx(err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.try_downcast_ref::<PgDatabaseError>() {
            Some(pg) => StoreError::Server(server_failure(pg)),
            None => StoreError::Server(ServerFailure {
                code: db_err.code().map(|c| c.into_owned()).unwrap_or_default(),
                severity: "ERROR".to_string(),
                message: db_err.message().to_string(),
                routine: None,
                line: None,
            }),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Communication(err.to_string()),
        sqlx::Error::Configuration(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_) => StoreError::Driver(err.to_string()),
        _ => StoreError::Other(err.to_string()),
    }
}

fn server_failure(pg: &PgDatabaseError) -> ServerFailure {
    let mut message = pg.message().to_string();
    if let Some(detail) = pg.detail() {
        message.push_str(&format!("\nDETAIL: {}", detail));
    }
    if let Some(hint) = pg.hint() {
        message.push_str(&format!("\nHINT: {}", hint));
    }

    let (routine, line) = pg.r#where().map(parse_context).unwrap_or((None, None));

    ServerFailure {
        code: pg.code().to_string(),
        severity: format!("{:?}", pg.severity()).to_uppercase(),
        message,
        routine,
        line,
    }
}

/// Extract the innermost routine and line from a PL/pgSQL error context such
/// as `PL/pgSQL function sync_positions(date) line 14 at RAISE`.
pub(crate) fn parse_context(context: &str) -> (Option<String>, Option<u32>) {
    let Some(frame) = context.lines().find(|l| l.starts_with("PL/pgSQL function ")) else {
        return (None, None);
    };
    let rest = &frame["PL/pgSQL function ".len()..];

    let routine = rest
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.trim_matches('"').to_string());

    let line = rest
        .split_once(" line ")
        .and_then(|(_, tail)| tail.split_whitespace().next())
        .and_then(|n| n.parse().ok());

    (routine, line)
}
