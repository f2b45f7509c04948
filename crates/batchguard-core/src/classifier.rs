//! Maps raw store failures onto the execution error taxonomy.
//!
//! Vendor codes live in [`DEFAULT_MAPPINGS`] rather than in control flow. New
//! codes are added to the table (bumping [`CLASSIFICATION_TABLE_VERSION`]) or
//! passed to [`ErrorClassifier::with_mappings`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::{ServerFailure, StoreError};

pub const CLASSIFICATION_TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    DatabaseCommunication,
    Programming,
    Integrity,
    Operational,
    Internal,
    GenericDatabase,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::DatabaseCommunication => write!(f, "DatabaseCommunicationError"),
            ErrorClass::Programming => write!(f, "ProgrammingError"),
            ErrorClass::Integrity => write!(f, "IntegrityError"),
            ErrorClass::Operational => write!(f, "OperationalError"),
            ErrorClass::Internal => write!(f, "InternalError"),
            ErrorClass::GenericDatabase => write!(f, "GenericDatabaseError"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeMapping {
    pub code: &'static str,
    pub class: ErrorClass,
    pub description: &'static str,
}

const fn mapping(code: &'static str, class: ErrorClass, description: &'static str) -> CodeMapping {
    CodeMapping {
        code,
        class,
        description,
    }
}

/// PostgreSQL SQLSTATE codes with a class other than `Operational`.
pub const DEFAULT_MAPPINGS: &[CodeMapping] = &[
    // connection lost or cancelled by the server
    mapping("08000", ErrorClass::DatabaseCommunication, "connection exception"),
    mapping("08003", ErrorClass::DatabaseCommunication, "connection does not exist"),
    mapping("08006", ErrorClass::DatabaseCommunication, "connection failure"),
    mapping("57014", ErrorClass::DatabaseCommunication, "statement timeout"),
    mapping("57P01", ErrorClass::DatabaseCommunication, "admin shutdown"),
    // object, column or routine not found, or malformed call
    mapping("42601", ErrorClass::Programming, "syntax error"),
    mapping("42703", ErrorClass::Programming, "undefined column"),
    mapping("42P01", ErrorClass::Programming, "undefined table"),
    mapping("42883", ErrorClass::Programming, "undefined function"),
    mapping("42702", ErrorClass::Programming, "ambiguous column"),
    // constraint and uniqueness violations
    mapping("23502", ErrorClass::Integrity, "not null violation"),
    mapping("23503", ErrorClass::Integrity, "foreign key violation"),
    mapping("23505", ErrorClass::Integrity, "unique violation"),
    mapping("23514", ErrorClass::Integrity, "check violation"),
];

/// A classified execution failure. The enriched [`message`](Self::message) is
/// what gets written to the audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    /// Diagnostic text exactly as reported.
    pub original: String,
    pub code: Option<String>,
    pub severity: Option<String>,
    pub routine: Option<String>,
    pub line: Option<u32>,
    pub summary: String,
}

impl ClassifiedError {
    pub fn message(&self) -> String {
        format!("{}\n{}", self.original, self.summary)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ClassifiedError {}

#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    mappings: Vec<CodeMapping>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            mappings: DEFAULT_MAPPINGS.to_vec(),
        }
    }

    /// Add mappings on top of the defaults. Later entries win.
    pub fn with_mappings(mut self, mappings: impl IntoIterator<Item = CodeMapping>) -> Self {
        self.mappings.extend(mappings);
        self
    }

    /// Class for a routine-raised failure with the given vendor code.
    pub fn class_for_code(&self, code: &str) -> ErrorClass {
        self.mappings
            .iter()
            .rev()
            .find(|m| m.code.eq_ignore_ascii_case(code))
            .map(|m| m.class)
            .unwrap_or(ErrorClass::Operational)
    }

    /// Classify a failure. `routine` is the invoked routine, used when the
    /// server does not name the one that raised.
    pub fn classify(&self, failure: StoreError, routine: Option<&str>) -> ClassifiedError {
        match failure {
            StoreError::Server(server) => self.classify_server(server, routine),
            StoreError::Communication(text) => {
                non_server(ErrorClass::DatabaseCommunication, text, routine)
            }
            StoreError::Driver(text) => non_server(ErrorClass::Internal, text, routine),
            StoreError::Other(text) => non_server(ErrorClass::GenericDatabase, text, routine),
        }
    }

    fn classify_server(&self, failure: ServerFailure, invoked: Option<&str>) -> ClassifiedError {
        let class = self.class_for_code(&failure.code);
        let routine = failure.routine.or_else(|| invoked.map(str::to_string));

        let mut summary = format!(
            "{}: server message {}, severity {}",
            class, failure.code, failure.severity
        );
        if let Some(name) = &routine {
            summary.push_str(&format!(", routine {}", name));
        }
        if let Some(line) = failure.line {
            summary.push_str(&format!(", line {}", line));
        }

        ClassifiedError {
            class,
            original: failure.message,
            code: Some(failure.code),
            severity: Some(failure.severity),
            routine,
            line: failure.line,
            summary,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn non_server(class: ErrorClass, text: String, routine: Option<&str>) -> ClassifiedError {
    let summary = match routine {
        Some(name) => format!(
            "{}: no server diagnostics while running routine {}",
            class, name
        ),
        None => format!("{}: no server diagnostics", class),
    };

    ClassifiedError {
        class,
        original: text,
        code: None,
        severity: None,
        routine: routine.map(str::to_string),
        line: None,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(code: &str, message: &str) -> StoreError {
        StoreError::Server(ServerFailure {
            code: code.to_string(),
            severity: "ERROR".to_string(),
            message: message.to_string(),
            routine: None,
            line: Some(12),
        })
    }

    #[test]
    fn test_programming_family() {
        let classifier = ErrorClassifier::new();
        for code in ["42601", "42703", "42P01", "42883", "42702"] {
            let failure = server(code, "relation \"positions\" does not exist");
            let err = classifier.classify(failure, Some("sync_positions"));
            assert_eq!(err.class, ErrorClass::Programming, "code {}", code);
            assert!(err.message().contains("relation \"positions\" does not exist"));
        }
    }

    #[test]
    fn test_integrity_family() {
        let classifier = ErrorClassifier::new();
        for code in ["23502", "23503", "23505", "23514"] {
            let err = classifier.classify(server(code, "duplicate key value"), None);
            assert_eq!(err.class, ErrorClass::Integrity, "code {}", code);
        }
    }

    #[test]
    fn test_other_server_codes_are_operational() {
        let classifier = ErrorClassifier::new();
        let failure = server("P0001", "positions out of balance");
        let err = classifier.classify(failure, Some("sync_positions"));

        assert_eq!(err.class, ErrorClass::Operational);
        assert_eq!(err.original, "positions out of balance");
        assert_eq!(
            err.message(),
            concat!(
                "positions out of balance\n",
                "OperationalError: server message P0001, severity ERROR, ",
                "routine sync_positions, line 12",
            )
        );
    }

    #[test]
    fn test_server_named_routine_wins() {
        let classifier = ErrorClassifier::new();
        let failure = StoreError::Server(ServerFailure {
            code: "P0001".to_string(),
            severity: "ERROR".to_string(),
            message: "boom".to_string(),
            routine: Some("inner_helper".to_string()),
            line: None,
        });

        let err = classifier.classify(failure, Some("sync_positions"));
        assert_eq!(err.routine.as_deref(), Some("inner_helper"));
        assert!(err.summary.ends_with("routine inner_helper"));
    }

    #[test]
    fn test_non_server_failures() {
        let classifier = ErrorClassifier::new();

        let reset = StoreError::Communication("connection reset by peer".into());
        let comm = classifier.classify(reset, Some("X"));
        assert_eq!(comm.class, ErrorClass::DatabaseCommunication);
        assert!(comm.message().starts_with("connection reset by peer\n"));

        let driver = StoreError::Driver("column index out of bounds".into());
        let internal = classifier.classify(driver, None);
        assert_eq!(internal.class, ErrorClass::Internal);

        let generic = classifier.classify(StoreError::Other("worker crashed".into()), None);
        assert_eq!(generic.class, ErrorClass::GenericDatabase);
        assert_eq!(generic.summary, "GenericDatabaseError: no server diagnostics");
    }

    #[test]
    fn test_server_side_disconnects_and_timeouts() {
        let classifier = ErrorClassifier::new();
        for code in ["08006", "57014", "57P01"] {
            assert_eq!(classifier.class_for_code(code), ErrorClass::DatabaseCommunication);
        }
    }

    #[test]
    fn test_custom_mappings_override_defaults() {
        let classifier = ErrorClassifier::new()
            .with_mappings([mapping("P0001", ErrorClass::Integrity, "business rule")])
            .with_mappings([mapping("23505", ErrorClass::Operational, "tolerated")]);

        assert_eq!(classifier.class_for_code("P0001"), ErrorClass::Integrity);
        assert_eq!(classifier.class_for_code("23505"), ErrorClass::Operational);
        assert_eq!(classifier.class_for_code("42p01"), ErrorClass::Programming);
    }
}
