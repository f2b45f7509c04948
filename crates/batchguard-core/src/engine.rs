use std::sync::Arc;

use crate::classifier::{ClassifiedError, ErrorClassifier, CLASSIFICATION_TABLE_VERSION};
use crate::model::{DiagnosticMessage, RoutineCall};
use crate::store::IssuerStore;

/// Runs the target routine on the issuer store.
pub struct ExecutionEngine {
    issuer: Arc<dyn IssuerStore>,
    classifier: ErrorClassifier,
}

impl ExecutionEngine {
    pub fn new(issuer: Arc<dyn IssuerStore>) -> Self {
        Self::with_classifier(issuer, ErrorClassifier::new())
    }

    pub fn with_classifier(issuer: Arc<dyn IssuerStore>, classifier: ErrorClassifier) -> Self {
        Self { issuer, classifier }
    }

    /// Invoke the routine. Messages the server emits while it runs are logged
    /// as warnings and never end the run; a failure is classified before it is
    /// returned.
    pub async fn invoke(&self, call: &RoutineCall) -> Result<(), ClassifiedError> {
        tracing::info!(
            routine = %call.routine,
            args = ?call.args,
            priority = ?call.priority,
            "Executing routine"
        );

        let invocation = self.issuer.invoke_routine(call).await;

        for message in &invocation.messages {
            log_diagnostic(message);
        }

        invocation.result.map_err(|failure| {
            let classified = self.classifier.classify(failure, Some(&call.routine));
            tracing::error!(
                routine = %call.routine,
                class = %classified.class,
                code = classified.code.as_deref().unwrap_or("-"),
                table_version = CLASSIFICATION_TABLE_VERSION,
                "Routine execution failed"
            );
            classified
        })
    }
}

fn log_diagnostic(message: &DiagnosticMessage) {
    match &message.routine {
        Some(routine) if !routine.trim().is_empty() => tracing::warn!(
            server = %message.server,
            severity = %message.severity,
            state = %message.state,
            routine = %routine,
            line = message.line,
            "{}",
            message.text
        ),
        _ => tracing::warn!(
            server = %message.server,
            severity = %message.severity,
            state = %message.state,
            line = message.line,
            "{}",
            message.text
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClass;
    use crate::memory::MemoryIssuerStore;
    use crate::model::{DeadlockPriority, IssuerIdentity, ReferenceDate, RoutineArgs};
    use crate::store::{ServerFailure, StoreError};
    use tracing_subscriber::fmt::MakeWriter;

    fn issuer() -> Arc<MemoryIssuerStore> {
        Arc::new(MemoryIssuerStore::new(IssuerIdentity::new("10.0.0.5", "issuer_db")))
    }

    fn call() -> RoutineCall {
        RoutineCall::new(
            "SYNC_POSITIONS",
            RoutineArgs::ReferenceDate(ReferenceDate::parse("2024-03-01").unwrap()),
        )
    }

    #[tokio::test]
    async fn test_invoke_success_requests_high_priority() {
        let issuer = issuer();
        let engine = ExecutionEngine::new(issuer.clone());

        engine.invoke(&call()).await.unwrap();

        let invocations = issuer.invocations().await;
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].priority, DeadlockPriority::High);
    }

    /// Log sink for asserting on formatted output.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn diagnostic(
        severity: &str,
        routine: Option<&str>,
        line: Option<u32>,
        text: &str,
    ) -> DiagnosticMessage {
        DiagnosticMessage {
            server: "10.0.0.5".to_string(),
            severity: severity.to_string(),
            state: "01000".to_string(),
            routine: routine.map(str::to_string),
            line,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_diagnostics_are_logged_as_warnings() {
        let issuer = issuer();
        issuer
            .emit_messages(vec![
                diagnostic("WARNING", Some("SYNC_POSITIONS"), Some(40), "3 positions skipped"),
                diagnostic("NOTICE", None, None, "positions synced"),
                diagnostic("NOTICE", Some("  "), Some(7), "window closed"),
            ])
            .await;
        let engine = ExecutionEngine::new(issuer);

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::WARN)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        let result = engine.invoke(&call()).await;
        drop(guard);

        // messages never end the run
        assert!(result.is_ok());

        let output = logs.contents();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3, "{}", output);
        assert!(lines.iter().all(|l| l.contains("WARN")));

        let skipped = lines[0];
        for field in [
            "3 positions skipped",
            "server=10.0.0.5",
            "severity=WARNING",
            "state=01000",
            "routine=SYNC_POSITIONS",
            "line=40",
        ] {
            assert!(skipped.contains(field), "missing {} in {}", field, skipped);
        }

        assert!(lines[1].contains("positions synced"));
        assert!(lines[1].contains("severity=NOTICE"));
        assert!(!lines[1].contains("routine="));
        assert!(!lines[1].contains("line="));

        assert!(lines[2].contains("window closed"));
        assert!(!lines[2].contains("routine="));
        assert!(lines[2].contains("line=7"));
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let issuer = issuer();
        issuer
            .fail_next_invocation(StoreError::Server(ServerFailure {
                code: "23505".to_string(),
                severity: "ERROR".to_string(),
                message: "duplicate key value violates unique constraint \"positions_pkey\""
                    .to_string(),
                routine: None,
                line: Some(18),
            }))
            .await;

        let engine = ExecutionEngine::new(issuer);
        let err = engine.invoke(&call()).await.unwrap_err();

        assert_eq!(err.class, ErrorClass::Integrity);
        assert_eq!(err.routine.as_deref(), Some("SYNC_POSITIONS"));
        assert!(err
            .message()
            .starts_with("duplicate key value violates unique constraint \"positions_pkey\"\n"));
    }
}
