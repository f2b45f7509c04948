//! Capture of server notices raised while a routine runs.
//!
//! sqlx does not return `NOTICE`/`WARNING` messages to the caller. It emits
//! each one as a tracing event on [`NOTICE_TARGET`], carrying only the message
//! text, at a level derived from the notice severity. [`NoticeLayer`] collects
//! those events into a [`NoticeSink`] that the issuer adapter drains around
//! each call.
//!
//! The sink is process-wide: notices from any connection land in it, so it
//! assumes one routine runs at a time.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use batchguard_core::DiagnosticMessage;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Target sqlx logs server notices on.
pub const NOTICE_TARGET: &str = "sqlx::postgres::notice";

/// SQLSTATE placeholder; the driver drops the notice's code.
pub const UNREPORTED_STATE: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedNotice {
    pub severity: String,
    pub text: String,
}

impl CapturedNotice {
    pub fn into_diagnostic(self, server: &str) -> DiagnosticMessage {
        DiagnosticMessage {
            server: server.to_string(),
            severity: self.severity,
            state: UNREPORTED_STATE.to_string(),
            routine: None,
            line: None,
            text: self.text,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoticeSink {
    notices: Arc<Mutex<Vec<CapturedNotice>>>,
}

impl NoticeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer feeding this sink. Install it with a filter that lets
    /// [`NOTICE_TARGET`] through at every level.
    pub fn layer(&self) -> NoticeLayer {
        NoticeLayer { sink: self.clone() }
    }

    /// Take every notice captured so far.
    pub fn drain(&self) -> Vec<CapturedNotice> {
        let mut notices = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *notices)
    }

    fn push(&self, notice: CapturedNotice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}

pub struct NoticeLayer {
    sink: NoticeSink,
}

/// Inverse of the driver's severity-to-level mapping. `INFO` and `LOG` share
/// a level and come back as `INFO`.
fn severity_for(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "NOTICE",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "INFO",
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && self.message.is_none() {
            self.message = Some(format!("{:?}", value));
        }
    }
}

impl<S: Subscriber> Layer<S> for NoticeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() != NOTICE_TARGET {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(text) = visitor.message {
            self.sink.push(CapturedNotice {
                severity: severity_for(metadata.level()).to_string(),
                text,
            });
        }
    }
}
