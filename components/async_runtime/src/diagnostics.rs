//! Diagnostic output for unhandled rejections.
//!
//! Reports are best effort: they never affect settlement and never panic.

use std::fmt;

use core_types::Value;
use parking_lot::Mutex;

/// A rejection that had no observer by the end of the turn it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledRejection {
    /// String form of the rejection reason.
    pub reason: String,
    /// Whether the reason was an error value rather than an arbitrary value.
    pub is_error: bool,
}

impl UnhandledRejection {
    pub(crate) fn from_reason(reason: &Value) -> Self {
        Self {
            reason: reason.to_string(),
            is_error: reason.as_error().is_some(),
        }
    }
}

impl fmt::Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error {
            write!(f, "Unhandled future rejection: {}", self.reason)
        } else {
            write!(f, "Unhandled future rejection (reason: {})", self.reason)
        }
    }
}

/// Receives unhandled-rejection reports.
pub trait DiagnosticSink: Send + Sync {
    /// Called once per rejection still unobserved after its turn.
    fn unhandled_rejection(&self, report: &UnhandledRejection);
}

/// Default sink: emits an `error` event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn unhandled_rejection(&self, report: &UnhandledRejection) {
        tracing::error!(
            reason = %report.reason,
            is_error = report.is_error,
            "{}",
            report
        );
    }
}

/// Sink that records reports in memory, for tests and embedding hosts.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<UnhandledRejection>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every report received so far.
    pub fn reports(&self) -> Vec<UnhandledRejection> {
        self.reports.lock().clone()
    }

    /// Number of reports received so far.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Returns true if no report was received.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn unhandled_rejection(&self, report: &UnhandledRejection) {
        self.reports.lock().push(report.clone());
    }
}
