//! Failure records with bounded traces.
//!
//! Index-side failures never reach the primary store's commit path; they are
//! turned into a [`FailureRecord`] (message + bounded trace) and handed to a
//! [`FailureSink`]. The default sink writes them through `tracing`.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A logged failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The operation that failed (`index`, `delete`, `bulk_index`, ...).
    pub operation: String,
    /// The record type involved.
    pub record_type: String,
    /// Error message.
    pub message: String,
    /// Cause chain followed by backtrace lines, at most the configured number
    /// of lines, terminated by `...` when cut.
    pub trace: Vec<String>,
}

impl FailureRecord {
    /// Builds a record from an error, keeping at most `max_frames` trace lines.
    pub fn from_error(
        operation: impl Into<String>,
        record_type: impl Into<String>,
        error: &(dyn Error + 'static),
        max_frames: usize,
    ) -> Self {
        let mut trace = Vec::new();

        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            trace.extend(
                backtrace
                    .to_string()
                    .lines()
                    .map(|line| line.trim_end().to_string()),
            );
        }

        if trace.len() > max_frames {
            trace.truncate(max_frames);
            trace.push("...".to_string());
        }

        Self {
            operation: operation.into(),
            record_type: record_type.into(),
            message: error.to_string(),
            trace,
        }
    }
}

/// Receives failure records.
pub trait FailureSink: Send + Sync {
    /// Records a failure.
    fn record(&self, failure: FailureRecord);
}

/// Writes failures as `tracing` error events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn record(&self, failure: FailureRecord) {
        tracing::error!(
            operation = %failure.operation,
            record_type = %failure.record_type,
            error = %failure.message,
            "[Error] {} failed: {}",
            failure.operation,
            failure.message
        );
        if !failure.trace.is_empty() {
            tracing::error!("Backtrace:\n{}", failure.trace.join("\n"));
        }
    }
}

/// Keeps failures in memory (and forwards them to `tracing`).
///
/// Used by verification code that needs to count what was logged.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    records: Mutex<Vec<FailureRecord>>,
}

impl MemoryFailureSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded failure.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Forgets recorded failures.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl FailureSink for MemoryFailureSink {
    fn record(&self, failure: FailureRecord) {
        TracingFailureSink.record(failure.clone());
        self.records.lock().push(failure);
    }
}
