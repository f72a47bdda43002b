//! Stage error classification and reporting.

use std::fmt;
use tracing::{error, warn};

/// Errors that can occur while a pipeline stage processes a job.
#[derive(Debug, Clone)]
pub enum StageError {
    /// The stage degraded its result but the job continues.
    Recoverable(String),
    /// The job cannot continue and becomes FAILED.
    Fatal(String),
}

impl StageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Recoverable(msg) | StageError::Fatal(msg) => msg,
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl From<crate::error::NarrateError> for StageError {
    fn from(err: crate::error::NarrateError) -> Self {
        StageError::Fatal(err.to_string())
    }
}

/// Trait for reporting stage errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a stage.
    fn report(&self, stage: &str, error: &StageError);
}

/// Reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, err: &StageError) {
        match err {
            StageError::Recoverable(msg) => warn!(stage, "{}", msg),
            StageError::Fatal(msg) => error!(stage, "{}", msg),
        }
    }
}

/// Reporter that keeps every report, for tests.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: std::sync::Mutex<Vec<(String, StageError)>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, StageError)> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn recoverable_count(&self) -> usize {
        self.reports()
            .iter()
            .filter(|(_, e)| !e.is_fatal())
            .count()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, stage: &str, error: &StageError) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stage.to_string(), error.clone()));
    }
}
