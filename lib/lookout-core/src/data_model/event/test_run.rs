//! Test runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final outcome of a test or hook run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    /// The run completed successfully.
    Passed,

    /// The run completed with a failure.
    Failed,

    /// The run was skipped.
    Skipped,

    /// The run was declared but never executed.
    Pending,
}

impl RunResult {
    /// Returns the group key under which this outcome is counted.
    pub fn as_group_key(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_group_key())
    }
}

/// A single test run, as reported to the intake endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    /// Unique identifier of this run.
    ///
    /// Log, screenshot, and session records produced while the test executes are correlated back
    /// to the run through this value.
    pub uuid: String,

    /// Human-readable test name.
    pub name: String,

    /// Fully-qualified identifier: the enclosing suite path joined with the test name.
    pub identifier: String,

    /// Enclosing suite scopes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Source file the test was defined in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// When the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Final outcome, present only on finished runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,

    /// Failure details, present only on failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// UUID of the run this one retries, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
}

impl TestRun {
    /// Creates a new `TestRun` with a random UUID, stamped as started now.
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            identifier: identifier.into(),
            scopes: Vec::new(),
            file_name: None,
            started_at: Some(Utc::now()),
            finished_at: None,
            result: None,
            failure_reason: None,
            retry_of: None,
        }
    }

    /// Sets the enclosing suite scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the source file the test was defined in.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Marks the run as finished now with the given outcome.
    pub fn finished(mut self, result: RunResult, failure_reason: Option<String>) -> Self {
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
        self.failure_reason = failure_reason;
        self
    }
}
