//! Hook runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::test_run::RunResult;

/// Position of a hook within the test lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookType {
    /// Runs once before every test in the enclosing scope.
    BeforeAll,

    /// Runs before each test.
    BeforeEach,

    /// Runs after each test.
    AfterEach,

    /// Runs once after every test in the enclosing scope.
    AfterAll,
}

/// A single hook run, as reported to the intake endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HookRun {
    /// Unique identifier of this run.
    pub uuid: String,

    /// Human-readable hook name.
    pub name: String,

    /// Position of the hook within the test lifecycle.
    pub hook_type: HookType,

    /// UUID of the test run this hook ran for, when the hook is test-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_uuid: Option<String>,

    /// Enclosing suite scopes, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

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
}

impl HookRun {
    /// Creates a new `HookRun` with a random UUID, stamped as started now.
    pub fn new(name: impl Into<String>, hook_type: HookType) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            hook_type,
            test_run_uuid: None,
            scopes: Vec::new(),
            started_at: Some(Utc::now()),
            finished_at: None,
            result: None,
            failure_reason: None,
        }
    }

    /// Sets the test run this hook ran for.
    pub fn with_test_run_uuid(mut self, test_run_uuid: impl Into<String>) -> Self {
        self.test_run_uuid = Some(test_run_uuid.into());
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
