//! Log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log kind for plain test log lines.
pub const TEST_LOG: &str = "TEST_LOG";

/// Log kind for captured HTTP traffic.
pub const HTTP_LOG: &str = "HTTP";

/// Log kind for screenshots captured during a test.
pub const TEST_SCREENSHOT: &str = "TEST_SCREENSHOT";

/// Normalizes a raw log kind into the group-key form used by the usage counters.
///
/// Kinds arrive from framework adapters in whatever casing the adapter used; counting groups them
/// under a single canonical spelling. Well-known shorthands map to their canonical kind.
pub fn normalize_kind(kind: &str) -> String {
    let kind = kind.trim().to_uppercase();
    match kind.as_str() {
        "LOG" => TEST_LOG.to_string(),
        "SCREENSHOT" => TEST_SCREENSHOT.to_string(),
        _ => kind,
    }
}

/// Response details for captured HTTP traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status code, when a response was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Total request duration, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A single log entry, as reported to the intake endpoint.
///
/// Log events carry a whole array of entries in one envelope; entries are never split across
/// envelopes by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Kind of the entry, e.g. [`TEST_LOG`] or [`TEST_SCREENSHOT`].
    pub kind: String,

    /// When the entry was produced.
    pub timestamp: DateTime<Utc>,

    /// UUID of the test run the entry belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_uuid: Option<String>,

    /// UUID of the hook run the entry belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_run_uuid: Option<String>,

    /// Severity level, e.g. `info` or `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Entry body. For screenshots, the uploaded artifact's URL or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// HTTP details, present only on [`HTTP_LOG`] entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponse>,
}

impl LogEntry {
    /// Creates a new entry of the given kind, stamped now.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            test_run_uuid: None,
            hook_run_uuid: None,
            level: None,
            message: Some(message.into()),
            http_response: None,
        }
    }

    /// Creates a screenshot entry pointing at the given artifact.
    pub fn screenshot(artifact: impl Into<String>) -> Self {
        Self::new(TEST_SCREENSHOT, artifact)
    }

    /// Sets the severity level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Sets the test run the entry belongs to.
    pub fn with_test_run_uuid(mut self, test_run_uuid: impl Into<String>) -> Self {
        self.test_run_uuid = Some(test_run_uuid.into());
        self
    }

    /// Sets the HTTP details of an [`HTTP_LOG`] entry.
    pub fn with_http_response(mut self, http_response: HttpResponse) -> Self {
        self.http_response = Some(http_response);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_normalize_to_canonical_spelling() {
        assert_eq!(normalize_kind("test_log"), TEST_LOG);
        assert_eq!(normalize_kind("  http "), HTTP_LOG);
        assert_eq!(normalize_kind("log"), TEST_LOG);
        assert_eq!(normalize_kind("screenshot"), TEST_SCREENSHOT);
        assert_eq!(normalize_kind("CUSTOM_KIND"), "CUSTOM_KIND");
    }
}
