//! Cross-browser-test sessions.

use serde::{Deserialize, Serialize};

/// A cross-browser-test session record, correlated to the test run it served.
///
/// Session records can arrive before the test they belong to has been reported; the dispatcher
/// buffers them until a test run UUID is available to stamp them with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CbtSession {
    /// UUID of the test run the session served. Stamped by the dispatcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_uuid: Option<String>,

    /// Provider-side session identifier.
    pub session_id: String,

    /// Name of the provider hosting the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Provider-side URL of the session recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_url: Option<String>,

    /// Browser name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,

    /// Browser version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,

    /// Operating system / platform name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl CbtSession {
    /// Creates a new session record with the given provider-side identifier.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            test_run_uuid: None,
            session_id: session_id.into(),
            provider: None,
            session_url: None,
            browser: None,
            browser_version: None,
            platform: None,
        }
    }

    /// Sets the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the session recording URL.
    pub fn with_session_url(mut self, session_url: impl Into<String>) -> Self {
        self.session_url = Some(session_url.into());
        self
    }
}
