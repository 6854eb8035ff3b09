//! Typed telemetry pipeline settings.

use std::path::PathBuf;
use std::time::Duration;

use lookout_error::GenericError;
use serde::Deserialize;

use crate::GenericConfiguration;

const fn default_batch_size() -> usize {
    100
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_pending_uploads_wait_secs() -> u64 {
    30
}

fn default_intake_url() -> String {
    "https://intake.lookout.dev/api/v1/batch".to_string()
}

const fn default_true() -> bool {
    true
}

/// Telemetry pipeline configuration.
///
/// All settings have defaults, so an empty environment yields a working configuration pointed at
/// the production intake endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TelemetryConfiguration {
    /// Maximum number of events sent in one outbound request.
    ///
    /// Once this many events are buffered, a flush is triggered immediately instead of waiting for
    /// the next poll interval. Defaults to 100.
    #[serde(default = "default_batch_size")]
    batch_size: usize,

    /// Interval between timer-driven flushes of the event buffer, in milliseconds.
    ///
    /// Defaults to 5000.
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,

    /// Maximum time to wait for in-flight screenshot uploads at shutdown, in seconds.
    ///
    /// Defaults to 30.
    #[serde(default = "default_pending_uploads_wait_secs")]
    pending_uploads_wait_secs: u64,

    /// URL of the analytics intake endpoint that event batches are POSTed to.
    #[serde(default = "default_intake_url")]
    intake_url: String,

    /// Directory where per-worker usage snapshots are persisted for the cross-worker merge.
    ///
    /// When unset, snapshots are not written.
    #[serde(default)]
    snapshot_dir: Option<PathBuf>,

    /// Per-kind emission toggles.
    #[serde(default)]
    enabled: EnabledEvents,
}

impl TelemetryConfiguration {
    /// Creates a new `TelemetryConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Maximum number of events sent in one outbound request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Interval between timer-driven flushes of the event buffer.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum time to wait for in-flight screenshot uploads at shutdown.
    pub fn pending_uploads_wait(&self) -> Duration {
        Duration::from_secs(self.pending_uploads_wait_secs)
    }

    /// URL of the analytics intake endpoint.
    pub fn intake_url(&self) -> &str {
        &self.intake_url
    }

    /// Directory where per-worker usage snapshots are persisted, if any.
    pub fn snapshot_dir(&self) -> Option<&PathBuf> {
        self.snapshot_dir.as_ref()
    }

    /// Per-kind emission toggles.
    pub fn enabled(&self) -> &EnabledEvents {
        &self.enabled
    }
}

/// Controls which event kinds are emitted at all.
///
/// A disabled kind turns the corresponding dispatcher operation into a silent no-op: nothing is
/// counted and nothing is enqueued.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct EnabledEvents {
    /// Test lifecycle events.
    #[serde(default = "default_true")]
    pub test_events: bool,

    /// Hook lifecycle events.
    #[serde(default = "default_true")]
    pub hook_events: bool,

    /// Log events.
    #[serde(default = "default_true")]
    pub log_events: bool,

    /// Screenshot events.
    #[serde(default = "default_true")]
    pub screenshot_events: bool,

    /// Cross-browser-test session events.
    #[serde(default = "default_true")]
    pub cbt_session_events: bool,
}

impl Default for EnabledEvents {
    fn default() -> Self {
        Self {
            test_events: true,
            hook_events: true,
            log_events: true,
            screenshot_events: true,
            cbt_session_events: true,
        }
    }
}
