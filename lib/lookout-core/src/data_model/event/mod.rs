//! Telemetry events.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cbt;
use self::cbt::CbtSession;

pub mod hook_run;
use self::hook_run::HookRun;

pub mod log;
use self::log::LogEntry;

pub mod test_run;
use self::test_run::TestRun;

/// Telemetry event kind.
///
/// The kind is the wire discriminant of the event envelope, and the key under which delivery
/// outcomes are counted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    /// A test run started.
    TestRunStarted,

    /// A test run finished.
    TestRunFinished,

    /// A hook run started.
    HookRunStarted,

    /// A hook run finished.
    HookRunFinished,

    /// One or more log entries were produced.
    LogCreated,

    /// A cross-browser-test session was created.
    CbtSessionCreated,
}

impl EventKind {
    /// Returns the wire form of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestRunStarted => "TestRunStarted",
            Self::TestRunFinished => "TestRunFinished",
            Self::HookRunStarted => "HookRunStarted",
            Self::HookRunFinished => "HookRunFinished",
            Self::LogCreated => "LogCreated",
            Self::CbtSessionCreated => "CBTSessionCreated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A telemetry event.
///
/// Serializes as an envelope carrying the kind as `event_type` plus exactly one payload field
/// whose name is fixed by the kind: `test_run` for test runs and sessions, `hook_run` for hook
/// runs, `logs` for log entries. The variant is always selected explicitly; the kind is never
/// inferred from which payload field happens to be present.
///
/// Screenshots travel as [`TelemetryEvent::LogCreated`] envelopes whose entries carry the
/// [`log::TEST_SCREENSHOT`] kind; they differ from other log events only in delivery path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum TelemetryEvent {
    /// A test run started.
    TestRunStarted {
        /// The test run.
        test_run: TestRun,
    },

    /// A test run finished.
    TestRunFinished {
        /// The test run, carrying its final outcome.
        test_run: TestRun,
    },

    /// A hook run started.
    HookRunStarted {
        /// The hook run.
        hook_run: HookRun,
    },

    /// A hook run finished.
    HookRunFinished {
        /// The hook run, carrying its final outcome.
        hook_run: HookRun,
    },

    /// One or more log entries were produced.
    LogCreated {
        /// The log entries, delivered together in one envelope.
        logs: Vec<LogEntry>,
    },

    /// A cross-browser-test session was created.
    #[serde(rename = "CBTSessionCreated")]
    CbtSessionCreated {
        /// The session record.
        test_run: CbtSession,
    },
}

impl TelemetryEvent {
    /// Gets the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TestRunStarted { .. } => EventKind::TestRunStarted,
            Self::TestRunFinished { .. } => EventKind::TestRunFinished,
            Self::HookRunStarted { .. } => EventKind::HookRunStarted,
            Self::HookRunFinished { .. } => EventKind::HookRunFinished,
            Self::LogCreated { .. } => EventKind::LogCreated,
            Self::CbtSessionCreated { .. } => EventKind::CbtSessionCreated,
        }
    }

    /// Returns a reference to the inner test run, if this event carries one.
    pub fn try_as_test_run(&self) -> Option<&TestRun> {
        match self {
            Self::TestRunStarted { test_run } | Self::TestRunFinished { test_run } => Some(test_run),
            _ => None,
        }
    }

    /// Returns a reference to the inner hook run, if this event carries one.
    pub fn try_as_hook_run(&self) -> Option<&HookRun> {
        match self {
            Self::HookRunStarted { hook_run } | Self::HookRunFinished { hook_run } => Some(hook_run),
            _ => None,
        }
    }

    /// Returns a reference to the inner log entries, if this event carries them.
    pub fn try_as_logs(&self) -> Option<&[LogEntry]> {
        match self {
            Self::LogCreated { logs } => Some(logs),
            _ => None,
        }
    }

    /// Returns a reference to the inner session record, if this event carries one.
    pub fn try_as_cbt_session(&self) -> Option<&CbtSession> {
        match self {
            Self::CbtSessionCreated { test_run } => Some(test_run),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_run::RunResult;
    use super::*;

    #[test]
    fn envelope_carries_kind_and_payload_key() {
        let test_run = TestRun::new("loads the dashboard", "suite > loads the dashboard");
        let event = TelemetryEvent::TestRunStarted { test_run };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "TestRunStarted");
        assert!(value.get("test_run").is_some());
        assert!(value.get("hook_run").is_none());
        assert!(value.get("logs").is_none());
    }

    #[test]
    fn cbt_envelope_uses_wire_discriminant() {
        let event = TelemetryEvent::CbtSessionCreated {
            test_run: CbtSession::new("session-1"),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "CBTSessionCreated");
        assert_eq!(value["test_run"]["session_id"], "session-1");
    }

    #[test]
    fn envelope_round_trips() {
        let test_run = TestRun::new("loads the dashboard", "suite > loads the dashboard")
            .finished(RunResult::Failed, Some("timeout".to_string()));
        let event = TelemetryEvent::TestRunFinished { test_run };

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: TelemetryEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.kind(), EventKind::TestRunFinished);
        assert_eq!(
            decoded.try_as_test_run().and_then(|r| r.result),
            Some(RunResult::Failed)
        );
    }
}
