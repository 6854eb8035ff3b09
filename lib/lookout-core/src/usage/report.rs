//! Per-process usage aggregation and the cross-worker build report.

use serde_json::{json, Map, Value};

use super::{FeatureStats, FeatureUsage, SerializeShape};

/// Started/finished counter pair for one lifecycle event family.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LifecycleStats {
    started: FeatureStats,
    finished: FeatureStats,
}

impl LifecycleStats {
    /// Counters for start events.
    pub fn started(&self) -> &FeatureStats {
        &self.started
    }

    /// Mutable counters for start events.
    pub fn started_mut(&mut self) -> &mut FeatureStats {
        &mut self.started
    }

    /// Counters for finish events, grouped by outcome.
    pub fn finished(&self) -> &FeatureStats {
        &self.finished
    }

    /// Mutable counters for finish events.
    pub fn finished_mut(&mut self) -> &mut FeatureStats {
        &mut self.finished
    }

    fn merge(&mut self, other: &LifecycleStats) {
        self.started.merge(&other.started);
        self.finished.merge(&other.finished);
    }

    fn to_snapshot(&self) -> Value {
        json!({
            "started": self.started.to_json(SerializeShape::nested()),
            "finished": self.finished.to_json(SerializeShape::nested()),
        })
    }

    fn from_snapshot(value: Option<&Value>) -> Self {
        Self {
            started: FeatureStats::from_json(value.and_then(|v| v.get("started"))),
            finished: FeatureStats::from_json(value.and_then(|v| v.get("finished"))),
        }
    }

    /// Report form: start counters plain, finish counters split into an overview plus the
    /// per-outcome groups flattened beside it.
    fn to_report(&self) -> Value {
        let mut finished = Map::new();
        finished.insert("overview".to_string(), self.finished.to_json(SerializeShape::overview()));
        if let Value::Object(groups) = self.finished.to_json(SerializeShape::groups_only()) {
            finished.extend(groups);
        }

        json!({
            "started": self.started.to_json(SerializeShape::flat()),
            "finished": Value::Object(finished),
        })
    }
}

/// One-shot counters for the build start/stop handshake.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildUsage {
    started: FeatureUsage,
    finished: FeatureUsage,
}

impl BuildUsage {
    /// Counter for the build-start handshake.
    pub fn started(&self) -> &FeatureUsage {
        &self.started
    }

    /// Mutable counter for the build-start handshake.
    pub fn started_mut(&mut self) -> &mut FeatureUsage {
        &mut self.started
    }

    /// Counter for the build-stop handshake.
    pub fn finished(&self) -> &FeatureUsage {
        &self.finished
    }

    /// Mutable counter for the build-stop handshake.
    pub fn finished_mut(&mut self) -> &mut FeatureUsage {
        &mut self.finished
    }
}

/// Metadata attached to the build-level report.
#[derive(Clone, Debug, Default)]
pub struct ReportMetadata {
    /// Whether telemetry collection was enabled for the build.
    pub enabled: bool,

    /// Whether collection was toggled explicitly rather than defaulted.
    pub manually_set: bool,

    /// Opaque identifier of the build, as assigned by the intake service.
    pub build_hashed_id: Option<String>,
}

/// Per-process usage counters for every event kind the pipeline handles.
///
/// Each worker process owns one `UsageStats`. At process end the worker persists a snapshot; the
/// primary process folds all snapshots into its own counters and renders the build report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageStats {
    test_events: LifecycleStats,
    hook_events: LifecycleStats,
    log_events: FeatureStats,
    cbt_session_events: FeatureStats,
    build_events: BuildUsage,
}

impl UsageStats {
    /// Creates a new, zeroed `UsageStats`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for test lifecycle events.
    pub fn test_events(&self) -> &LifecycleStats {
        &self.test_events
    }

    /// Mutable counters for test lifecycle events.
    pub fn test_events_mut(&mut self) -> &mut LifecycleStats {
        &mut self.test_events
    }

    /// Counters for hook lifecycle events.
    pub fn hook_events(&self) -> &LifecycleStats {
        &self.hook_events
    }

    /// Mutable counters for hook lifecycle events.
    pub fn hook_events_mut(&mut self) -> &mut LifecycleStats {
        &mut self.hook_events
    }

    /// Counters for log events, grouped by normalized log kind.
    pub fn log_events(&self) -> &FeatureStats {
        &self.log_events
    }

    /// Mutable counters for log events.
    pub fn log_events_mut(&mut self) -> &mut FeatureStats {
        &mut self.log_events
    }

    /// Counters for cross-browser-test session events.
    pub fn cbt_session_events(&self) -> &FeatureStats {
        &self.cbt_session_events
    }

    /// Mutable counters for cross-browser-test session events.
    pub fn cbt_session_events_mut(&mut self) -> &mut FeatureStats {
        &mut self.cbt_session_events
    }

    /// One-shot counters for the build handshake. Only the primary process marks these.
    pub fn build_events(&self) -> &BuildUsage {
        &self.build_events
    }

    /// Mutable one-shot counters for the build handshake.
    pub fn build_events_mut(&mut self) -> &mut BuildUsage {
        &mut self.build_events
    }

    /// Folds `other`'s event counters into `self`.
    ///
    /// Build handshake counters are not merged: the handshake happens once, in the primary
    /// process, and worker snapshots never carry it.
    pub fn merge(&mut self, other: &UsageStats) {
        self.test_events.merge(&other.test_events);
        self.hook_events.merge(&other.hook_events);
        self.log_events.merge(&other.log_events);
        self.cbt_session_events.merge(&other.cbt_session_events);
    }

    /// Renders the lossless snapshot one worker persists at process end.
    pub fn to_worker_snapshot(&self) -> Value {
        json!({
            "testEvents": self.test_events.to_snapshot(),
            "hookEvents": self.hook_events.to_snapshot(),
            "logEvents": self.log_events.to_json(SerializeShape::nested()),
            "cbtSessionEvents": self.cbt_session_events.to_json(SerializeShape::nested()),
        })
    }

    /// Reconstructs a worker's counters from its persisted snapshot.
    ///
    /// Absent or malformed sections deserialize as zeroed counters, so a partial snapshot merges
    /// as a partial contribution rather than an error.
    pub fn from_worker_snapshot(value: &Value) -> Self {
        Self {
            test_events: LifecycleStats::from_snapshot(value.get("testEvents")),
            hook_events: LifecycleStats::from_snapshot(value.get("hookEvents")),
            log_events: FeatureStats::from_json(value.get("logEvents")),
            cbt_session_events: FeatureStats::from_json(value.get("cbtSessionEvents")),
            build_events: BuildUsage::default(),
        }
    }

    /// Folds every worker snapshot into `self`, building the final aggregate.
    pub fn add_data_from_workers<'a>(&mut self, snapshots: impl IntoIterator<Item = &'a Value>) {
        for snapshot in snapshots {
            let worker = Self::from_worker_snapshot(snapshot);
            self.merge(&worker);
        }
    }

    /// Renders the build-level report.
    pub fn to_build_report(&self, metadata: &ReportMetadata) -> Value {
        json!({
            "testEvents": self.test_events.to_report(),
            "hookEvents": self.hook_events.to_report(),
            "logEvents": self.log_events.to_json(SerializeShape::flat()),
            "cbtSessionEvents": self.cbt_session_events.to_json(SerializeShape::flat()),
            "buildEvents": {
                "started": self.build_events.started.to_json(),
                "finished": self.build_events.finished.to_json(),
            },
            "enabled": metadata.enabled,
            "manuallySet": metadata.manually_set,
            "buildHashedId": metadata.build_hashed_id,
        })
    }
}
