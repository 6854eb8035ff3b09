//! Usage counters.
//!
//! Counters follow a two-phase contract: an event is counted as `triggered` when it enters the
//! pipeline, and as `sent` or `failed` only once its delivery outcome is known. Each worker
//! process keeps its own counters; the per-worker trees are merged into one build-level view
//! after all workers finish.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

mod report;
pub use self::report::{BuildUsage, LifecycleStats, ReportMetadata, UsageStats};

/// Delivery state recorded against a counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsageStatus {
    /// The event entered the pipeline.
    Triggered,

    /// The event was delivered.
    Success,

    /// The event was not delivered.
    Failed,
}

/// One-shot usage counter for actions that run at most once per build, such as the build
/// start/stop handshake.
///
/// The counter is first marked `triggered`, then terminally `success` or `failed`; later marks
/// are ignored once a terminal status is reached.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureUsage {
    is_triggered: bool,
    status: Option<UsageOutcome>,
    error: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum UsageOutcome {
    Success,
    Failed,
}

impl UsageOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FeatureUsage {
    /// Creates a new, untriggered `FeatureUsage`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the action as attempted.
    pub fn triggered(&mut self) {
        self.is_triggered = true;
    }

    /// Marks the action as completed successfully. No-op once a terminal status is set.
    pub fn success(&mut self) {
        if self.status.is_none() {
            self.status = Some(UsageOutcome::Success);
        }
    }

    /// Marks the action as failed with the given error. No-op once a terminal status is set.
    pub fn failed(&mut self, error: impl Into<String>) {
        if self.status.is_none() {
            self.status = Some(UsageOutcome::Failed);
            self.error = Some(error.into());
        }
    }

    /// Returns `true` if the action was attempted.
    pub fn is_triggered(&self) -> bool {
        self.is_triggered
    }

    /// Returns `true` if the action reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    /// Renders the counter as JSON.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("isTriggered".to_string(), Value::Bool(self.is_triggered));
        map.insert(
            "status".to_string(),
            match self.status {
                Some(outcome) => Value::String(outcome.as_str().to_string()),
                None => Value::Null,
            },
        );
        map.insert(
            "error".to_string(),
            match &self.error {
                Some(error) => Value::String(error.clone()),
                None => Value::Null,
            },
        );
        Value::Object(map)
    }

    /// Reconstructs a counter from JSON. Missing or null input yields an untriggered counter.
    pub fn from_json(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };

        let status = match map.get("status").and_then(Value::as_str) {
            Some("success") => Some(UsageOutcome::Success),
            Some("failed") => Some(UsageOutcome::Failed),
            _ => None,
        };

        Self {
            is_triggered: map.get("isTriggered").and_then(Value::as_bool).unwrap_or(false),
            status,
            error: map.get("error").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// Output shape for [`FeatureStats::to_json`].
///
/// Different consumers need different shapes from the same tree: the per-worker persisted
/// snapshot nests groups under an explicit `groups` key so it can be read back losslessly, while
/// the final build report wants an overview with group counters flattened beside it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerializeShape {
    /// Drop nested group data entirely. Intentionally lossy.
    pub omit_groups: bool,

    /// Emit only the group map, flattened to the top level of the result.
    pub only_groups: bool,

    /// Wrap the group map under an explicit `groups` key instead of flattening it.
    pub nested_groups: bool,
}

impl SerializeShape {
    /// Scalar counters plus groups flattened beside them.
    pub fn flat() -> Self {
        Self::default()
    }

    /// Scalar counters only.
    pub fn overview() -> Self {
        Self {
            omit_groups: true,
            ..Self::default()
        }
    }

    /// Group map only, flattened.
    pub fn groups_only() -> Self {
        Self {
            only_groups: true,
            ..Self::default()
        }
    }

    /// Scalar counters plus groups under a `groups` key. The only lossless shape.
    pub fn nested() -> Self {
        Self {
            nested_groups: true,
            ..Self::default()
        }
    }
}

/// Hierarchical triggered/sent/failed counters for one event kind.
///
/// The top-level counters track the kind overall; named groups track sub-populations, such as
/// per-outcome counts for finished runs or per-kind counts for log entries. Groups hold trees of
/// the same type, so counting nests to arbitrary depth, though in practice two levels are used.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureStats {
    triggered_count: u64,
    sent_count: u64,
    failed_count: u64,
    groups: BTreeMap<String, FeatureStats>,
}

impl FeatureStats {
    /// Creates a new, zeroed `FeatureStats`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status` against the top-level counters and, when a group is given, against that
    /// group's tree as well, creating it on first use.
    pub fn mark(&mut self, status: UsageStatus, group: Option<&str>) {
        self.bump(status);
        if let Some(group) = group {
            self.groups.entry(group.to_string()).or_default().bump(status);
        }
    }

    /// Shorthand for [`Self::mark`] with [`UsageStatus::Triggered`].
    pub fn triggered(&mut self, group: Option<&str>) {
        self.mark(UsageStatus::Triggered, group);
    }

    /// Shorthand for [`Self::mark`] with [`UsageStatus::Success`].
    pub fn success(&mut self, group: Option<&str>) {
        self.mark(UsageStatus::Success, group);
    }

    /// Shorthand for [`Self::mark`] with [`UsageStatus::Failed`].
    pub fn failed(&mut self, group: Option<&str>) {
        self.mark(UsageStatus::Failed, group);
    }

    fn bump(&mut self, status: UsageStatus) {
        match status {
            UsageStatus::Triggered => self.triggered_count += 1,
            UsageStatus::Success => self.sent_count += 1,
            UsageStatus::Failed => self.failed_count += 1,
        }
    }

    /// Folds `other` into `self`.
    ///
    /// Scalar counters are summed; group maps are unioned, merging recursively on shared keys and
    /// copying in groups present only in `other`. The operation is associative and commutative.
    pub fn merge(&mut self, other: &FeatureStats) {
        self.triggered_count += other.triggered_count;
        self.sent_count += other.sent_count;
        self.failed_count += other.failed_count;
        for (key, theirs) in &other.groups {
            self.groups.entry(key.clone()).or_default().merge(theirs);
        }
    }

    /// Number of events that entered the pipeline.
    pub fn triggered_count(&self) -> u64 {
        self.triggered_count
    }

    /// Number of events confirmed delivered.
    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    /// Number of events whose delivery failed.
    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    /// Gets the named group's tree, if it exists.
    pub fn group(&self, key: &str) -> Option<&FeatureStats> {
        self.groups.get(key)
    }

    /// Group keys present in this tree.
    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Renders the tree as JSON in the given shape.
    pub fn to_json(&self, shape: SerializeShape) -> Value {
        if shape.only_groups {
            let mut map = Map::new();
            for (key, group) in &self.groups {
                map.insert(key.clone(), group.to_json(SerializeShape::flat()));
            }
            return Value::Object(map);
        }

        let mut map = Map::new();
        map.insert("triggeredCount".to_string(), Value::from(self.triggered_count));
        map.insert("sentCount".to_string(), Value::from(self.sent_count));
        map.insert("failedCount".to_string(), Value::from(self.failed_count));

        if !shape.omit_groups && !self.groups.is_empty() {
            if shape.nested_groups {
                let mut groups = Map::new();
                for (key, group) in &self.groups {
                    groups.insert(key.clone(), group.to_json(SerializeShape::nested()));
                }
                map.insert("groups".to_string(), Value::Object(groups));
            } else {
                for (key, group) in &self.groups {
                    map.insert(key.clone(), group.to_json(SerializeShape::flat()));
                }
            }
        }

        Value::Object(map)
    }

    /// Reconstructs a tree from JSON produced with [`SerializeShape::nested`].
    ///
    /// Missing, null, or empty input yields a zeroed tree rather than an error, so absent
    /// snapshot sections merge as no-ops.
    pub fn from_json(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };

        let mut groups = BTreeMap::new();
        if let Some(Value::Object(raw_groups)) = map.get("groups") {
            for (key, group) in raw_groups {
                groups.insert(key.clone(), Self::from_json(Some(group)));
            }
        }

        Self {
            triggered_count: map.get("triggeredCount").and_then(Value::as_u64).unwrap_or(0),
            sent_count: map.get("sentCount").and_then(Value::as_u64).unwrap_or(0),
            failed_count: map.get("failedCount").and_then(Value::as_u64).unwrap_or(0),
            groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_stats() -> FeatureStats {
        let mut stats = FeatureStats::new();
        stats.triggered(Some("passed"));
        stats.triggered(Some("passed"));
        stats.triggered(Some("failed"));
        stats.success(Some("passed"));
        stats.failed(Some("failed"));
        stats
    }

    #[test]
    fn mark_updates_top_level_and_group() {
        let stats = sample_stats();

        assert_eq!(stats.triggered_count(), 3);
        assert_eq!(stats.sent_count(), 1);
        assert_eq!(stats.failed_count(), 1);
        assert_eq!(stats.group("passed").unwrap().triggered_count(), 2);
        assert_eq!(stats.group("passed").unwrap().sent_count(), 1);
        assert_eq!(stats.group("failed").unwrap().failed_count(), 1);
    }

    #[test]
    fn merge_is_commutative_and_sums_counts() {
        let a = sample_stats();
        let mut b = FeatureStats::new();
        b.triggered(Some("failed"));
        b.triggered(Some("skipped"));
        b.success(None);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba);
        assert_eq!(ab.triggered_count(), a.triggered_count() + b.triggered_count());
        assert_eq!(ab.sent_count(), a.sent_count() + b.sent_count());
        assert_eq!(ab.failed_count(), a.failed_count() + b.failed_count());
        // Group keys from both operands survive the merge.
        assert_eq!(ab.group("failed").unwrap().triggered_count(), 2);
        assert!(ab.group("skipped").is_some());
        assert!(ab.group("passed").is_some());
    }

    #[test]
    fn merge_is_associative() {
        let a = sample_stats();
        let mut b = FeatureStats::new();
        b.triggered(Some("skipped"));
        let mut c = FeatureStats::new();
        c.failed(Some("passed"));

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);

        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn nested_json_round_trips() {
        let stats = sample_stats();

        let encoded = stats.to_json(SerializeShape::nested());
        let decoded = FeatureStats::from_json(Some(&encoded));

        assert_eq!(decoded, stats);
    }

    #[test]
    fn overview_json_is_lossy_on_purpose() {
        let stats = sample_stats();

        let encoded = stats.to_json(SerializeShape::overview());
        let decoded = FeatureStats::from_json(Some(&encoded));

        assert_eq!(decoded.triggered_count(), stats.triggered_count());
        assert_eq!(decoded.sent_count(), stats.sent_count());
        assert_eq!(decoded.failed_count(), stats.failed_count());
        assert_eq!(decoded.group_keys().count(), 0);
    }

    #[test]
    fn flat_json_places_groups_beside_counters() {
        let value = sample_stats().to_json(SerializeShape::flat());

        assert_eq!(value["triggeredCount"], 3);
        assert_eq!(value["passed"]["triggeredCount"], 2);
        assert!(value.get("groups").is_none());
    }

    #[test]
    fn groups_only_json_drops_overview() {
        let value = sample_stats().to_json(SerializeShape::groups_only());

        assert!(value.get("triggeredCount").is_none());
        assert_eq!(value["passed"]["sentCount"], 1);
        assert_eq!(value["failed"]["failedCount"], 1);
    }

    #[test]
    fn from_json_tolerates_absent_input() {
        assert_eq!(FeatureStats::from_json(None), FeatureStats::new());
        assert_eq!(FeatureStats::from_json(Some(&Value::Null)), FeatureStats::new());
        assert_eq!(FeatureStats::from_json(Some(&json!({}))), FeatureStats::new());
    }

    #[test]
    fn one_shot_usage_is_terminal() {
        let mut usage = FeatureUsage::new();
        usage.triggered();
        usage.failed("connection refused");
        usage.success();

        let value = usage.to_json();
        assert_eq!(value["isTriggered"], true);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "connection refused");

        assert_eq!(FeatureUsage::from_json(Some(&value)), usage);
        assert_eq!(FeatureUsage::from_json(None), FeatureUsage::new());
    }
}
