//! Worker snapshot persistence and the cross-worker merge.
//!
//! Workers run as independent OS processes with no shared memory, so counters cross process
//! boundaries as JSON files: each worker writes one snapshot at exit, and the primary process
//! folds every snapshot it finds into the build-level report.

use std::fs;
use std::path::Path;

use lookout_core::usage::{ReportMetadata, UsageStats};
use lookout_error::GenericError;
use serde_json::Value;
use tracing::{debug, warn};

const SNAPSHOT_PREFIX: &str = "usage-";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Persists one worker's usage snapshot under the given directory.
///
/// The directory is created if needed; an existing snapshot for the same worker is overwritten.
///
/// # Errors
///
/// If the directory cannot be created or the file cannot be written, an error is returned.
pub fn persist_worker_snapshot(dir: &Path, worker_id: &str, usage: &UsageStats) -> Result<(), GenericError> {
    fs::create_dir_all(dir)?;

    let path = dir.join(format!("{SNAPSHOT_PREFIX}{worker_id}{SNAPSHOT_SUFFIX}"));
    fs::write(&path, serde_json::to_vec(&usage.to_worker_snapshot())?)?;

    debug!(path = %path.display(), "Persisted worker usage snapshot.");
    Ok(())
}

/// Reads every worker snapshot in the given directory.
///
/// A missing directory yields no snapshots. Files that fail to parse are skipped with a warning
/// rather than failing the whole merge: one corrupt worker should not cost the build its report.
///
/// # Errors
///
/// If the directory exists but cannot be listed or a snapshot file cannot be read, an error is
/// returned.
pub fn collect_worker_snapshots(dir: &Path) -> Result<Vec<Value>, GenericError> {
    let mut snapshots = Vec::new();
    if !dir.exists() {
        return Ok(snapshots);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(SNAPSHOT_SUFFIX) {
            continue;
        }

        match serde_json::from_slice(&fs::read(&path)?) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unparseable worker snapshot."),
        }
    }

    Ok(snapshots)
}

/// Folds worker snapshots into the primary process's counters and renders the build report.
pub fn build_usage_report(primary: &UsageStats, snapshots: &[Value], metadata: &ReportMetadata) -> Value {
    let mut total = primary.clone();
    total.add_data_from_workers(snapshots);
    total.to_build_report(metadata)
}
