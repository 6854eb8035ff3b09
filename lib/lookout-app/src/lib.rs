//! Bootstrapping for the telemetry pipeline: logging initialization, pipeline assembly, and the
//! cross-worker snapshot plumbing.
#![deny(warnings)]
#![deny(missing_docs)]

mod logging;
pub use self::logging::initialize_logging;

mod pipeline;
pub use self::pipeline::TelemetryPipeline;

mod snapshot;
pub use self::snapshot::{build_usage_report, collect_worker_snapshots, persist_worker_snapshot};
