//! Pipeline assembly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lookout_config::{EnabledEvents, TelemetryConfiguration};
use lookout_core::context::BuildContext;
use lookout_core::dispatcher::{DeliveryReconciler, EmissionPolicy, EventDispatcher};
use lookout_core::queue::EventQueue;
use lookout_core::usage::{ReportMetadata, UsageStats};
use lookout_error::GenericError;
use lookout_io::IntakeClient;
use tracing::debug;

/// A fully-wired telemetry pipeline for one worker process.
///
/// Constructed once at process start; every collaborator is owned here and injected into the
/// others, so tests and embedders can run isolated instances side by side.
pub struct TelemetryPipeline {
    context: Arc<BuildContext>,
    usage: Arc<Mutex<UsageStats>>,
    queue: Arc<EventQueue>,
    dispatcher: Arc<EventDispatcher>,
    pending_uploads_wait: Duration,
    enabled: bool,
}

impl TelemetryPipeline {
    /// Assembles a pipeline from the given configuration.
    ///
    /// The pipeline starts gated: events are rejected until [`build_started`] records the intake
    /// service's acknowledgment.
    ///
    /// [`build_started`]: Self::build_started
    pub fn from_configuration(config: &TelemetryConfiguration) -> Result<Self, GenericError> {
        let context = Arc::new(BuildContext::new());
        let usage = Arc::new(Mutex::new(UsageStats::new()));

        let client = Arc::new(IntakeClient::new(config.intake_url(), Arc::clone(&context))?);
        let reconciler = Arc::new(DeliveryReconciler::new(client.clone(), Arc::clone(&usage)));
        let queue = Arc::new(EventQueue::new(
            config.batch_size(),
            config.poll_interval(),
            reconciler,
            Arc::clone(&context),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&usage),
            Arc::clone(&queue),
            client,
            policy_from(config.enabled()),
        ));

        Ok(Self {
            context,
            usage,
            queue,
            dispatcher,
            pending_uploads_wait: config.pending_uploads_wait(),
            enabled: any_enabled(config.enabled()),
        })
    }

    /// The dispatcher framework adapters report into.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// The shared build context.
    pub fn context(&self) -> &Arc<BuildContext> {
        &self.context
    }

    /// The outbound event queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The usage counters recorded by this pipeline.
    pub fn usage(&self) -> &Arc<Mutex<UsageStats>> {
        &self.usage
    }

    /// Records the intake service's build acknowledgment, opens the event gate, and arms the
    /// flush timer.
    pub fn build_started(&self, build_hashed_id: impl Into<String>, auth_token: impl Into<String>) {
        {
            let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
            usage.build_events_mut().started_mut().triggered();
            usage.build_events_mut().started_mut().success();
        }

        self.context.mark_ready(build_hashed_id, auth_token);
        self.queue.start_polling();
        debug!("Build acknowledged; telemetry pipeline running.");
    }

    /// Records a failed build-start handshake. The gate stays shut, so all subsequent events are
    /// rejected and counted as failed.
    pub fn build_start_failed(&self, error: impl Into<String>) {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        usage.build_events_mut().started_mut().triggered();
        usage.build_events_mut().started_mut().failed(error);
    }

    /// Shuts the pipeline down: waits out in-flight screenshot uploads, then drains the queue.
    ///
    /// Returns once the buffer is empty and all dispatched sends have settled.
    pub async fn shutdown(&self) {
        {
            let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
            usage.build_events_mut().finished_mut().triggered();
        }

        if !self
            .dispatcher
            .wait_for_pending_uploads(self.pending_uploads_wait)
            .await
        {
            debug!("Timed out waiting for pending screenshot uploads.");
        }
        self.queue.shutdown().await;

        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        usage.build_events_mut().finished_mut().success();
    }

    /// Report metadata describing this pipeline's build.
    pub fn report_metadata(&self, manually_set: bool) -> ReportMetadata {
        ReportMetadata {
            enabled: self.enabled,
            manually_set,
            build_hashed_id: self.context.build_hashed_id(),
        }
    }
}

fn policy_from(enabled: &EnabledEvents) -> EmissionPolicy {
    EmissionPolicy {
        test_events: enabled.test_events,
        hook_events: enabled.hook_events,
        log_events: enabled.log_events,
        screenshot_events: enabled.screenshot_events,
        cbt_session_events: enabled.cbt_session_events,
    }
}

fn any_enabled(enabled: &EnabledEvents) -> bool {
    enabled.test_events
        || enabled.hook_events
        || enabled.log_events
        || enabled.screenshot_events
        || enabled.cbt_session_events
}
