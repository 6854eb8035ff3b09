//! Event dispatch.
//!
//! [`EventDispatcher`] is the single API surface framework adapters call into. Every operation
//! fans out to the usage counters and to one of two delivery channels: the batched enqueue path
//! through [`EventQueue`], or the immediate-send path used for screenshots, whose delivery is
//! awaited so a test that terminates right after capturing one cannot strand the upload.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lookout_error::GenericError;
use snafu::{ResultExt as _, Snafu};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::data_model::event::cbt::CbtSession;
use crate::data_model::event::hook_run::HookRun;
use crate::data_model::event::log::{self, LogEntry};
use crate::data_model::event::test_run::TestRun;
use crate::data_model::event::{EventKind, TelemetryEvent};
use crate::queue::{BatchSender, EventQueue, QueueError};
use crate::sender::EventSender;
use crate::usage::{UsageStats, UsageStatus};

/// Policy selecting which event kinds are emitted at all.
///
/// A disabled kind turns the corresponding dispatcher operation into a silent no-op.
#[derive(Clone, Copy, Debug)]
pub struct EmissionPolicy {
    /// Emit test lifecycle events.
    pub test_events: bool,

    /// Emit hook lifecycle events.
    pub hook_events: bool,

    /// Emit log events.
    pub log_events: bool,

    /// Emit screenshot events.
    pub screenshot_events: bool,

    /// Emit cross-browser-test session events.
    pub cbt_session_events: bool,
}

impl EmissionPolicy {
    /// Policy with every event kind enabled.
    pub fn allow_all() -> Self {
        Self {
            test_events: true,
            hook_events: true,
            log_events: true,
            screenshot_events: true,
            cbt_session_events: true,
        }
    }
}

impl Default for EmissionPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

/// An error raised on the dispatch path.
///
/// Dispatch errors are recorded as `failed` on the relevant counter before being returned, so the
/// usage report reflects the loss even when the caller only logs and continues.
#[derive(Debug, Snafu)]
pub enum DispatchError {
    /// The outbound queue rejected the event.
    #[snafu(display("Event was rejected by the outbound queue."))]
    EnqueueRejected {
        /// Error source.
        source: QueueError,
    },
}

/// Counter marks derived from one event, captured before the event is handed off.
///
/// Marking happens both before enqueue (triggered) and after the event has been moved into the
/// queue or onto the wire (success/failed), so the marks are snapshotted up front instead of
/// borrowing the event again later.
struct EventMarks {
    kind: EventKind,
    outcome_group: Option<&'static str>,
    log_kinds: Vec<String>,
}

impl EventMarks {
    fn of(event: &TelemetryEvent) -> Self {
        let outcome_group = match event {
            TelemetryEvent::TestRunFinished { test_run } => test_run.result.map(|r| r.as_group_key()),
            TelemetryEvent::HookRunFinished { hook_run } => hook_run.result.map(|r| r.as_group_key()),
            _ => None,
        };
        let log_kinds = match event {
            TelemetryEvent::LogCreated { logs } => {
                logs.iter().map(|entry| log::normalize_kind(&entry.kind)).collect()
            }
            _ => Vec::new(),
        };

        Self {
            kind: event.kind(),
            outcome_group,
            log_kinds,
        }
    }

    fn apply(&self, usage: &mut UsageStats, status: UsageStatus) {
        match self.kind {
            EventKind::TestRunStarted => usage.test_events_mut().started_mut().mark(status, None),
            EventKind::TestRunFinished => usage
                .test_events_mut()
                .finished_mut()
                .mark(status, self.outcome_group),
            EventKind::HookRunStarted => usage.hook_events_mut().started_mut().mark(status, None),
            EventKind::HookRunFinished => usage
                .hook_events_mut()
                .finished_mut()
                .mark(status, self.outcome_group),
            EventKind::LogCreated => {
                for kind in &self.log_kinds {
                    usage.log_events_mut().mark(status, Some(kind.as_str()));
                }
            }
            EventKind::CbtSessionCreated => usage.cbt_session_events_mut().mark(status, None),
        }
    }
}

fn lock_usage(usage: &Mutex<UsageStats>) -> MutexGuard<'_, UsageStats> {
    usage.lock().unwrap_or_else(|e| e.into_inner())
}

/// Completes the two-phase counting contract for batched events.
///
/// Registered as the queue's sender: each popped batch is handed to the real [`EventSender`], and
/// every event in it is then marked `success` or `failed` from the outcome. Delivery failures are
/// consumed here; the queue layer never sees them.
pub struct DeliveryReconciler {
    sender: Arc<dyn EventSender>,
    usage: Arc<Mutex<UsageStats>>,
}

impl DeliveryReconciler {
    /// Creates a new `DeliveryReconciler` wrapping the given sender.
    pub fn new(sender: Arc<dyn EventSender>, usage: Arc<Mutex<UsageStats>>) -> Self {
        Self { sender, usage }
    }
}

#[async_trait]
impl BatchSender for DeliveryReconciler {
    async fn send_batch(&self, batch: Vec<TelemetryEvent>) -> Result<(), GenericError> {
        let status = match self.sender.send_events(&batch).await {
            Ok(()) => {
                debug!(events = batch.len(), "Event batch delivered.");
                UsageStatus::Success
            }
            Err(e) => {
                error!(error = %e, events = batch.len(), "Failed to deliver event batch.");
                UsageStatus::Failed
            }
        };

        let mut usage = lock_usage(&self.usage);
        for event in &batch {
            EventMarks::of(event).apply(&mut usage, status);
        }

        Ok(())
    }
}

#[derive(Default)]
struct Correlation {
    current_test_uuid: Option<String>,
    pending_cbt: Vec<CbtSession>,
}

/// The single entry point framework adapters report lifecycle transitions to.
pub struct EventDispatcher {
    usage: Arc<Mutex<UsageStats>>,
    queue: Arc<EventQueue>,
    immediate: Arc<dyn EventSender>,
    policy: EmissionPolicy,
    correlation: Mutex<Correlation>,
    pending_uploads: watch::Sender<usize>,
}

impl EventDispatcher {
    /// Creates a new `EventDispatcher`.
    pub fn new(
        usage: Arc<Mutex<UsageStats>>, queue: Arc<EventQueue>, immediate: Arc<dyn EventSender>,
        policy: EmissionPolicy,
    ) -> Self {
        let (pending_uploads, _) = watch::channel(0);
        Self {
            usage,
            queue,
            immediate,
            policy,
            correlation: Mutex::new(Correlation::default()),
            pending_uploads,
        }
    }

    /// The usage counters this dispatcher records into.
    pub fn usage(&self) -> &Arc<Mutex<UsageStats>> {
        &self.usage
    }

    fn correlation(&self) -> MutexGuard<'_, Correlation> {
        self.correlation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the event triggered, then enqueues it. On rejection the triggered mark is settled as
    /// failed before the error is returned.
    fn dispatch(&self, event: TelemetryEvent) -> Result<(), DispatchError> {
        let marks = EventMarks::of(&event);
        marks.apply(&mut lock_usage(&self.usage), UsageStatus::Triggered);

        if let Err(e) = self.queue.add(event) {
            marks.apply(&mut lock_usage(&self.usage), UsageStatus::Failed);
            return Err(e).context(EnqueueRejectedSnafu);
        }

        Ok(())
    }

    /// Reports a started test run.
    ///
    /// Publishes the run's UUID as the process-wide current test, which out-of-band log,
    /// screenshot, and session records are correlated against, and flushes any session records
    /// buffered while no test was active.
    ///
    /// # Errors
    ///
    /// If the event or a buffered session record cannot be enqueued, an error is returned; the
    /// affected counters are marked failed first.
    pub fn test_started(&self, test_run: TestRun) -> Result<(), DispatchError> {
        if !self.policy.test_events {
            return Ok(());
        }

        let uuid = test_run.uuid.clone();
        self.dispatch(TelemetryEvent::TestRunStarted { test_run })?;
        self.publish_test_uuid(uuid)
    }

    /// Reports a finished test run. The outcome is counted under its own group, so failure rates
    /// per outcome stay visible in the usage report.
    ///
    /// # Errors
    ///
    /// If the event cannot be enqueued, an error is returned; the counter is marked failed first.
    pub fn test_finished(&self, test_run: TestRun) -> Result<(), DispatchError> {
        if !self.policy.test_events {
            return Ok(());
        }

        self.dispatch(TelemetryEvent::TestRunFinished { test_run })
    }

    /// Reports a started hook run.
    ///
    /// # Errors
    ///
    /// If the event cannot be enqueued, an error is returned; the counter is marked failed first.
    pub fn hook_started(&self, hook_run: HookRun) -> Result<(), DispatchError> {
        if !self.policy.hook_events {
            return Ok(());
        }

        self.dispatch(TelemetryEvent::HookRunStarted { hook_run })
    }

    /// Reports a finished hook run.
    ///
    /// # Errors
    ///
    /// If the event cannot be enqueued, an error is returned; the counter is marked failed first.
    pub fn hook_finished(&self, hook_run: HookRun) -> Result<(), DispatchError> {
        if !self.policy.hook_events {
            return Ok(());
        }

        self.dispatch(TelemetryEvent::HookRunFinished { hook_run })
    }

    /// Reports a batch of log entries as one event.
    ///
    /// The whole array travels in a single envelope; entries are counted individually by
    /// normalized kind. Entries with no test run attribution are stamped with the current test.
    ///
    /// # Errors
    ///
    /// If the event cannot be enqueued, an error is returned; the counters are marked failed
    /// first.
    pub fn log_created(&self, mut entries: Vec<LogEntry>) -> Result<(), DispatchError> {
        if !self.policy.log_events || entries.is_empty() {
            return Ok(());
        }

        self.stamp_current_test(&mut entries);
        self.dispatch(TelemetryEvent::LogCreated { logs: entries })
    }

    /// Reports captured screenshots, bypassing the queue.
    ///
    /// The send is awaited before returning: a screenshot is tied to a test that may terminate
    /// immediately afterwards, so batching latency would risk losing it. While the send is in
    /// flight the pending-upload count is raised; it is lowered again on both outcomes. Delivery
    /// failures are consumed here and only visible in the counters.
    pub async fn screenshot_created(&self, mut entries: Vec<LogEntry>) {
        if !self.policy.screenshot_events || entries.is_empty() {
            return;
        }

        self.stamp_current_test(&mut entries);
        let event = TelemetryEvent::LogCreated { logs: entries };
        let marks = EventMarks::of(&event);
        marks.apply(&mut lock_usage(&self.usage), UsageStatus::Triggered);

        let _pending = PendingUpload::begin(&self.pending_uploads);
        let status = match self.immediate.send_events(std::slice::from_ref(&event)).await {
            Ok(()) => UsageStatus::Success,
            Err(e) => {
                error!(error = %e, "Failed to upload screenshot event.");
                UsageStatus::Failed
            }
        };
        marks.apply(&mut lock_usage(&self.usage), status);
    }

    /// Reports a cross-browser-test session record.
    ///
    /// When no current test is known yet the record is buffered; it is flushed, stamped with the
    /// test's UUID, once the next test starts. A known test UUID is consumed by the first record
    /// (or buffered batch) that uses it.
    ///
    /// # Errors
    ///
    /// If the event cannot be enqueued, an error is returned; the counter is marked failed first.
    pub fn cbt_session_created(&self, mut session: CbtSession) -> Result<(), DispatchError> {
        if !self.policy.cbt_session_events {
            return Ok(());
        }

        let uuid = {
            let mut correlation = self.correlation();
            match correlation.current_test_uuid.take() {
                Some(uuid) => uuid,
                None => {
                    debug!("No active test run; buffering session record.");
                    correlation.pending_cbt.push(session);
                    return Ok(());
                }
            }
        };

        session.test_run_uuid = Some(uuid);
        self.dispatch(TelemetryEvent::CbtSessionCreated { test_run: session })
    }

    /// Blocks until no screenshot uploads are in flight, or the timeout elapses.
    ///
    /// Returns `true` if the count reached zero in time.
    pub async fn wait_for_pending_uploads(&self, timeout: Duration) -> bool {
        let mut uploads = self.pending_uploads.subscribe();
        tokio::time::timeout(timeout, uploads.wait_for(|count| *count == 0))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Number of screenshot uploads currently in flight.
    pub fn pending_uploads(&self) -> usize {
        *self.pending_uploads.borrow()
    }

    fn stamp_current_test(&self, entries: &mut [LogEntry]) {
        let correlation = self.correlation();
        if let Some(uuid) = &correlation.current_test_uuid {
            for entry in entries.iter_mut().filter(|e| e.test_run_uuid.is_none()) {
                entry.test_run_uuid = Some(uuid.clone());
            }
        }
    }

    fn publish_test_uuid(&self, uuid: String) -> Result<(), DispatchError> {
        let pending = {
            let mut correlation = self.correlation();
            correlation.current_test_uuid = Some(uuid.clone());
            if correlation.pending_cbt.is_empty() {
                return Ok(());
            }

            // The flush consumes the UUID; records arriving later buffer for the next test.
            correlation.current_test_uuid = None;
            std::mem::take(&mut correlation.pending_cbt)
        };

        for mut session in pending {
            session.test_run_uuid = Some(uuid.clone());
            self.dispatch(TelemetryEvent::CbtSessionCreated { test_run: session })?;
        }

        Ok(())
    }
}

/// Raises the pending-upload count for the duration of one send, lowering it again on drop so
/// both outcome paths settle the count.
struct PendingUpload<'a> {
    uploads: &'a watch::Sender<usize>,
}

impl<'a> PendingUpload<'a> {
    fn begin(uploads: &'a watch::Sender<usize>) -> Self {
        uploads.send_modify(|count| *count += 1);
        Self { uploads }
    }
}

impl Drop for PendingUpload<'_> {
    fn drop(&mut self) {
        self.uploads.send_modify(|count| *count = count.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use lookout_error::generic_error;

    use super::*;
    use crate::context::BuildContext;
    use crate::data_model::event::hook_run::HookType;
    use crate::data_model::event::test_run::RunResult;
    use crate::sender::SendError;

    struct MockSender {
        sent: Mutex<Vec<TelemetryEvent>>,
        fail: AtomicBool,
    }

    impl MockSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn sent_events(&self) -> Vec<TelemetryEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSender for MockSender {
        async fn send_events(&self, events: &[TelemetryEvent]) -> Result<(), SendError> {
            if self.fail.load(Ordering::Acquire) {
                return Err(SendError::Delivery {
                    source: generic_error!("intake unavailable"),
                });
            }
            self.sent.lock().unwrap().extend_from_slice(events);
            Ok(())
        }
    }

    struct Harness {
        sender: Arc<MockSender>,
        queue: Arc<EventQueue>,
        dispatcher: EventDispatcher,
    }

    fn harness_with(batch_size: usize, policy: EmissionPolicy, ready: bool) -> Harness {
        let context = Arc::new(BuildContext::new());
        if ready {
            context.mark_ready("build-1", "token-1");
        }

        let sender = MockSender::new();
        let usage = Arc::new(Mutex::new(UsageStats::new()));
        let reconciler = Arc::new(DeliveryReconciler::new(sender.clone(), usage.clone()));
        let queue = Arc::new(EventQueue::new(
            batch_size,
            Duration::from_secs(60),
            reconciler,
            context,
        ));
        let dispatcher = EventDispatcher::new(usage, queue.clone(), sender.clone(), policy);

        Harness {
            sender,
            queue,
            dispatcher,
        }
    }

    fn harness(batch_size: usize) -> Harness {
        harness_with(batch_size, EmissionPolicy::allow_all(), true)
    }

    #[tokio::test]
    async fn two_phase_counting_over_full_run() {
        let h = harness(10);

        for i in 0..25 {
            h.dispatcher
                .test_started(TestRun::new(format!("test {i}"), format!("suite > test {i}")))
                .unwrap();
        }

        {
            let usage = h.dispatcher.usage().lock().unwrap();
            assert_eq!(usage.test_events().started().triggered_count(), 25);
            assert_eq!(usage.test_events().started().sent_count(), 0);
        }

        h.queue.shutdown().await;

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.test_events().started().triggered_count(), 25);
        assert_eq!(usage.test_events().started().sent_count(), 25);
        assert_eq!(usage.test_events().started().failed_count(), 0);
        assert_eq!(h.sender.sent_events().len(), 25);
    }

    #[tokio::test]
    async fn failed_batches_are_counted_not_retried() {
        let h = harness(10);
        h.sender.fail.store(true, Ordering::Release);

        for i in 0..10 {
            h.dispatcher
                .test_started(TestRun::new(format!("test {i}"), format!("suite > test {i}")))
                .unwrap();
        }
        h.queue.shutdown().await;

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.test_events().started().triggered_count(), 10);
        assert_eq!(usage.test_events().started().sent_count(), 0);
        assert_eq!(usage.test_events().started().failed_count(), 10);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn finished_runs_count_under_their_outcome() {
        let h = harness(10);

        h.dispatcher
            .test_finished(TestRun::new("a", "s > a").finished(RunResult::Passed, None))
            .unwrap();
        h.dispatcher
            .test_finished(
                TestRun::new("b", "s > b").finished(RunResult::Failed, Some("boom".to_string())),
            )
            .unwrap();
        h.queue.shutdown().await;

        let usage = h.dispatcher.usage().lock().unwrap();
        let finished = usage.test_events().finished();
        assert_eq!(finished.triggered_count(), 2);
        assert_eq!(finished.group("passed").unwrap().sent_count(), 1);
        assert_eq!(finished.group("failed").unwrap().sent_count(), 1);
    }

    #[tokio::test]
    async fn hook_lifecycle_is_counted() {
        let h = harness(10);

        let hook = HookRun::new("setup", HookType::BeforeEach);
        h.dispatcher.hook_started(hook.clone()).unwrap();
        h.dispatcher
            .hook_finished(hook.finished(RunResult::Passed, None))
            .unwrap();
        h.queue.shutdown().await;

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.hook_events().started().sent_count(), 1);
        assert_eq!(
            usage.hook_events().finished().group("passed").unwrap().sent_count(),
            1
        );
    }

    #[tokio::test]
    async fn log_batch_travels_whole_and_counts_per_kind() {
        let h = harness(10);

        h.dispatcher
            .test_started(TestRun::new("test", "suite > test"))
            .unwrap();
        h.dispatcher
            .log_created(vec![
                LogEntry::new("test_log", "first"),
                LogEntry::new("test_log", "second"),
                LogEntry::new("http", "GET /health"),
            ])
            .unwrap();
        h.queue.shutdown().await;

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.log_events().triggered_count(), 3);
        assert_eq!(usage.log_events().group("TEST_LOG").unwrap().sent_count(), 2);
        assert_eq!(usage.log_events().group("HTTP").unwrap().sent_count(), 1);
        drop(usage);

        // One test-start envelope plus exactly one log envelope carrying all three entries.
        let sent = h.sender.sent_events();
        assert_eq!(sent.len(), 2);
        let logs = sent
            .iter()
            .find_map(|event| event.try_as_logs())
            .expect("log envelope missing");
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|entry| entry.test_run_uuid.is_some()));
    }

    #[tokio::test]
    async fn screenshot_bypasses_queue_and_settles_uploads() {
        let h = harness(10);

        h.dispatcher
            .screenshot_created(vec![LogEntry::screenshot("s3://bucket/shot.png")])
            .await;

        assert_eq!(h.dispatcher.pending_uploads(), 0);
        assert!(h.queue.is_empty());
        assert_eq!(h.sender.sent_events().len(), 1);

        let usage = h.dispatcher.usage().lock().unwrap();
        let screenshots = usage.log_events().group(log::TEST_SCREENSHOT).unwrap();
        assert_eq!(screenshots.triggered_count(), 1);
        assert_eq!(screenshots.sent_count(), 1);
        assert!(h.dispatcher.wait_for_pending_uploads(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn failed_screenshot_counts_failed_and_releases_uploads() {
        let h = harness(10);
        h.sender.fail.store(true, Ordering::Release);

        h.dispatcher
            .screenshot_created(vec![LogEntry::screenshot("s3://bucket/shot.png")])
            .await;

        assert_eq!(h.dispatcher.pending_uploads(), 0);
        let usage = h.dispatcher.usage().lock().unwrap();
        let screenshots = usage.log_events().group(log::TEST_SCREENSHOT).unwrap();
        assert_eq!(screenshots.sent_count(), 0);
        assert_eq!(screenshots.failed_count(), 1);
    }

    #[tokio::test]
    async fn session_records_buffer_until_a_test_starts() {
        let h = harness(10);

        h.dispatcher
            .cbt_session_created(CbtSession::new("session-1"))
            .unwrap();
        {
            let usage = h.dispatcher.usage().lock().unwrap();
            assert_eq!(usage.cbt_session_events().triggered_count(), 0);
        }

        let test_run = TestRun::new("test", "suite > test");
        let test_uuid = test_run.uuid.clone();
        h.dispatcher.test_started(test_run).unwrap();
        h.queue.shutdown().await;

        let sent = h.sender.sent_events();
        let session = sent
            .iter()
            .find_map(|event| event.try_as_cbt_session())
            .expect("session envelope missing");
        assert_eq!(session.test_run_uuid.as_deref(), Some(test_uuid.as_str()));

        // The flush consumed the UUID, so the next record buffers again.
        h.dispatcher
            .cbt_session_created(CbtSession::new("session-2"))
            .unwrap();
        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.cbt_session_events().triggered_count(), 1);
    }

    #[tokio::test]
    async fn session_record_after_test_start_consumes_uuid_directly() {
        let h = harness(10);

        let test_run = TestRun::new("test", "suite > test");
        let test_uuid = test_run.uuid.clone();
        h.dispatcher.test_started(test_run).unwrap();

        h.dispatcher
            .cbt_session_created(CbtSession::new("session-1"))
            .unwrap();
        h.queue.shutdown().await;

        let sent = h.sender.sent_events();
        let session = sent
            .iter()
            .find_map(|event| event.try_as_cbt_session())
            .expect("session envelope missing");
        assert_eq!(session.test_run_uuid.as_deref(), Some(test_uuid.as_str()));
    }

    #[tokio::test]
    async fn enqueue_rejection_settles_counter_as_failed() {
        let h = harness_with(10, EmissionPolicy::allow_all(), false);

        let result = h.dispatcher.test_started(TestRun::new("test", "suite > test"));
        assert!(matches!(
            result,
            Err(DispatchError::EnqueueRejected {
                source: QueueError::NotReady
            })
        ));

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.test_events().started().triggered_count(), 1);
        assert_eq!(usage.test_events().started().failed_count(), 1);
        assert_eq!(usage.test_events().started().sent_count(), 0);
    }

    #[tokio::test]
    async fn disabled_kinds_are_silent_noops() {
        let policy = EmissionPolicy {
            test_events: false,
            log_events: false,
            ..EmissionPolicy::allow_all()
        };
        let h = harness_with(10, policy, true);

        h.dispatcher
            .test_started(TestRun::new("test", "suite > test"))
            .unwrap();
        h.dispatcher
            .log_created(vec![LogEntry::new("test_log", "line")])
            .unwrap();

        let usage = h.dispatcher.usage().lock().unwrap();
        assert_eq!(usage.test_events().started().triggered_count(), 0);
        assert_eq!(usage.log_events().triggered_count(), 0);
        drop(usage);
        assert!(h.queue.is_empty());
    }
}
