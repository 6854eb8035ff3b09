//! Buffered, batched delivery of outbound events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lookout_error::GenericError;
use snafu::Snafu;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tracing::{debug, error};

use crate::context::BuildContext;
use crate::data_model::event::TelemetryEvent;

/// Receives batches popped from the queue.
///
/// Ownership of the events passes to the sender with each call: a batch is never retained by the
/// queue after the send attempt, whether it succeeded or not.
#[async_trait]
pub trait BatchSender: Send + Sync {
    /// Sends one batch of events.
    async fn send_batch(&self, batch: Vec<TelemetryEvent>) -> Result<(), GenericError>;
}

/// An error encountered while enqueuing an event.
#[derive(Debug, Snafu)]
pub enum QueueError {
    /// The build-start handshake has not completed.
    #[snafu(display("Build has not been acknowledged yet; events cannot be enqueued."))]
    NotReady,
}

/// In-memory FIFO buffer of outbound events, flushed in bounded batches.
///
/// Batches leave the buffer when it reaches the configured batch size, when the poll timer ticks,
/// and during the shutdown drain. The queue moves through four conceptual states: idle on
/// construction, polling once the timer is armed, draining while `shutdown` empties the buffer,
/// and stopped once the drain completes. There is no way back from stopped, but late events are
/// still accepted and force-flushed immediately so nothing is silently dropped at process exit.
///
/// Delivery is at-most-once: a batch handed to the sender is never re-enqueued, regardless of the
/// send outcome.
pub struct EventQueue {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: Mutex<VecDeque<TelemetryEvent>>,
    batch_size: usize,
    flush_interval: Duration,
    sender: Arc<dyn BatchSender>,
    context: Arc<BuildContext>,
    teardown: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<JoinSet<()>>,
}

impl Inner {
    fn buffer(&self) -> MutexGuard<'_, VecDeque<TelemetryEvent>> {
        // Counters and events survive a panicked holder just fine; recover the guard.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn flush_once(&self) -> Result<(), GenericError> {
        let batch = {
            let mut buffer = self.buffer();
            if buffer.is_empty() {
                return Ok(());
            }

            let take = buffer.len().min(self.batch_size);
            buffer.drain(..take).collect::<Vec<_>>()
        };

        debug!(events = batch.len(), "Flushing event batch.");
        self.sender.send_batch(batch).await
    }
}

impl EventQueue {
    /// Creates a new `EventQueue`.
    ///
    /// The queue does not flush on its own until [`start_polling`] is called, though
    /// threshold-triggered flushes happen from the first `add`.
    ///
    /// [`start_polling`]: Self::start_polling
    pub fn new(
        batch_size: usize, flush_interval: Duration, sender: Arc<dyn BatchSender>, context: Arc<BuildContext>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::new()),
                batch_size: batch_size.max(1),
                flush_interval,
                sender,
                context,
                teardown: AtomicBool::new(false),
                poller: Mutex::new(None),
                in_flight: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Appends an event to the tail of the buffer.
    ///
    /// When the buffer reaches the batch size, or tear-down has begun, a flush is kicked off
    /// asynchronously; its failure is logged and never surfaced to the caller. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// If the build-start handshake has not completed, an error is returned and the buffer is
    /// left untouched.
    pub fn add(&self, event: TelemetryEvent) -> Result<(), QueueError> {
        if !self.inner.context.is_ready() {
            return Err(QueueError::NotReady);
        }

        let should_flush = {
            let mut buffer = self.inner.buffer();
            buffer.push_back(event);
            buffer.len() >= self.inner.batch_size || self.inner.teardown.load(Ordering::Acquire)
        };

        if should_flush {
            self.spawn_flush();
        }

        Ok(())
    }

    fn spawn_flush(&self) {
        let inner = Arc::clone(&self.inner);
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.spawn(async move {
            if let Err(e) = inner.flush_once().await {
                error!(error = %e, "Failed to flush event batch.");
            }
        });
    }

    /// Arms the repeating flush timer. Safe to call more than once; later calls are no-ops.
    pub fn start_polling(&self) {
        let mut poller = self.inner.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *poller = Some(tokio::spawn(async move {
            let mut ticker = interval(inner.flush_interval);
            // The first tick completes immediately; consume it so flushing starts one full
            // interval from now.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = inner.flush_once().await {
                    error!(error = %e, "Failed to flush event batch.");
                }
            }
        }));

        debug!(interval = ?self.inner.flush_interval, "Event queue polling started.");
    }

    /// Pops up to one batch off the head of the buffer and sends it. No-op on an empty buffer.
    ///
    /// # Errors
    ///
    /// If the send fails, the error is returned; the popped events are not re-enqueued.
    pub async fn flush_once(&self) -> Result<(), GenericError> {
        self.inner.flush_once().await
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.inner.buffer().len()
    }

    /// Returns `true` if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.buffer().is_empty()
    }

    /// Disarms the timer, then drains the buffer batch by batch, awaiting each send before
    /// issuing the next.
    ///
    /// Idempotent. Sends already dispatched before the call continue independently and are
    /// awaited at the end, so the counters they reconcile are settled once this returns.
    pub async fn shutdown(&self) {
        if let Some(poller) = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            poller.abort();
        }

        self.inner.teardown.store(true, Ordering::Release);

        loop {
            if let Err(e) = self.inner.flush_once().await {
                error!(error = %e, "Failed to flush event batch during drain.");
            }
            if self.inner.buffer().is_empty() {
                break;
            }
        }

        // Settle flushes that were kicked off by threshold triggers and are still in flight.
        loop {
            let mut in_flight = {
                let mut guard = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *guard)
            };
            if in_flight.is_empty() {
                break;
            }
            while in_flight.join_next().await.is_some() {}
        }

        debug!("Event queue drained and stopped.");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lookout_error::generic_error;

    use super::*;
    use crate::data_model::event::test_run::TestRun;

    struct RecordingSender {
        batches: Mutex<Vec<usize>>,
        fail: AtomicBool,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSender for RecordingSender {
        async fn send_batch(&self, batch: Vec<TelemetryEvent>) -> Result<(), GenericError> {
            self.batches.lock().unwrap().push(batch.len());
            if self.fail.load(Ordering::Acquire) {
                return Err(generic_error!("send rejected"));
            }
            Ok(())
        }
    }

    fn ready_context() -> Arc<BuildContext> {
        let context = Arc::new(BuildContext::new());
        context.mark_ready("build-1", "token-1");
        context
    }

    fn test_event(i: usize) -> TelemetryEvent {
        TelemetryEvent::TestRunStarted {
            test_run: TestRun::new(format!("test {i}"), format!("suite > test {i}")),
        }
    }

    #[tokio::test]
    async fn add_before_build_ready_is_rejected() {
        let sender = RecordingSender::new();
        let queue = EventQueue::new(
            10,
            Duration::from_secs(60),
            sender.clone(),
            Arc::new(BuildContext::new()),
        );

        assert!(matches!(queue.add(test_event(0)), Err(QueueError::NotReady)));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn threshold_flushes_full_batches_only() {
        let sender = RecordingSender::new();
        let queue = EventQueue::new(10, Duration::from_secs(60), sender.clone(), ready_context());

        for i in 0..25 {
            queue.add(test_event(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sender.batch_sizes(), vec![10, 10]);
        assert_eq!(queue.len(), 5);
    }

    #[tokio::test]
    async fn shutdown_drains_the_remainder() {
        let sender = RecordingSender::new();
        let queue = EventQueue::new(10, Duration::from_secs(60), sender.clone(), ready_context());

        for i in 0..25 {
            queue.add(test_event(i)).unwrap();
        }
        queue.shutdown().await;

        let sizes = sender.batch_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 25);
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn late_adds_after_teardown_force_flush() {
        let sender = RecordingSender::new();
        let queue = EventQueue::new(10, Duration::from_secs(60), sender.clone(), ready_context());

        queue.shutdown().await;
        queue.add(test_event(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sender.batch_sizes(), vec![1]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn send_failures_do_not_reenqueue() {
        let sender = RecordingSender::new();
        sender.fail.store(true, Ordering::Release);
        let queue = EventQueue::new(10, Duration::from_secs(60), sender.clone(), ready_context());

        for i in 0..10 {
            queue.add(test_event(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sender.batch_sizes(), vec![10]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batches() {
        let sender = RecordingSender::new();
        let queue = EventQueue::new(10, Duration::from_millis(50), sender.clone(), ready_context());
        queue.start_polling();

        for i in 0..3 {
            queue.add(test_event(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(sender.batch_sizes(), vec![3]);
        assert!(queue.is_empty());
    }
}
