//! Delivery Pipeline
//!
//! Two joined loops around the outbound queue:
//!
//! - **produce**: pulls one sample per interval and enqueues it
//! - **drain**: sends the queue front over the live session, one message at
//!   a time, and waits for each acknowledgement before moving on
//!
//! A failed send requeues the sample at the front and invalidates the
//! session, so the same sample goes out first on the next session.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session_manager::{ActiveSession, SessionEnd, SessionStatus};
use crate::application::ports::{Ack, SampleSource};
use crate::domain::queue::{OutboundQueue, PushOutcome, QueueStats};
use crate::domain::sample::Sample;
use crate::infrastructure::metrics;

// =============================================================================
// Shared Queue
// =============================================================================

/// Point-in-time view of the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Samples held, including the one in flight.
    pub len: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Lifetime counters.
    pub stats: QueueStats,
}

/// Outbound queue shared by the producer, the drain loop, and the health
/// endpoint.
#[derive(Debug)]
pub struct SharedQueue {
    inner: Mutex<OutboundQueue>,
    notify: Notify,
}

impl SharedQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(OutboundQueue::new(capacity)),
            notify: Notify::new(),
        }
    }

    /// Enqueue a sample, evicting the oldest pending one if full.
    pub fn push(&self, sample: Sample) -> PushOutcome {
        let (outcome, depth) = {
            let mut queue = self.inner.lock();
            let outcome = queue.push(sample);
            (outcome, queue.len())
        };

        if outcome.dropped() {
            metrics::record_sample_dropped();
            tracing::debug!(depth, "Outbound queue full, dropped a sample");
        }
        metrics::set_queue_depth(depth);
        self.notify.notify_one();
        outcome
    }

    /// Move the front sample into flight, if any and none is in flight.
    pub fn try_begin_send(&self) -> Option<Sample> {
        self.inner.lock().begin_send()
    }

    /// Resolve the in-flight sample as delivered.
    pub fn acknowledge(&self) {
        self.settle(OutboundQueue::acknowledge);
    }

    /// Resolve the in-flight sample as refused by the ingester.
    pub fn reject(&self) {
        self.settle(OutboundQueue::reject);
    }

    /// Put the in-flight sample back at the front.
    pub fn requeue(&self) {
        let requeued = self.inner.lock().requeue();
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Current length, capacity, and counters.
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let queue = self.inner.lock();
        QueueSnapshot {
            len: queue.len(),
            capacity: queue.capacity(),
            stats: queue.stats(),
        }
    }

    fn settle(&self, resolve: fn(&mut OutboundQueue) -> Option<Sample>) {
        let depth = {
            let mut queue = self.inner.lock();
            resolve(&mut queue);
            queue.len()
        };
        metrics::set_queue_depth(depth);
    }

    fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Time between samples.
    pub sample_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
        }
    }
}

/// How the drain loop left a session.
enum DrainExit {
    /// The session died; wait for the next one.
    SessionLost,
    /// Shutdown drain finished or forced termination fired.
    Finished,
}

/// Producer and drain loops bound to one queue.
pub struct DeliveryPipeline {
    config: PipelineConfig,
    queue: Arc<SharedQueue>,
    source: Box<dyn SampleSource>,
}

impl DeliveryPipeline {
    /// Create a pipeline that fills `queue` from `source`.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        queue: Arc<SharedQueue>,
        source: Box<dyn SampleSource>,
    ) -> Self {
        Self {
            config,
            queue,
            source,
        }
    }

    /// The queue this pipeline drains.
    #[must_use]
    pub fn queue(&self) -> Arc<SharedQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until drained after `shutdown`, or until `terminate`.
    ///
    /// `shutdown` stops production and switches the drain loop into drain
    /// mode: it keeps sending over the live session and returns once the
    /// queue is empty or no session is live. `terminate` aborts at once,
    /// returning any in-flight sample to the queue.
    pub async fn run(
        self,
        status_rx: watch::Receiver<SessionStatus>,
        shutdown: CancellationToken,
        terminate: CancellationToken,
    ) {
        let Self {
            config,
            queue,
            source,
        } = self;

        tokio::join!(
            produce(source, &queue, config.sample_interval, &shutdown),
            drain(&queue, status_rx, &shutdown, &terminate),
        );
        tracing::debug!("Delivery pipeline stopped");
    }
}

async fn produce(
    mut source: Box<dyn SampleSource>,
    queue: &SharedQueue,
    interval: Duration,
    shutdown: &CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match source.next_sample() {
            Ok(sample) => {
                metrics::record_sample_produced();
                queue.push(sample);
            }
            Err(err) => {
                metrics::record_sample_skipped();
                tracing::warn!(error = %err, "Sample skipped");
            }
        }
    }
    tracing::debug!("Producer stopped");
}

async fn drain(
    queue: &SharedQueue,
    mut status_rx: watch::Receiver<SessionStatus>,
    shutdown: &CancellationToken,
    terminate: &CancellationToken,
) {
    loop {
        let Some(session) = await_session(&mut status_rx, shutdown, terminate).await else {
            return;
        };

        tracing::debug!(
            session_id = %session.id(),
            generation = session.generation(),
            "Draining over session"
        );

        match drain_session(queue, &session, shutdown, terminate).await {
            DrainExit::SessionLost => {}
            DrainExit::Finished => return,
        }
    }
}

/// Wait for a live session. `None` means stop draining.
async fn await_session(
    status_rx: &mut watch::Receiver<SessionStatus>,
    shutdown: &CancellationToken,
    terminate: &CancellationToken,
) -> Option<Arc<ActiveSession>> {
    loop {
        let live = status_rx.borrow_and_update().live_session();
        if live.is_some() {
            return live;
        }
        if shutdown.is_cancelled() {
            tracing::debug!("No live session to drain over");
            return None;
        }

        tokio::select! {
            biased;
            () = terminate.cancelled() => return None,
            () = shutdown.cancelled() => {}
            changed = status_rx.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
        }
    }
}

async fn drain_session(
    queue: &SharedQueue,
    session: &ActiveSession,
    shutdown: &CancellationToken,
    terminate: &CancellationToken,
) -> DrainExit {
    loop {
        let sample = loop {
            let notified = queue.notified();
            if let Some(sample) = queue.try_begin_send() {
                break sample;
            }
            if shutdown.is_cancelled() {
                tracing::debug!("Outbound queue drained");
                return DrainExit::Finished;
            }

            tokio::select! {
                biased;
                () = terminate.cancelled() => return DrainExit::Finished,
                () = session.closed() => return DrainExit::SessionLost,
                () = shutdown.cancelled() => {}
                () = notified => {}
            }
        };

        if !session.is_live() {
            queue.requeue();
            return DrainExit::SessionLost;
        }

        let frame = match sample.to_wire().encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "Sample could not be encoded, discarding");
                queue.reject();
                metrics::record_sample_rejected();
                continue;
            }
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = terminate.cancelled() => {
                queue.requeue();
                return DrainExit::Finished;
            }
            result = session.send(frame) => result,
        };

        match result {
            Ok(Ack::Accepted) => {
                queue.acknowledge();
                metrics::record_sample_sent(started.elapsed());
                tracing::trace!(metric_set = sample.metric_set(), "Sample delivered");
            }
            Ok(Ack::Rejected(reason)) => {
                queue.reject();
                metrics::record_sample_rejected();
                tracing::warn!(
                    metric_set = sample.metric_set(),
                    reason = %reason,
                    "Ingester rejected sample"
                );
            }
            Err(err) => {
                queue.requeue();
                metrics::record_send_error(&err);
                tracing::warn!(
                    session_id = %session.id(),
                    error = %err,
                    "Send failed, sample requeued"
                );
                session.invalidate(SessionEnd::from(&err));
                return DrainExit::SessionLost;
            }
        }
    }
}
