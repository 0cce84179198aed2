//! Outbound Sample Queue
//!
//! Bounded FIFO of samples awaiting delivery, with a two-phase hand-off to
//! the sender:
//!
//! ```text
//! push ──► pending ──begin_send──► in flight ──acknowledge──► delivered
//!              ▲                       │
//!              └────────requeue────────┘
//! ```
//!
//! # Backpressure
//!
//! The in-flight sample counts toward capacity. When a push would exceed
//! capacity the oldest *pending* sample is evicted; the in-flight sample is
//! never evicted, so with capacity 1 and a send outstanding the incoming
//! sample is the one dropped.
//!
//! Every sample ever pushed is accounted for:
//! `enqueued == delivered + rejected + dropped + len()`.

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use super::sample::Sample;

// =============================================================================
// Types
// =============================================================================

/// Result of pushing a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Stored without eviction.
    Enqueued,
    /// Stored after evicting the oldest pending sample.
    DroppedOldest(Sample),
    /// Queue held only the in-flight sample; the incoming sample was dropped.
    DroppedIncoming(Sample),
}

impl PushOutcome {
    /// Whether a sample was discarded by this push.
    #[must_use]
    pub const fn dropped(&self) -> bool {
        !matches!(self, Self::Enqueued)
    }
}

/// Lifetime counters for a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Samples pushed.
    pub enqueued: u64,
    /// Samples acknowledged by the ingester.
    pub delivered: u64,
    /// Samples the ingester answered with an error.
    pub rejected: u64,
    /// Samples discarded under backpressure.
    pub dropped: u64,
    /// Sends returned to the front after a failure.
    pub requeued: u64,
}

// =============================================================================
// Outbound Queue
// =============================================================================

/// Bounded drop-oldest queue with an in-flight slot.
#[derive(Debug)]
pub struct OutboundQueue {
    pending: VecDeque<Sample>,
    in_flight: Option<Sample>,
    capacity: NonZeroUsize,
    stats: QueueStats,
}

impl OutboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.get().min(4096)),
            in_flight: None,
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Add a sample at the back, evicting if full.
    pub fn push(&mut self, sample: Sample) -> PushOutcome {
        self.stats.enqueued += 1;

        if self.len() < self.capacity.get() {
            self.pending.push_back(sample);
            return PushOutcome::Enqueued;
        }

        self.stats.dropped += 1;
        match self.pending.pop_front() {
            Some(oldest) => {
                self.pending.push_back(sample);
                PushOutcome::DroppedOldest(oldest)
            }
            None => PushOutcome::DroppedIncoming(sample),
        }
    }

    /// Move the front sample into flight and return a copy for sending.
    ///
    /// Returns `None` if the queue is empty or a send is already in flight.
    pub fn begin_send(&mut self) -> Option<Sample> {
        if self.in_flight.is_some() {
            return None;
        }
        let sample = self.pending.pop_front()?;
        self.in_flight = Some(sample.clone());
        Some(sample)
    }

    /// Remove the in-flight sample after the ingester accepted it.
    pub fn acknowledge(&mut self) -> Option<Sample> {
        let sample = self.in_flight.take()?;
        self.stats.delivered += 1;
        Some(sample)
    }

    /// Remove the in-flight sample after the ingester rejected it.
    pub fn reject(&mut self) -> Option<Sample> {
        let sample = self.in_flight.take()?;
        self.stats.rejected += 1;
        Some(sample)
    }

    /// Return the in-flight sample to the front of the queue.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn requeue(&mut self) -> bool {
        match self.in_flight.take() {
            Some(sample) => {
                self.pending.push_front(sample);
                self.stats.requeued += 1;
                true
            }
            None => false,
        }
    }

    /// Samples held, including the one in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    /// Whether the queue holds nothing, in flight or pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Lifetime counters.
    #[must_use]
    pub const fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(n: u32) -> Sample {
        Sample::single("ram", "perc", f64::from(n)).unwrap()
    }

    fn value(s: &Sample) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = s.data()["perc"] as u32;
        v
    }

    fn queue(capacity: usize) -> OutboundQueue {
        OutboundQueue::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn fifo_order() {
        let mut q = queue(8);
        for n in 0..5 {
            assert_eq!(q.push(sample(n)), PushOutcome::Enqueued);
        }
        let mut seen = Vec::new();
        while let Some(s) = q.begin_send() {
            seen.push(value(&s));
            q.acknowledge();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(q.stats().delivered, 5);
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = queue(3);
        for n in 0..3 {
            q.push(sample(n));
        }
        let outcome = q.push(sample(3));
        assert!(matches!(outcome, PushOutcome::DroppedOldest(ref s) if value(s) == 0));
        assert_eq!(q.len(), 3);
        assert_eq!(q.stats().dropped, 1);

        let first = q.begin_send().unwrap();
        assert_eq!(value(&first), 1);
    }

    #[test]
    fn in_flight_is_never_evicted() {
        let mut q = queue(2);
        q.push(sample(0));
        q.push(sample(1));
        let in_flight = q.begin_send().unwrap();
        assert_eq!(value(&in_flight), 0);

        // Evicts 1 (oldest pending), not 0 (in flight).
        let outcome = q.push(sample(2));
        assert!(matches!(outcome, PushOutcome::DroppedOldest(ref s) if value(s) == 1));
        assert_eq!(q.len(), 2);

        assert!(q.requeue());
        assert_eq!(value(&q.begin_send().unwrap()), 0);
        q.acknowledge();
        assert_eq!(value(&q.begin_send().unwrap()), 2);
    }

    #[test]
    fn capacity_one_with_send_outstanding_drops_incoming() {
        let mut q = queue(1);
        q.push(sample(0));
        let _ = q.begin_send().unwrap();
        let outcome = q.push(sample(1));
        assert!(matches!(outcome, PushOutcome::DroppedIncoming(ref s) if value(s) == 1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.stats().dropped, 1);
    }

    #[test]
    fn requeue_puts_sample_back_at_front() {
        let mut q = queue(4);
        q.push(sample(0));
        q.push(sample(1));
        let first = q.begin_send().unwrap();
        assert_eq!(value(&first), 0);
        assert!(q.requeue());
        assert_eq!(q.stats().requeued, 1);
        assert_eq!(value(&q.begin_send().unwrap()), 0);
    }

    #[test]
    fn single_send_in_flight() {
        let mut q = queue(4);
        q.push(sample(0));
        q.push(sample(1));
        assert!(q.begin_send().is_some());
        assert!(q.begin_send().is_none());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn reject_removes_without_delivering() {
        let mut q = queue(4);
        q.push(sample(0));
        let _ = q.begin_send();
        assert!(q.reject().is_some());
        assert_eq!(q.stats().rejected, 1);
        assert_eq!(q.stats().delivered, 0);
        assert!(q.is_empty());
    }

    #[test]
    fn ack_and_requeue_without_in_flight_are_noops() {
        let mut q = queue(4);
        assert!(q.acknowledge().is_none());
        assert!(q.reject().is_none());
        assert!(!q.requeue());
        assert_eq!(q.stats(), QueueStats::default());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push,
        Begin,
        Ack,
        Requeue,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::Push),
            2 => Just(Op::Begin),
            2 => Just(Op::Ack),
            1 => Just(Op::Requeue),
        ]
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity_and_accounts_for_every_sample(
            capacity in 1usize..16,
            ops in proptest::collection::vec(op(), 0..200),
        ) {
            let mut q = queue(capacity);
            let mut next = 0u32;
            let mut delivered = Vec::new();

            for op in ops {
                match op {
                    Op::Push => {
                        q.push(sample(next));
                        next += 1;
                    }
                    Op::Begin => {
                        let _ = q.begin_send();
                    }
                    Op::Ack => {
                        if let Some(s) = q.acknowledge() {
                            delivered.push(value(&s));
                        }
                    }
                    Op::Requeue => {
                        let _ = q.requeue();
                    }
                }

                prop_assert!(q.len() <= capacity);
                let stats = q.stats();
                prop_assert_eq!(
                    stats.enqueued,
                    stats.delivered + stats.rejected + stats.dropped + q.len() as u64
                );
            }

            // Survivors are delivered in production order, never twice.
            prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn overflow_drop_count_matches_excess(capacity in 1usize..32, produced in 0usize..128) {
            let mut q = queue(capacity);
            for n in 0..produced {
                q.push(sample(u32::try_from(n).unwrap()));
            }
            let retained = produced.min(capacity);
            prop_assert_eq!(q.len(), retained);
            prop_assert_eq!(q.stats().dropped, (produced - retained) as u64);

            // The newest `retained` samples survive, oldest first.
            let mut expected = produced - retained;
            while let Some(s) = q.begin_send() {
                prop_assert_eq!(value(&s) as usize, expected);
                expected += 1;
                q.acknowledge();
            }
        }
    }
}
