//! Bounded multi-producer/single-consumer frame bus.
//!
//! All capture loops share one `FrameBus`; exactly one batching consumer
//! drains it. The bus owns the overflow policy: a full bus evicts its oldest
//! envelope to admit the new one, so producers never block and memory stays
//! bounded at `capacity` envelopes.
//!
//! Global insertion order is FIFO. Per-source FIFO follows from global FIFO
//! plus monotonic sequence numbers; cross-source interleaving is
//! insertion-order, with no fairness guarantee between fast and slow sources.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::frame::FrameEnvelope;
use crate::stats::PipelineStats;

/// Result of a non-blocking enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Stored,
    /// The bus was full; the oldest envelope was evicted to make room.
    StoredEvictedOldest,
}

/// Result of a consumer dequeue.
#[derive(Debug)]
pub enum Dequeued {
    Frame(FrameEnvelope),
    /// Nothing arrived within the timeout; the consumer may flush a
    /// partial batch and poll again.
    TimedOut,
    /// The bus is closed and fully drained.
    Closed,
}

struct BusInner {
    queue: VecDeque<FrameEnvelope>,
    closed: bool,
}

/// Bounded drop-oldest frame queue shared by all capture loops.
pub struct FrameBus {
    inner: Mutex<BusInner>,
    available: Condvar,
    capacity: usize,
    stats: Arc<PipelineStats>,
}

impl FrameBus {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        assert!(capacity > 0, "frame bus capacity must be > 0");
        Self {
            inner: Mutex::new(BusInner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("bus lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("bus lock").closed
    }

    /// Non-blocking enqueue with atomic evict-then-insert.
    ///
    /// Fails only on a closed bus. The drop and enqueue counters are updated
    /// under the same lock acquisition as the eviction decision, so the
    /// accounting invariant `dropped = captured - enqueued - buffered` cannot
    /// be skewed by interleaving.
    pub fn try_enqueue(&self, envelope: FrameEnvelope) -> Result<EnqueueOutcome> {
        let mut inner = self.inner.lock().expect("bus lock");
        if inner.closed {
            return Err(anyhow!("frame bus is closed"));
        }

        let mut outcome = EnqueueOutcome::Stored;
        if inner.queue.len() >= self.capacity {
            let evicted = inner.queue.pop_front();
            debug_assert!(evicted.is_some());
            self.stats.record_dropped();
            outcome = EnqueueOutcome::StoredEvictedOldest;
        }
        inner.queue.push_back(envelope);
        self.stats.record_enqueued(inner.queue.len());
        drop(inner);

        self.available.notify_one();
        Ok(outcome)
    }

    /// Blocking dequeue for the single consumer, bounded by `timeout`.
    ///
    /// After `close()`, buffered envelopes are still handed out until the
    /// queue is drained; only then does this return `Closed`.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        let inner = self.inner.lock().expect("bus lock");
        let (mut inner, _timed_out) = self
            .available
            .wait_timeout_while(inner, timeout, |inner| {
                inner.queue.is_empty() && !inner.closed
            })
            .expect("bus lock");

        match inner.queue.pop_front() {
            Some(envelope) => {
                self.stats.set_queue_depth(inner.queue.len());
                Dequeued::Frame(envelope)
            }
            None if inner.closed => Dequeued::Closed,
            None => Dequeued::TimedOut,
        }
    }

    /// Disallow further enqueues and wake the consumer so it can drain.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("bus lock");
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }
}
