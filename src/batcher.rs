//! Batching consumer.
//!
//! The single consumer of the frame bus. Accumulates envelopes into batches
//! and flushes to the dispatcher when the batch fills or when the bus poll
//! times out with a partial batch pending, so partial-batch latency is
//! bounded by the poll timeout. On bus close the remaining partial batch is
//! flushed before the thread exits; buffered frames are never abandoned.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bus::{Dequeued, FrameBus};
use crate::dispatch::WorkDispatcher;
use crate::stats::PipelineStats;

pub struct Batcher {
    bus: Arc<FrameBus>,
    dispatcher: Arc<dyn WorkDispatcher>,
    batch_size: usize,
    poll_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl Batcher {
    pub fn new(
        bus: Arc<FrameBus>,
        dispatcher: Arc<dyn WorkDispatcher>,
        batch_size: usize,
        poll_timeout: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            bus,
            dispatcher,
            batch_size: batch_size.max(1),
            poll_timeout,
            stats,
        }
    }

    /// Spawn the consumer thread. The returned handle joins it; the thread
    /// exits on its own once the bus is closed and drained.
    pub fn spawn(self) -> BatcherHandle {
        let thread = std::thread::spawn(move || self.run());
        BatcherHandle {
            thread: Some(thread),
        }
    }

    fn run(self) {
        let mut batch = Vec::with_capacity(self.batch_size);
        loop {
            match self.bus.dequeue(self.poll_timeout) {
                Dequeued::Frame(envelope) => {
                    batch.push(envelope);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch);
                    }
                }
                Dequeued::TimedOut => {
                    if !batch.is_empty() {
                        self.flush(&mut batch);
                    }
                }
                Dequeued::Closed => {
                    if !batch.is_empty() {
                        self.flush(&mut batch);
                    }
                    log::info!("frame bus drained, batching consumer exiting");
                    break;
                }
            }
        }
    }

    fn flush(&self, batch: &mut Vec<crate::frame::FrameEnvelope>) {
        let size = batch.len();
        let report = self.dispatcher.dispatch(std::mem::take(batch));
        self.stats.record_batch_flushed();
        self.stats.record_dispatched(report.accepted as u64);
        self.stats.record_dispatch_failures(report.rejected as u64);
        log::debug!(
            "flushed batch of {} ({} accepted, {} rejected)",
            size,
            report.accepted,
            report.rejected
        );
    }
}

/// Join handle for the consumer thread.
pub struct BatcherHandle {
    thread: Option<JoinHandle<()>>,
}

impl BatcherHandle {
    /// Wait for the consumer to exit. Close the bus first or this blocks
    /// until it is closed elsewhere.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("batching consumer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchReport;
    use crate::frame::{FrameEnvelope, FramePayload};
    use std::sync::Mutex;

    /// Test dispatcher that records every batch it receives.
    struct RecordingDispatcher {
        batches: Mutex<Vec<Vec<u64>>>,
    }

    impl RecordingDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batches(&self) -> Vec<Vec<u64>> {
            self.batches.lock().expect("lock").clone()
        }
    }

    impl WorkDispatcher for RecordingDispatcher {
        fn dispatch(&self, batch: Vec<FrameEnvelope>) -> DispatchReport {
            let accepted = batch.len();
            self.batches
                .lock()
                .expect("lock")
                .push(batch.iter().map(|e| e.sequence_number).collect());
            DispatchReport {
                accepted,
                rejected: 0,
            }
        }
    }

    fn envelope(seq: u64) -> FrameEnvelope {
        let payload = FramePayload::new(vec![0u8; 12], 2, 2).expect("payload");
        FrameEnvelope::new("camera_0", payload, seq)
    }

    fn setup(batch_size: usize) -> (Arc<FrameBus>, Arc<RecordingDispatcher>, Arc<PipelineStats>, BatcherHandle)
    {
        let stats = Arc::new(PipelineStats::new());
        let bus = Arc::new(FrameBus::new(64, Arc::clone(&stats)));
        let dispatcher = RecordingDispatcher::new();
        let handle = Batcher::new(
            Arc::clone(&bus),
            Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>,
            batch_size,
            Duration::from_millis(100),
            Arc::clone(&stats),
        )
        .spawn();
        (bus, dispatcher, stats, handle)
    }

    #[test]
    fn flushes_when_batch_fills() {
        let (bus, dispatcher, stats, handle) = setup(3);
        for seq in 1..=6 {
            bus.try_enqueue(envelope(seq)).expect("enqueue");
        }
        bus.close();
        handle.join();

        let batches = dispatcher.batches();
        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(stats.batches_flushed(), 2);
        assert_eq!(stats.frames_dispatched(), 6);
    }

    #[test]
    fn timeout_flushes_partial_batch() {
        let (bus, dispatcher, _stats, handle) = setup(10);
        bus.try_enqueue(envelope(1)).expect("enqueue");
        bus.try_enqueue(envelope(2)).expect("enqueue");

        // Wait past the poll timeout so the partial batch flushes.
        std::thread::sleep(Duration::from_millis(350));
        assert_eq!(dispatcher.batches(), vec![vec![1, 2]]);

        bus.close();
        handle.join();
    }

    #[test]
    fn close_drains_pending_frames_before_exit() {
        let stats = Arc::new(PipelineStats::new());
        let bus = Arc::new(FrameBus::new(64, Arc::clone(&stats)));
        for seq in 1..=5 {
            bus.try_enqueue(envelope(seq)).expect("enqueue");
        }
        bus.close();

        // Consumer started after close must still see every buffered frame.
        let dispatcher = RecordingDispatcher::new();
        let handle = Batcher::new(
            Arc::clone(&bus),
            Arc::clone(&dispatcher) as Arc<dyn WorkDispatcher>,
            2,
            Duration::from_millis(20),
            stats,
        )
        .spawn();
        handle.join();

        let flushed: Vec<u64> = dispatcher.batches().into_iter().flatten().collect();
        assert_eq!(flushed, vec![1, 2, 3, 4, 5]);
    }
}
