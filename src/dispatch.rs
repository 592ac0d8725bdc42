//! Handoff from the batching consumer to the detection workers.
//!
//! The dispatcher is the second backpressure point after the bus: a full
//! worker queue rejects frames instead of blocking the consumer. Rejected
//! frames are counted and discarded, never retried.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use crate::frame::FrameEnvelope;

/// Per-batch dispatch accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Hands batches of frames to the processing side. Implementations must
/// never block the caller; frames that cannot be accepted immediately are
/// rejected and reported.
pub trait WorkDispatcher: Send + Sync {
    fn dispatch(&self, batch: Vec<FrameEnvelope>) -> DispatchReport;
}

/// Dispatcher backed by a bounded channel drained by the worker pool.
pub struct ChannelDispatcher {
    sender: SyncSender<FrameEnvelope>,
}

impl ChannelDispatcher {
    /// Create the dispatcher and the receiving end for the worker pool.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<FrameEnvelope>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl WorkDispatcher for ChannelDispatcher {
    fn dispatch(&self, batch: Vec<FrameEnvelope>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for envelope in batch {
            match self.sender.try_send(envelope) {
                Ok(()) => report.accepted += 1,
                Err(TrySendError::Full(envelope)) => {
                    report.rejected += 1;
                    log::debug!(
                        "worker queue full, discarding {}#{}",
                        envelope.source_name,
                        envelope.sequence_number
                    );
                }
                Err(TrySendError::Disconnected(envelope)) => {
                    report.rejected += 1;
                    log::warn!(
                        "worker queue disconnected, discarding {}#{}",
                        envelope.source_name,
                        envelope.sequence_number
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePayload;

    fn envelope(seq: u64) -> FrameEnvelope {
        let payload = FramePayload::new(vec![0u8; 12], 2, 2).expect("payload");
        FrameEnvelope::new("camera_0", payload, seq)
    }

    #[test]
    fn overflow_rejects_without_blocking() {
        let (dispatcher, receiver) = ChannelDispatcher::with_capacity(2);
        let report = dispatcher.dispatch((1..=4).map(envelope).collect());
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 2);

        // The two accepted frames are the earliest ones.
        assert_eq!(receiver.recv().expect("frame").sequence_number, 1);
        assert_eq!(receiver.recv().expect("frame").sequence_number, 2);
    }

    #[test]
    fn disconnected_receiver_rejects_everything() {
        let (dispatcher, receiver) = ChannelDispatcher::with_capacity(4);
        drop(receiver);
        let report = dispatcher.dispatch((1..=3).map(envelope).collect());
        assert_eq!(report.accepted, 0);
        assert_eq!(report.rejected, 3);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let (dispatcher, _receiver) = ChannelDispatcher::with_capacity(1);
        assert_eq!(dispatcher.dispatch(Vec::new()), DispatchReport::default());
    }
}
