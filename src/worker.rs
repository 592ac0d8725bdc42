//! Detection worker pool.
//!
//! Workers pull frames one at a time from the dispatch channel, run the
//! detector, persist the result and route violations through the alert
//! throttle. Every failure mode here is per-frame: detector errors are
//! counted, store and notifier errors are logged, and the worker moves on.
//!
//! The pool drains naturally: when the dispatcher is dropped the channel
//! disconnects and each worker exits after finishing its current frame, so
//! `join` never abandons in-flight work.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::alert::{AlertDecision, AlertThrottle};
use crate::detect::{DetectionResult, Detector};
use crate::frame::FrameEnvelope;
use crate::notify::{AlertContext, Notifier};
use crate::stats::PipelineStats;
use crate::storage::{AlertRecord, RecordStore};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        worker_count: usize,
        receiver: Receiver<FrameEnvelope>,
        detector: Arc<dyn Detector>,
        throttle: Arc<AlertThrottle>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn RecordStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..worker_count.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let detector = Arc::clone(&detector);
                let throttle = Arc::clone(&throttle);
                let notifier = Arc::clone(&notifier);
                let store = Arc::clone(&store);
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    worker_loop(
                        worker_id, receiver, detector, throttle, notifier, store, stats,
                    );
                })
            })
            .collect();
        Self { handles }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Drop the dispatcher first or this
    /// blocks until the channel disconnects elsewhere.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                log::error!("detection worker panicked");
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<Receiver<FrameEnvelope>>>,
    detector: Arc<dyn Detector>,
    throttle: Arc<AlertThrottle>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn RecordStore>,
    stats: Arc<PipelineStats>,
) {
    log::debug!("worker {} started", worker_id);
    loop {
        // Hold the receiver lock only for the recv, never during detection.
        let envelope = {
            let guard = receiver.lock().expect("worker receiver lock");
            guard.recv()
        };
        let Ok(envelope) = envelope else {
            break;
        };
        process_frame(&envelope, &*detector, &throttle, &*notifier, &*store, &stats);
    }
    log::debug!("worker {} exiting, dispatch channel closed", worker_id);
}

fn process_frame(
    envelope: &FrameEnvelope,
    detector: &dyn Detector,
    throttle: &AlertThrottle,
    notifier: &dyn Notifier,
    store: &dyn RecordStore,
    stats: &PipelineStats,
) {
    let observations = match detector.detect(&envelope.payload) {
        Ok(observations) => observations,
        Err(e) => {
            stats.record_detection_failure();
            log::warn!(
                "detection failed for {}#{}: {}",
                envelope.source_name,
                envelope.sequence_number,
                e
            );
            return;
        }
    };

    let result = DetectionResult::from_observations(envelope, observations);
    if let Err(e) = store.persist_detection(&result) {
        log::warn!("failed to persist detection for {}: {}", result.source_name, e);
    }

    // Every result goes through the throttle; clean ones reset the streak.
    let decision = throttle.evaluate(&result.source_name, result.violation_count, Instant::now());
    match decision {
        AlertDecision::Notify => send_alert(&result, notifier, store),
        AlertDecision::BelowThreshold => {}
        AlertDecision::CoolingDown => {
            log::debug!(
                "{}: {} violations suppressed by cooldown",
                result.source_name,
                result.violation_count
            );
        }
    }
}

fn send_alert(result: &DetectionResult, notifier: &dyn Notifier, store: &dyn RecordStore) {
    let context = AlertContext {
        source_name: result.source_name.clone(),
        violation_count: result.violation_count,
        face_count: result.face_count,
        epoch_ms: result.captured_epoch_ms,
    };
    if let Err(e) = notifier.notify(&context) {
        log::warn!("alert notification failed for {}: {}", context.source_name, e);
    }
    let record = AlertRecord {
        source_name: context.source_name.clone(),
        epoch_ms: context.epoch_ms,
        violation_count: context.violation_count,
        face_count: context.face_count,
        message: context.summary(),
    };
    if let Err(e) = store.persist_alert(&record) {
        log::warn!("failed to persist alert for {}: {}", record.source_name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertPolicy;
    use crate::detect::StubDetector;
    use crate::frame::FramePayload;
    use crate::storage::InMemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;

    struct CountingNotifier {
        sent: AtomicUsize,
    }

    impl CountingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
            })
        }

        fn sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, _context: &AlertContext) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(seq: u64) -> FrameEnvelope {
        let payload = FramePayload::new(vec![0u8; 64 * 48 * 3], 64, 48).expect("payload");
        FrameEnvelope::new("camera_0", payload, seq)
    }

    fn throttle(min_violations: u32) -> Arc<AlertThrottle> {
        Arc::new(AlertThrottle::new(AlertPolicy {
            cooldown: Duration::ZERO,
            min_violations,
        }))
    }

    #[test]
    fn workers_drain_channel_and_persist_results() {
        let (sender, receiver) = sync_channel(16);
        let store = Arc::new(InMemoryRecordStore::new());
        let notifier = CountingNotifier::new();
        let stats = Arc::new(PipelineStats::new());

        let pool = WorkerPool::spawn(
            3,
            receiver,
            Arc::new(StubDetector::never_violating()),
            throttle(1),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            stats,
        );
        assert_eq!(pool.worker_count(), 3);

        for seq in 1..=10 {
            sender.send(envelope(seq)).expect("send");
        }
        drop(sender);
        pool.join();

        assert_eq!(store.detection_count(), 10);
        assert_eq!(store.alert_count(), 0);
        assert_eq!(notifier.sent(), 0);
    }

    #[test]
    fn eligible_violations_alert_per_result() {
        let (sender, receiver) = sync_channel(16);
        let store = Arc::new(InMemoryRecordStore::new());
        let notifier = CountingNotifier::new();
        let stats = Arc::new(PipelineStats::new());

        let pool = WorkerPool::spawn(
            1,
            receiver,
            Arc::new(StubDetector::always_violating()),
            throttle(1),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            stats,
        );

        for seq in 1..=5 {
            sender.send(envelope(seq)).expect("send");
        }
        drop(sender);
        pool.join();

        // Every result meets the minimum; zero cooldown lets each alert.
        assert_eq!(store.detection_count(), 5);
        assert_eq!(store.alert_count(), 5);
        assert_eq!(notifier.sent(), 5);
        assert!(store.alerts()[0].message.contains("unmasked"));
    }

    #[test]
    fn results_under_the_violation_minimum_never_alert() {
        let (sender, receiver) = sync_channel(16);
        let store = Arc::new(InMemoryRecordStore::new());
        let notifier = CountingNotifier::new();
        let stats = Arc::new(PipelineStats::new());

        // The stub reports one unmasked face per frame; minimum is two.
        let pool = WorkerPool::spawn(
            1,
            receiver,
            Arc::new(StubDetector::always_violating()),
            throttle(2),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            stats,
        );

        for seq in 1..=5 {
            sender.send(envelope(seq)).expect("send");
        }
        drop(sender);
        pool.join();

        // Detections still persist; no amount of repetition promotes an
        // under-threshold result to an alert.
        assert_eq!(store.detection_count(), 5);
        assert_eq!(store.alert_count(), 0);
        assert_eq!(notifier.sent(), 0);
    }

    #[test]
    fn detector_failures_are_counted_not_fatal() {
        let (sender, receiver) = sync_channel(16);
        let store = Arc::new(InMemoryRecordStore::new());
        let notifier = CountingNotifier::new();
        let stats = Arc::new(PipelineStats::new());

        let pool = WorkerPool::spawn(
            2,
            receiver,
            Arc::new(StubDetector::failing()),
            throttle(1),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&stats),
        );

        for seq in 1..=4 {
            sender.send(envelope(seq)).expect("send");
        }
        drop(sender);
        pool.join();

        assert_eq!(stats.detections_failed(), 4);
        assert_eq!(store.detection_count(), 0);
        assert_eq!(notifier.sent(), 0);
    }
}
