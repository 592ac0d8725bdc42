//! Pipeline counters and snapshots.
//!
//! `PipelineStats` is the single write surface for every stage: plain atomic
//! increments, no locks on the hot path. `StatsCollector` turns the counters
//! into a read-only `StatsSnapshot` with derived fps/uptime on demand.
//!
//! Counter semantics:
//! - `frames_captured` counts every frame successfully read from a source,
//!   including frames discarded by skip/interval gating.
//! - `frames_enqueued` counts only frames accepted onto the bus, so
//!   `frames_enqueued <= frames_captured` always holds.
//! - `frames_dropped` counts bus-level evictions only. Rate-limit discards
//!   never receive a sequence number, so sequence gaps indicate bus drops.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonically-increasing pipeline counters plus the bus depth gauge.
///
/// Written by all stages, read concurrently without locking.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_enqueued: AtomicU64,
    frames_dropped: AtomicU64,
    frames_dispatched: AtomicU64,
    batches_flushed: AtomicU64,
    dispatch_failures: AtomicU64,
    detections_failed: AtomicU64,
    queue_depth: AtomicUsize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by the bus while its lock is held, so enqueue accounting and
    /// eviction accounting come from the same decision path.
    pub fn record_enqueued(&self, queue_depth: usize) {
        self.frames_enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.store(queue_depth, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Bulk recorder; batch flushes account whole batches at once.
    pub fn record_dispatched(&self, count: u64) {
        self.frames_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failures(&self, count: u64) {
        self.dispatch_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_detection_failure(&self) {
        self.detections_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.frames_enqueued.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.frames_dispatched.load(Ordering::Relaxed)
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    pub fn detections_failed(&self) -> u64 {
        self.detections_failed.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }
}

/// Read-only snapshot of the pipeline counters with derived values.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_dispatched: u64,
    pub batches_flushed: u64,
    pub dispatch_failures: u64,
    pub detections_failed: u64,
    pub current_queue_depth: usize,
    /// Dispatched frames per second since the collector started.
    pub fps: f64,
    pub uptime_secs: f64,
    pub active_source_count: usize,
}

/// Passive aggregator over `PipelineStats`.
pub struct StatsCollector {
    stats: Arc<PipelineStats>,
    started_at: Instant,
}

impl StatsCollector {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            stats,
            started_at: Instant::now(),
        }
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Build a snapshot. The caller supplies the current number of streaming
    /// sources; the collector does not track capture lifecycles itself.
    pub fn snapshot(&self, active_source_count: usize) -> StatsSnapshot {
        let uptime = self.uptime_secs();
        let dispatched = self.stats.frames_dispatched();
        let fps = if uptime > 0.0 {
            dispatched as f64 / uptime
        } else {
            0.0
        };
        StatsSnapshot {
            frames_captured: self.stats.frames_captured(),
            frames_enqueued: self.stats.frames_enqueued(),
            frames_dropped: self.stats.frames_dropped(),
            frames_dispatched: dispatched,
            batches_flushed: self.stats.batches_flushed(),
            dispatch_failures: self.stats.dispatch_failures(),
            detections_failed: self.stats.detections_failed(),
            current_queue_depth: self.stats.queue_depth(),
            fps,
            uptime_secs: uptime,
            active_source_count,
        }
    }
}

/// Metrics sink consumed by external monitoring. Read-only from the
/// pipeline's perspective; implementations must not block the caller.
pub trait MetricsSink: Send + Sync {
    fn record(&self, snapshot: &StatsSnapshot);
}

/// Default sink: one structured log line per snapshot.
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn record(&self, snapshot: &StatsSnapshot) {
        log::info!(
            "stats: captured={} enqueued={} dropped={} dispatched={} batches={} \
             queue_depth={} fps={:.2} uptime={:.0}s active_sources={}",
            snapshot.frames_captured,
            snapshot.frames_enqueued,
            snapshot.frames_dropped,
            snapshot.frames_dispatched,
            snapshot.batches_flushed,
            snapshot.current_queue_depth,
            snapshot.fps,
            snapshot.uptime_secs,
            snapshot.active_source_count,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueued_never_exceeds_captured() {
        let stats = PipelineStats::new();
        for _ in 0..10 {
            stats.record_captured();
        }
        for depth in 1..=6 {
            stats.record_enqueued(depth);
        }
        assert!(stats.frames_enqueued() <= stats.frames_captured());
        assert_eq!(stats.queue_depth(), 6);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Arc::new(PipelineStats::new());
        let collector = StatsCollector::new(Arc::clone(&stats));

        stats.record_captured();
        stats.record_enqueued(1);
        stats.record_dispatched(1);
        stats.record_batch_flushed();
        stats.record_dropped();

        let snap = collector.snapshot(2);
        assert_eq!(snap.frames_captured, 1);
        assert_eq!(snap.frames_enqueued, 1);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.frames_dispatched, 1);
        assert_eq!(snap.batches_flushed, 1);
        assert_eq!(snap.active_source_count, 2);
        assert!(snap.uptime_secs >= 0.0);
    }

    #[test]
    fn bulk_recorders_accumulate_counts() {
        let stats = PipelineStats::new();
        stats.record_dispatched(4);
        stats.record_dispatched(2);
        stats.record_dispatch_failures(3);
        stats.record_dispatched(0);
        assert_eq!(stats.frames_dispatched(), 6);
        assert_eq!(stats.dispatch_failures(), 3);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = Arc::new(PipelineStats::new());
        let collector = StatsCollector::new(stats);
        let json = serde_json::to_string(&collector.snapshot(0)).expect("serialize");
        assert!(json.contains("frames_captured"));
        assert!(json.contains("current_queue_depth"));
    }
}
