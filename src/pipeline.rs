//! Pipeline orchestration.
//!
//! Owns construction, startup and ordered shutdown of every stage. The
//! detector, notifier and record store are injected; the pipeline never
//! reaches for globals.
//!
//! Shutdown order matters and is fixed: captures stop first (no new
//! frames), then the bus closes (consumer drains what is buffered), then
//! the batching consumer joins (its dispatcher drops, disconnecting the
//! worker channel), then the workers join after finishing in-flight
//! frames. Nothing already captured is abandoned on the way down.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{AlertPolicy, AlertThrottle};
use crate::batcher::{Batcher, BatcherHandle};
use crate::bus::FrameBus;
use crate::capture::SourceCapture;
use crate::config::{PipelineConfig, StreamRegistry};
use crate::detect::Detector;
use crate::dispatch::{ChannelDispatcher, WorkDispatcher};
use crate::notify::Notifier;
use crate::source::open_source;
use crate::stats::{PipelineStats, StatsCollector, StatsSnapshot};
use crate::storage::RecordStore;
use crate::worker::WorkerPool;

pub struct Pipeline {
    config: PipelineConfig,
    detector: Arc<dyn Detector>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn RecordStore>,
    stats: Arc<PipelineStats>,
    collector: StatsCollector,
    bus: Arc<FrameBus>,
    captures: Vec<SourceCapture>,
    batcher: Option<BatcherHandle>,
    workers: Option<WorkerPool>,
    started: bool,
}

impl Pipeline {
    /// Wire up a pipeline from validated configuration and injected
    /// collaborators. Nothing runs until `start`.
    pub fn new(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        // Re-check stream identity even for hand-built configs.
        StreamRegistry::new(config.streams.clone())?;
        let stats = Arc::new(PipelineStats::new());
        let collector = StatsCollector::new(Arc::clone(&stats));
        let bus = Arc::new(FrameBus::new(config.queue_size, Arc::clone(&stats)));
        Ok(Self {
            config,
            detector,
            notifier,
            store,
            stats,
            collector,
            bus,
            captures: Vec::new(),
            batcher: None,
            workers: None,
            started: false,
        })
    }

    /// Start workers, the batching consumer, then every enabled capture.
    /// A source that fails to open is logged and skipped; the rest of the
    /// pipeline comes up regardless.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let (dispatcher, receiver) = ChannelDispatcher::with_capacity(self.config.queue_size);
        let throttle = Arc::new(AlertThrottle::new(AlertPolicy {
            cooldown: self.config.alert_cooldown,
            min_violations: self.config.min_violations_for_alert,
        }));
        self.workers = Some(WorkerPool::spawn(
            self.config.max_workers,
            receiver,
            Arc::clone(&self.detector),
            throttle,
            Arc::clone(&self.notifier),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
        ));

        self.batcher = Some(
            Batcher::new(
                Arc::clone(&self.bus),
                Arc::new(dispatcher) as Arc<dyn WorkDispatcher>,
                self.config.batch_size,
                self.config.poll_timeout,
                Arc::clone(&self.stats),
            )
            .spawn(),
        );

        for stream in self.config.streams.iter().filter(|s| s.enabled) {
            let source = match open_source(&stream.source_uri, stream.target_fps) {
                Ok(source) => source,
                Err(e) => {
                    log::error!("skipping stream {}: {}", stream.name, e);
                    continue;
                }
            };
            let mut capture = SourceCapture::new(
                stream.clone(),
                source,
                Arc::clone(&self.bus),
                Arc::clone(&self.stats),
                self.config.resolution,
            );
            capture.start();
            self.captures.push(capture);
        }
        log::info!(
            "pipeline started: {} captures, {} workers, bus capacity {}",
            self.captures.len(),
            self.config.max_workers,
            self.config.queue_size
        );
        Ok(())
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Point-in-time counters plus the number of captures currently
    /// streaming.
    pub fn snapshot(&self) -> StatsSnapshot {
        let streaming = self.captures.iter().filter(|c| c.is_streaming()).count();
        self.collector.snapshot(streaming)
    }

    /// Ordered shutdown. `capture_timeout` bounds the wait per capture
    /// thread; the drain phases wait for completion.
    pub fn shutdown(&mut self, capture_timeout: Duration) {
        log::info!("pipeline shutting down");
        for capture in &mut self.captures {
            capture.stop(capture_timeout);
        }
        self.bus.close();
        if let Some(batcher) = self.batcher.take() {
            batcher.join();
        }
        if let Some(workers) = self.workers.take() {
            workers.join();
        }
        log::info!(
            "pipeline stopped: {} captured, {} dispatched, {} dropped",
            self.stats.frames_captured(),
            self.stats.frames_dispatched(),
            self.stats.frames_dropped()
        );
    }
}
