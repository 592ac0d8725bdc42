//! maskwatch - multi-camera mask-compliance capture pipeline.
//!
//! This crate implements the ingestion core of a mask-compliance monitor:
//! N independent capture loops feed a single bounded frame bus, one batching
//! consumer drains the bus and hands frames to an asynchronous detection
//! worker pool, and a per-source throttle gates user-visible alerts.
//!
//! # Design rules
//!
//! 1. **Producers never block**: a full bus evicts its oldest frame instead
//!    of stalling a capture loop.
//! 2. **Failures stay local**: read errors, dispatch failures and notifier
//!    errors are logged and counted, never propagated upward.
//! 3. **Degrade, don't halt**: the pipeline drops frames and skips alerts
//!    under pressure; it does not crash.
//! 4. **No implicit singletons**: the detector, notifier and record store
//!    are constructed once and injected.
//!
//! # Module Structure
//!
//! - `config`: pipeline configuration and the stream registry
//! - `frame`: `FrameEnvelope` and processing-resolution normalization
//! - `bus`: the bounded multi-producer/single-consumer frame bus
//! - `capture`: per-source capture state machine and thread
//! - `source`: frame sources (`stub://` synthetic, optional HTTP MJPEG)
//! - `batcher` / `dispatch`: batching consumer and work handoff
//! - `detect`: the detection capability boundary
//! - `worker`: detection worker pool and result routing
//! - `alert`: cooldown/minimum-violation alert throttle
//! - `stats`: pipeline counters and snapshots
//! - `notify` / `storage`: notification and persistence collaborators
//! - `pipeline`: orchestration and ordered shutdown

pub mod alert;
pub mod batcher;
pub mod bus;
pub mod capture;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod notify;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod storage;
pub mod worker;

pub use alert::{AlertDecision, AlertPolicy, AlertState, AlertThrottle};
pub use batcher::{Batcher, BatcherHandle};
pub use bus::{Dequeued, EnqueueOutcome, FrameBus};
pub use capture::{CaptureState, SourceCapture};
pub use config::{validate_stream_name, PipelineConfig, StreamDescriptor, StreamRegistry};
pub use detect::{Detector, DetectionResult, FaceObservation, MaskLabel, StubDetector};
pub use dispatch::{ChannelDispatcher, WorkDispatcher};
pub use frame::{FrameEnvelope, FramePayload, ProcessingResolution};
pub use notify::{AlertContext, LogNotifier, MqttNotifier, Notifier};
pub use pipeline::Pipeline;
pub use source::{open_source, FrameSource, SourceFrame, SyntheticSource};
pub use stats::{LogMetricsSink, MetricsSink, PipelineStats, StatsCollector, StatsSnapshot};
pub use storage::{AlertRecord, InMemoryRecordStore, RecordStore, SqliteRecordStore};
pub use worker::WorkerPool;
