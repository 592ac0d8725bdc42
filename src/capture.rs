//! Per-source capture loop.
//!
//! One `SourceCapture` owns the connection lifecycle for a single video
//! source, applies frame-rate normalization and hands accepted frames to
//! the shared bus. Each capture runs on its own thread; no capture ever
//! blocks on the bus or on another source.
//!
//! State machine: Disconnected -> Connecting -> Streaming -> Reconnecting
//! -> ... -> Stopped (terminal). Connection failures retry indefinitely at
//! the configured backoff while the capture is running; sources are
//! expected to recover.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::bus::{EnqueueOutcome, FrameBus};
use crate::config::StreamDescriptor;
use crate::frame::{FrameEnvelope, FramePayload, ProcessingResolution};
use crate::source::FrameSource;
use crate::stats::PipelineStats;

/// Backoff after a transient read failure. Connection-level trouble is
/// detected via source health on the next iteration, not here.
const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    Reconnecting = 3,
    Stopped = 4,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureState::Connecting,
            2 => CaptureState::Streaming,
            3 => CaptureState::Reconnecting,
            4 => CaptureState::Stopped,
            _ => CaptureState::Disconnected,
        }
    }
}

/// State shared between the owner and the capture thread.
struct CaptureShared {
    state: AtomicU8,
    stop: AtomicBool,
    exited: Mutex<bool>,
    cond: Condvar,
}

impl CaptureShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CaptureState::Disconnected as u8),
            stop: AtomicBool::new(false),
            exited: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Cancellable sleep. Returns true when stop was requested.
    fn wait_cancelled(&self, timeout: Duration) -> bool {
        let guard = self.exited.lock().expect("capture lock");
        let _unused = self
            .cond
            .wait_timeout_while(guard, timeout, |_| !self.stop.load(Ordering::Acquire))
            .expect("capture lock");
        self.stop_requested()
    }

    fn mark_exited(&self) {
        let mut exited = self.exited.lock().expect("capture lock");
        *exited = true;
        drop(exited);
        self.cond.notify_all();
    }

    /// Wait up to `timeout` for the capture thread to finish.
    fn wait_exited(&self, timeout: Duration) -> bool {
        let guard = self.exited.lock().expect("capture lock");
        let (exited, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |exited| !*exited)
            .expect("capture lock");
        *exited
    }
}

/// Capture loop for one configured source.
pub struct SourceCapture {
    descriptor: StreamDescriptor,
    shared: Arc<CaptureShared>,
    thread: Option<JoinHandle<()>>,
    source: Option<Box<dyn FrameSource>>,
    bus: Arc<FrameBus>,
    stats: Arc<PipelineStats>,
    resolution: ProcessingResolution,
}

impl SourceCapture {
    pub fn new(
        descriptor: StreamDescriptor,
        source: Box<dyn FrameSource>,
        bus: Arc<FrameBus>,
        stats: Arc<PipelineStats>,
        resolution: ProcessingResolution,
    ) -> Self {
        Self {
            descriptor,
            shared: Arc::new(CaptureShared::new()),
            thread: None,
            source: Some(source),
            bus,
            stats,
            resolution,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == CaptureState::Streaming
    }

    /// Spawn the capture thread. No-op when already started or stopped.
    pub fn start(&mut self) {
        if self.thread.is_some() || self.state() == CaptureState::Stopped {
            return;
        }
        let Some(source) = self.source.take() else {
            return;
        };
        let descriptor = self.descriptor.clone();
        let shared = Arc::clone(&self.shared);
        let bus = Arc::clone(&self.bus);
        let stats = Arc::clone(&self.stats);
        let resolution = self.resolution;
        self.thread = Some(std::thread::spawn(move || {
            run_capture(descriptor, source, shared, bus, stats, resolution);
        }));
        log::info!("started capture: {}", self.descriptor.name);
    }

    /// Signal cancellation and wait up to `timeout` for a graceful exit.
    /// A thread that does not exit in time is detached; the public state
    /// still reaches `Stopped`.
    pub fn stop(&mut self, timeout: Duration) {
        self.shared.request_stop();
        if let Some(handle) = self.thread.take() {
            if self.shared.wait_exited(timeout) {
                let _ = handle.join();
            } else {
                log::warn!(
                    "capture {} did not exit within {:?}; forcing teardown",
                    self.descriptor.name,
                    timeout
                );
            }
        }
        self.shared.set_state(CaptureState::Stopped);
        log::info!("stopped capture: {}", self.descriptor.name);
    }
}

fn run_capture(
    descriptor: StreamDescriptor,
    mut source: Box<dyn FrameSource>,
    shared: Arc<CaptureShared>,
    bus: Arc<FrameBus>,
    stats: Arc<PipelineStats>,
    resolution: ProcessingResolution,
) {
    let name = descriptor.name.as_str();
    // Clamp so hand-built descriptors with target_fps=0 cannot divide by
    // zero; validated configs never carry 0 here.
    let target_fps = descriptor.target_fps.max(1);
    let frame_interval = Duration::from_secs_f64(1.0 / target_fps as f64);

    let mut connected = false;
    let mut ever_connected = false;
    let mut frame_skip: u64 = 1;
    let mut frame_count: u64 = 0;
    let mut sequence: u64 = 0;
    let mut last_accepted: Option<Instant> = None;

    shared.set_state(CaptureState::Connecting);

    while !shared.stop_requested() {
        if connected && !source.is_healthy() {
            log::warn!("{}: source unhealthy, reconnecting", name);
            source.close();
            connected = false;
        }

        if !connected {
            shared.set_state(if ever_connected {
                CaptureState::Reconnecting
            } else {
                CaptureState::Connecting
            });
            match source.connect() {
                Ok(()) => {
                    connected = true;
                    ever_connected = true;
                    // Skip ratio from the source's native rate, minimum 1.
                    frame_skip =
                        ((source.native_fps() / target_fps as f64).round() as u64).max(1);
                    shared.set_state(CaptureState::Streaming);
                    log::info!(
                        "{}: streaming from {} (frame_skip={})",
                        name,
                        descriptor.source_uri,
                        frame_skip
                    );
                }
                Err(e) => {
                    log::warn!(
                        "{}: connect failed ({}); retrying in {:?}",
                        name,
                        e,
                        descriptor.reconnect_interval
                    );
                    if shared.wait_cancelled(descriptor.reconnect_interval) {
                        break;
                    }
                }
            }
            continue;
        }

        let raw = match source.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("{}: frame read failed: {}", name, e);
                if shared.wait_cancelled(READ_FAILURE_BACKOFF) {
                    break;
                }
                continue;
            }
        };
        stats.record_captured();
        frame_count += 1;

        // Only every frame_skip-th captured frame is a candidate.
        if frame_count % frame_skip != 0 {
            continue;
        }

        // Interval gate caps output rate independent of source rate.
        // Gated frames are counted as captured but never sequenced.
        let now = Instant::now();
        if let Some(last) = last_accepted {
            if now.duration_since(last) < frame_interval {
                continue;
            }
        }

        let payload = match FramePayload::new(raw.pixels, raw.width, raw.height)
            .and_then(|payload| payload.resized_to(resolution))
        {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("{}: discarding malformed frame: {}", name, e);
                continue;
            }
        };

        sequence += 1;
        let envelope = FrameEnvelope::new(name, payload, sequence);
        match bus.try_enqueue(envelope) {
            Ok(EnqueueOutcome::Stored) => {}
            Ok(EnqueueOutcome::StoredEvictedOldest) => {
                log::debug!("{}: bus full, oldest frame evicted", name);
            }
            Err(_) => {
                log::info!("{}: frame bus closed, exiting capture loop", name);
                break;
            }
        }
        last_accepted = Some(now);
    }

    source.close();
    shared.set_state(CaptureState::Stopped);
    shared.mark_exited();
}
