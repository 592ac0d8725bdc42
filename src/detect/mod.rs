//! The detection capability boundary.
//!
//! A `Detector` turns one normalized frame into face observations; the
//! worker pool owns invocation, accounting and result routing. Detectors
//! are shared across workers, so implementations must be internally
//! synchronized (or stateless).

pub mod result;
pub mod stub;

pub use result::{DetectionResult, FaceObservation, MaskLabel};
pub use stub::StubDetector;

use anyhow::Result;

use crate::frame::FramePayload;

/// Face/mask inference over one RGB frame.
///
/// Errors are per-frame: the worker logs and counts a failure and moves on
/// to the next frame. A detector must not poison itself on a bad frame.
pub trait Detector: Send + Sync {
    fn detect(&self, payload: &FramePayload) -> Result<Vec<FaceObservation>>;
}
