//! Deterministic stand-in detector.
//!
//! Reports one face per frame and labels it unmasked on a configurable
//! cadence. Used by tests and camera-free smoke runs; real inference
//! backends plug in behind the same `Detector` trait.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Detector, FaceObservation, MaskLabel};
use crate::frame::FramePayload;

pub struct StubDetector {
    /// Every n-th frame is labeled unmasked; 0 means never.
    violation_every: u64,
    fail: bool,
    calls: AtomicU64,
}

impl StubDetector {
    pub fn new(violation_every: u64) -> Self {
        Self {
            violation_every,
            fail: false,
            calls: AtomicU64::new(0),
        }
    }

    /// Every frame is a violation.
    pub fn always_violating() -> Self {
        Self::new(1)
    }

    /// Every frame is compliant.
    pub fn never_violating() -> Self {
        Self::new(0)
    }

    /// Fail every detect call, for exercising the failure accounting path.
    pub fn failing() -> Self {
        Self {
            violation_every: 0,
            fail: true,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Detector for StubDetector {
    fn detect(&self, payload: &FramePayload) -> Result<Vec<FaceObservation>> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail {
            return Err(anyhow!("stub detector configured to fail"));
        }

        let label = if self.violation_every > 0 && call % self.violation_every == 0 {
            MaskLabel::Unmasked
        } else {
            MaskLabel::Masked
        };
        // One centered face covering a quarter of the frame.
        Ok(vec![FaceObservation {
            x: payload.width / 4,
            y: payload.height / 4,
            width: payload.width / 2,
            height: payload.height / 2,
            confidence: 1.0,
            label,
        }])
    }
}
