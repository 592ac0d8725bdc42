//! Frame envelope and processing-resolution normalization.
//!
//! A `FrameEnvelope` is a single captured frame plus its source identity,
//! timestamps and per-source sequence number. Envelopes are created by the
//! capture layer, consumed exactly once by the batching consumer (or
//! discarded by the bus on overflow) and never mutated after creation.
//!
//! Sequence numbers are assigned only to frames that pass rate gating, so
//! gaps in sequence numbers indicate bus-level drops, not rate limiting.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Fixed resolution frames are normalized to before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessingResolution {
    pub width: u32,
    pub height: u32,
}

impl Default for ProcessingResolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Decoded RGB8 image buffer. `pixels.len() == width * height * 3`.
#[derive(Clone, Debug)]
pub struct FramePayload {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FramePayload {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "payload size mismatch: {}x{} expects {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Resize to the pipeline's processing resolution. Returns the payload
    /// unchanged when it already matches.
    pub fn resized_to(self, resolution: ProcessingResolution) -> Result<Self> {
        if self.width == resolution.width && self.height == resolution.height {
            return Ok(self);
        }
        let image = RgbImage::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| anyhow!("payload buffer does not match declared dimensions"))?;
        let resized = image::imageops::resize(
            &image,
            resolution.width,
            resolution.height,
            FilterType::Triangle,
        );
        Ok(Self {
            pixels: resized.into_raw(),
            width: resolution.width,
            height: resolution.height,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// A captured, normalized frame with its source identity and ordering data.
#[derive(Clone, Debug)]
pub struct FrameEnvelope {
    pub source_name: String,
    pub payload: FramePayload,
    /// Monotonic capture instant, used for ordering and latency.
    pub captured_at: Instant,
    /// Wall-clock capture time for persistence and notifications.
    pub captured_epoch_ms: u64,
    /// Per-source, strictly increasing. Assigned only to accepted frames.
    pub sequence_number: u64,
}

impl FrameEnvelope {
    pub fn new(source_name: &str, payload: FramePayload, sequence_number: u64) -> Self {
        Self {
            source_name: source_name.to_string(),
            payload,
            captured_at: Instant::now(),
            captured_epoch_ms: epoch_millis(),
            sequence_number,
        }
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
