//! Detection result types.

use serde::Serialize;

use crate::frame::FrameEnvelope;

/// Mask compliance classification for one detected face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskLabel {
    Masked,
    Unmasked,
    /// Face found but occluded or too low-confidence to classify.
    Uncertain,
}

impl MaskLabel {
    /// Only a confident unmasked classification counts as a violation.
    pub fn is_violation(self) -> bool {
        matches!(self, MaskLabel::Unmasked)
    }
}

/// One detected face within a frame, in processing-resolution pixels.
#[derive(Clone, Debug, Serialize)]
pub struct FaceObservation {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub label: MaskLabel,
}

/// Outcome of running the detector over one frame, keyed back to its
/// source by name, wall-clock time and sequence number.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionResult {
    pub source_name: String,
    pub captured_epoch_ms: u64,
    pub sequence_number: u64,
    pub face_count: u32,
    pub violation_count: u32,
    pub observations: Vec<FaceObservation>,
}

impl DetectionResult {
    pub fn from_observations(
        envelope: &FrameEnvelope,
        observations: Vec<FaceObservation>,
    ) -> Self {
        let violation_count = observations
            .iter()
            .filter(|o| o.label.is_violation())
            .count() as u32;
        Self {
            source_name: envelope.source_name.clone(),
            captured_epoch_ms: envelope.captured_epoch_ms,
            sequence_number: envelope.sequence_number,
            face_count: observations.len() as u32,
            violation_count,
            observations,
        }
    }

    pub fn has_violations(&self) -> bool {
        self.violation_count > 0
    }
}
