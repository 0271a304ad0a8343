use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::error::SwitcherError;
use crate::frame::Frame;
use crate::ingest::synthetic::read_occupancy_marker;

const MARKED_CONFIDENCE: f32 = 0.9;
const DECOY_CONFIDENCE: f32 = 0.2;
const DECOY_OTHER_CLASS: &str = "person";

/// Stub backend for tests and dry runs.
///
/// Reads the occupancy marker written by `stub://` sources and reports that many
/// `label` detections. Each frame also carries one low-confidence `label` decoy and
/// one confident detection of another class, so the scorer's filters see realistic
/// input. Frames without a marker yield only the decoys.
pub struct StubBackend {
    label: String,
}

impl StubBackend {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl ObjectDetector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if !frame.is_well_formed() {
            return Err(SwitcherError::detector(format!(
                "malformed frame #{}: {} bytes for {}x{}",
                frame.sequence,
                frame.byte_len(),
                frame.width,
                frame.height
            ))
            .into());
        }

        let marked = read_occupancy_marker(frame.pixels()).unwrap_or(0);
        let mut detections: Vec<Detection> = (0..marked)
            .map(|_| Detection::new(self.label.clone(), MARKED_CONFIDENCE))
            .collect();
        detections.push(Detection::new(self.label.clone(), DECOY_CONFIDENCE));
        if self.label != DECOY_OTHER_CLASS {
            detections.push(Detection::new(DECOY_OTHER_CLASS, MARKED_CONFIDENCE));
        }
        Ok(detections)
    }
}
