//! Occupancy scoring: detections in one frame -> one integer.
//!
//! A detection counts when its label equals the target class and its confidence
//! strictly exceeds the threshold. Overlapping boxes are NOT merged: three boxes
//! on the same cat count as three. This is raw per-detection counting, not
//! instance counting, and it is what decisions are calibrated against.

use crate::detect::{Detection, ObjectDetector, SharedDetector};
use crate::error::{classify, SwitcherError};
use crate::frame::Frame;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Clone, Debug, PartialEq)]
pub struct OccupancyScorer {
    target_class: String,
    threshold: f32,
}

impl OccupancyScorer {
    pub fn new(target_class: impl Into<String>, threshold: f32) -> Self {
        Self {
            target_class: target_class.into(),
            threshold,
        }
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Reduce raw detections to the occupancy count.
    pub fn count(&self, detections: &[Detection]) -> u32 {
        let matching = detections
            .iter()
            .filter(|d| d.label == self.target_class && d.confidence > self.threshold)
            .count();
        u32::try_from(matching).unwrap_or(u32::MAX)
    }

    /// Run the detector on `frame` and count the target class.
    ///
    /// Every detector failure surfaces as `SwitcherError::Detector`.
    pub fn score(
        &self,
        detector: &mut dyn ObjectDetector,
        frame: &Frame,
    ) -> Result<u32, SwitcherError> {
        let detections = detector.detect(frame).map_err(|err| match classify(&err) {
            Some(typed @ SwitcherError::Detector(_)) => typed.clone(),
            _ => SwitcherError::detector(format!("{} backend: {:#}", detector.name(), err)),
        })?;
        Ok(self.count(&detections))
    }

    /// `score` against a detector shared between feeds.
    pub fn score_shared(&self, detector: &SharedDetector, frame: &Frame) -> Result<u32, SwitcherError> {
        let mut guard = detector
            .lock()
            .map_err(|_| SwitcherError::detector("detector lock poisoned"))?;
        self.score(&mut *guard, frame)
    }
}

impl Default for OccupancyScorer {
    fn default() -> Self {
        Self::new("cat", DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};

    struct FixedDetector(Vec<Detection>);

    impl ObjectDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    struct OfflineDetector;

    impl ObjectDetector for OfflineDetector {
        fn name(&self) -> &'static str {
            "offline"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("connection refused"))
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, 1)
    }

    #[test]
    fn counts_only_target_class_strictly_above_threshold() {
        let scorer = OccupancyScorer::new("cat", 0.5);
        let detections = vec![
            Detection::new("cat", 0.9),
            Detection::new("cat", 0.51),
            Detection::new("cat", 0.5),
            Detection::new("cat", 0.1),
            Detection::new("dog", 0.99),
            Detection::new("Cat", 0.99),
        ];
        assert_eq!(scorer.count(&detections), 2);
    }

    #[test]
    fn overlapping_boxes_are_counted_individually() {
        let scorer = OccupancyScorer::default();
        let detections = vec![Detection::new("cat", 0.8); 3];
        assert_eq!(scorer.count(&detections), 3);
    }

    #[test]
    fn empty_frame_scores_zero() -> Result<()> {
        let scorer = OccupancyScorer::default();
        let mut detector = FixedDetector(Vec::new());
        assert_eq!(scorer.score(&mut detector, &frame())?, 0);
        Ok(())
    }

    #[test]
    fn backend_failures_become_detector_errors() {
        let scorer = OccupancyScorer::default();
        let err = scorer.score(&mut OfflineDetector, &frame()).unwrap_err();
        assert_eq!(err.code(), "DETECTOR");
        assert!(err.to_string().contains("offline backend"));
    }

    #[test]
    fn shared_detector_is_scored_through_its_lock() -> Result<()> {
        let scorer = OccupancyScorer::new("cat", 0.5);
        let detector = crate::detect::shared(FixedDetector(vec![Detection::new("cat", 0.7)]));
        assert_eq!(scorer.score_shared(&detector, &frame())?, 1);
        Ok(())
    }
}
