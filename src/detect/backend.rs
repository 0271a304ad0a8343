use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::frame::Frame;

use super::result::Detection;

/// Object detector trait.
///
/// Implementations return every region they detect; filtering by class and
/// confidence is the scorer's job. A backend that cannot run (model missing,
/// frame malformed) returns an error carrying `SwitcherError::Detector`.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. The frame is borrowed for the call only.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Detector shared by all feed workers.
///
/// Wrapped in `Mutex` because `ObjectDetector::detect` takes `&mut self`.
pub type SharedDetector = Arc<Mutex<dyn ObjectDetector>>;

pub fn shared<D: ObjectDetector + 'static>(detector: D) -> SharedDetector {
    Arc::new(Mutex::new(detector))
}
