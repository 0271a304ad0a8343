pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::Result;

use crate::config::DetectorSettings;
use crate::detect::backend::{shared, SharedDetector};
use crate::error::SwitcherError;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Construct the configured detector backend and run its warm-up hook.
pub fn build_backend(settings: &DetectorSettings) -> Result<SharedDetector> {
    match settings.backend.as_str() {
        "stub" => {
            let backend = StubBackend::new(&settings.stub_label);
            log::info!("detector: stub backend emitting '{}'", settings.stub_label);
            Ok(shared(backend))
        }
        "tract" => build_tract(settings),
        other => Err(SwitcherError::configuration(format!(
            "unknown detector backend '{}'; expected stub or tract",
            other
        ))
        .into()),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<SharedDetector> {
    use crate::detect::backend::ObjectDetector;

    let model_path = settings.model_path.as_ref().ok_or_else(|| {
        SwitcherError::configuration("detector.model_path is required for the tract backend")
    })?;
    let labels_path = settings.labels_path.as_ref().ok_or_else(|| {
        SwitcherError::configuration("detector.labels_path is required for the tract backend")
    })?;
    let mut backend = TractBackend::new(
        model_path,
        labels_path,
        settings.input_width,
        settings.input_height,
    )?;
    backend.warm_up()?;
    log::info!(
        "detector: tract backend loaded {} ({}x{})",
        model_path.display(),
        settings.input_width,
        settings.input_height
    );
    Ok(shared(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<SharedDetector> {
    Err(SwitcherError::configuration("the tract detector requires the backend-tract feature").into())
}
