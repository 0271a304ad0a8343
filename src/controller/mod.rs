//! Output controllers.
//!
//! The output controller is the actuator at the end of the loop: it reports which
//! output is live and switches to another by name. Controllers own their
//! connection and must bound every call (the HTTP controller uses the configured
//! call timeout); the switch policy never retries within a decision.

#[cfg(feature = "controller-http")]
pub mod http;
pub mod memory;

use anyhow::Result;

use crate::config::ControllerSettings;
use crate::error::SwitcherError;

#[cfg(feature = "controller-http")]
pub use http::HttpController;
pub use memory::MemoryController;

/// Output controller capability consumed by the switch policy.
pub trait OutputController: Send {
    /// Controller identifier.
    fn name(&self) -> &'static str;

    /// Name of the output that is live right now.
    fn active_output(&mut self) -> Result<String>;

    /// Make `output` live.
    fn set_active_output(&mut self, output: &str) -> Result<()>;

    /// Release the connection. Called once on shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Construct the configured controller. `outputs` are the registered feed names.
pub fn build_controller(
    settings: &ControllerSettings,
    outputs: &[String],
) -> Result<Box<dyn OutputController>> {
    match settings.kind.as_str() {
        "memory" => {
            let initial = settings
                .initial_output
                .clone()
                .or_else(|| outputs.first().cloned())
                .unwrap_or_default();
            log::info!("controller: in-memory, initial output '{}'", initial);
            Ok(Box::new(
                MemoryController::new(&initial).with_outputs(outputs.iter().cloned()),
            ))
        }
        "http" => build_http(settings),
        other => Err(SwitcherError::configuration(format!(
            "unknown controller kind '{}'; expected memory or http",
            other
        ))
        .into()),
    }
}

#[cfg(feature = "controller-http")]
fn build_http(settings: &ControllerSettings) -> Result<Box<dyn OutputController>> {
    let url = settings.url.as_deref().ok_or_else(|| {
        SwitcherError::configuration("controller.url is required for the http controller")
    })?;
    let controller = HttpController::new(url, settings.token.clone(), settings.timeout)?;
    log::info!("controller: http at {}", controller.base_url());
    Ok(Box::new(controller))
}

#[cfg(not(feature = "controller-http"))]
fn build_http(_settings: &ControllerSettings) -> Result<Box<dyn OutputController>> {
    Err(SwitcherError::configuration("the http controller requires the controller-http feature").into())
}
