use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::error::SwitcherError;

use super::OutputController;

#[derive(Debug, Default)]
struct MemoryState {
    active: String,
    outputs: Option<BTreeSet<String>>,
    queries: u64,
    set_calls: Vec<String>,
    failures_pending: u32,
    closed: bool,
}

/// In-process controller for dry runs and tests.
///
/// Clones share state, so a test can keep a clone to inspect the calls the
/// policy made through the boxed controller.
#[derive(Clone, Debug, Default)]
pub struct MemoryController {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryController {
    pub fn new(initial: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                active: initial.to_string(),
                ..MemoryState::default()
            })),
        }
    }

    /// Reject switches to names outside `outputs`, like a scene list would.
    pub fn with_outputs<I: IntoIterator<Item = String>>(self, outputs: I) -> Self {
        self.lock().outputs = Some(outputs.into_iter().collect());
        self
    }

    /// Make the next `count` switch attempts fail.
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_pending = count;
    }

    pub fn active(&self) -> String {
        self.lock().active.clone()
    }

    /// Every `set_active_output` call, including failed ones.
    pub fn set_calls(&self) -> Vec<String> {
        self.lock().set_calls.clone()
    }

    pub fn query_count(&self) -> u64 {
        self.lock().queries
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputController for MemoryController {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn active_output(&mut self) -> Result<String> {
        let mut state = self.lock();
        if state.closed {
            return Err(anyhow!("memory controller closed"));
        }
        state.queries += 1;
        Ok(state.active.clone())
    }

    fn set_active_output(&mut self, output: &str) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(anyhow!("memory controller closed"));
        }
        state.set_calls.push(output.to_string());
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(SwitcherError::actuator(format!("switch to '{}' failed", output)).into());
        }
        if let Some(outputs) = &state.outputs {
            if !outputs.contains(output) {
                return Err(SwitcherError::actuator(format!("no output named '{}'", output)).into());
            }
        }
        state.active = output.to_string();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_same_state() -> Result<()> {
        let observer = MemoryController::new("A");
        let mut controller = observer.clone();

        assert_eq!(controller.active_output()?, "A");
        controller.set_active_output("B")?;
        assert_eq!(observer.active(), "B");
        assert_eq!(observer.set_calls(), vec!["B"]);
        assert_eq!(observer.query_count(), 1);
        Ok(())
    }

    #[test]
    fn injected_failures_leave_active_output_alone() {
        let mut controller = MemoryController::new("A");
        controller.fail_next(1);
        assert!(controller.set_active_output("B").is_err());
        assert_eq!(controller.active(), "A");
        assert!(controller.set_active_output("B").is_ok());
        assert_eq!(controller.active(), "B");
    }

    #[test]
    fn unknown_outputs_are_rejected() {
        let mut controller =
            MemoryController::new("A").with_outputs(["A".to_string(), "B".to_string()]);
        let err = controller.set_active_output("C").unwrap_err();
        assert_eq!(
            crate::error::classify(&err).map(SwitcherError::code),
            Some("ACTUATOR")
        );
    }

    #[test]
    fn closed_controller_refuses_calls() -> Result<()> {
        let mut controller = MemoryController::new("A");
        controller.close()?;
        assert!(controller.is_closed());
        assert!(controller.active_output().is_err());
        Ok(())
    }
}
