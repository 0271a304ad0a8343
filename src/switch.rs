//! Switch policy: hysteresis around the actuator.
//!
//! A decision only reaches the controller when the cooldown has expired and the
//! winner differs from what is already live. A successful switch arms the cooldown;
//! a failed one leaves it untouched so the next decision retries.

use crate::controller::OutputController;
use crate::error::{classify, SwitcherError};

/// Remaining ticks before another switch is permitted. Never negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CooldownTimer {
    remaining: u32,
}

impl CooldownTimer {
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    pub fn arm(&mut self, ticks: u32) {
        self.remaining = ticks;
    }

    /// One tick elapsed; floors at zero.
    pub fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched { from: String, to: String },
    SkippedAlreadyActive,
    SkippedCooldown { remaining: u32 },
}

impl SwitchOutcome {
    pub fn is_switch(&self) -> bool {
        matches!(self, Self::Switched { .. })
    }
}

#[derive(Debug)]
pub struct SwitchPolicy {
    cooldown_ticks: u32,
    timer: CooldownTimer,
}

impl SwitchPolicy {
    pub fn new(cooldown_ticks: u32) -> Self {
        Self {
            cooldown_ticks,
            timer: CooldownTimer::default(),
        }
    }

    pub fn cooldown_ticks(&self) -> u32 {
        self.cooldown_ticks
    }

    pub fn cooldown(&self) -> CooldownTimer {
        self.timer
    }

    /// Advance the cooldown by one tick.
    pub fn tick(&mut self) {
        self.timer.tick();
    }

    /// Act on a decision.
    ///
    /// Makes no controller call while cooling down, and no set call when `winner`
    /// is already live.
    pub fn maybe_switch(
        &mut self,
        controller: &mut dyn OutputController,
        winner: &str,
    ) -> Result<SwitchOutcome, SwitcherError> {
        if self.timer.is_active() {
            return Ok(SwitchOutcome::SkippedCooldown {
                remaining: self.timer.remaining(),
            });
        }

        let name = controller.name();
        let active = controller
            .active_output()
            .map_err(|e| actuator_error(name, "query active output", &e))?;
        if active == winner {
            return Ok(SwitchOutcome::SkippedAlreadyActive);
        }

        controller
            .set_active_output(winner)
            .map_err(|e| actuator_error(name, &format!("switch to '{}'", winner), &e))?;
        self.timer.arm(self.cooldown_ticks);
        Ok(SwitchOutcome::Switched {
            from: active,
            to: winner.to_string(),
        })
    }
}

fn actuator_error(controller: &str, action: &str, err: &anyhow::Error) -> SwitcherError {
    match classify(err) {
        Some(typed @ SwitcherError::Actuator(_)) => typed.clone(),
        _ => SwitcherError::actuator(format!("{} controller: {}: {:#}", controller, action, err)),
    }
}
