//! PWM output driver.
//!
//! Level commands clamp to [0, 1] and scale onto the 8-bit duty range;
//! binary commands are full-off / full-on.

use gaia_hal::board::Board;
use tracing::warn;

use super::driver::{
    ActuatorConfig, ActuatorDriver, ActuatorError, ActuatorKind, ActuatorStatus, TickEvent,
};

/// Dimmable output on a PWM-capable pin.
pub struct PwmDriver {
    config: ActuatorConfig,
    initialized: bool,
    emergency_stopped: bool,
    duty: u8,
}

impl PwmDriver {
    pub fn new(config: ActuatorConfig) -> Self {
        Self {
            config,
            initialized: false,
            emergency_stopped: false,
            duty: 0,
        }
    }

    fn write_duty(&mut self, duty: u8, board: &mut dyn Board) -> Result<(), ActuatorError> {
        board
            .pwm_write(self.config.pin, duty)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))?;
        self.duty = duty;
        Ok(())
    }
}

impl ActuatorDriver for PwmDriver {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Pwm
    }

    fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    fn init(&mut self, board: &mut dyn Board) -> Result<(), ActuatorError> {
        self.write_duty(0, board)?;
        self.initialized = true;
        Ok(())
    }

    fn set_binary(
        &mut self,
        on: bool,
        force: bool,
        board: &mut dyn Board,
        _now_ms: u64,
    ) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        if self.emergency_stopped && !force {
            return Err(ActuatorError::EmergencyStopped);
        }
        self.write_duty(if on { 255 } else { 0 }, board)
    }

    fn set_level(
        &mut self,
        level: f64,
        board: &mut dyn Board,
        _now_ms: u64,
    ) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        if self.emergency_stopped {
            return Err(ActuatorError::EmergencyStopped);
        }
        let clamped = level.clamp(0.0, 1.0);
        let duty = (clamped * 255.0).round() as u8;
        self.write_duty(duty, board)
    }

    fn emergency_stop(&mut self, reason: &str, board: &mut dyn Board, _now_ms: u64) {
        warn!(pin = self.config.pin, reason, "pwm output emergency stop");
        if let Err(e) = self.write_duty(0, board) {
            warn!(pin = self.config.pin, "pwm emergency zero failed: {e}");
        }
        self.emergency_stopped = true;
    }

    fn clear_emergency(&mut self) {
        self.emergency_stopped = false;
    }

    fn tick(&mut self, _board: &mut dyn Board, _now_ms: u64) -> Option<TickEvent> {
        None
    }

    fn status(&self, _now_ms: u64) -> ActuatorStatus {
        ActuatorStatus {
            state: self.duty > 0,
            level: self.duty,
            runtime_ms: 0,
            emergency: self.emergency_stopped,
            position: None,
            moving: false,
        }
    }

    fn emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }
}
