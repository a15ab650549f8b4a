//! Two-pin position valve driver.
//!
//! The primary pin enables the motor, the secondary pin selects the
//! direction. Three discrete positions (closed / mid / open); a move
//! energizes the enable pin for `|delta| × (transition_time_ms / 2)` and
//! `tick` drops it when the time has elapsed. Motion is asynchronous and
//! a new command cancels an in-flight move cleanly.

use gaia_hal::board::{Board, Level};
use tracing::{debug, warn};

use super::driver::{
    ActuatorConfig, ActuatorDriver, ActuatorError, ActuatorKind, ActuatorStatus, TickEvent,
};

/// Valve positions.
pub const POS_CLOSED: u8 = 0;
pub const POS_MID: u8 = 1;
pub const POS_OPEN: u8 = 2;

/// Position valve with direction + enable pins.
pub struct ValveDriver {
    config: ActuatorConfig,
    direction_pin: u8,
    initialized: bool,
    emergency_stopped: bool,
    current_position: u8,
    target_position: u8,
    moving: bool,
    move_start_ms: u64,
    move_duration_ms: u64,
}

impl ValveDriver {
    /// Requires `pin_b` in the config; refused otherwise at registry
    /// level, so this constructor trusts it.
    pub fn new(config: ActuatorConfig) -> Self {
        let direction_pin = config.pin_b.unwrap_or(config.pin);
        Self {
            config,
            direction_pin,
            initialized: false,
            emergency_stopped: false,
            current_position: POS_CLOSED,
            target_position: POS_CLOSED,
            moving: false,
            move_start_ms: 0,
            move_duration_ms: 0,
        }
    }

    /// Map a level in [0, 1] onto the three positions.
    fn position_for_level(level: f64) -> u8 {
        if level < 1.0 / 3.0 {
            POS_CLOSED
        } else if level < 2.0 / 3.0 {
            POS_MID
        } else {
            POS_OPEN
        }
    }

    fn drop_enable(&self, board: &mut dyn Board) {
        if let Err(e) = board.digital_write(self.config.pin, Level::Low) {
            warn!(pin = self.config.pin, "enable drop failed: {e}");
        }
    }

    fn move_to(
        &mut self,
        target: u8,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError> {
        // Cancel any in-flight motion first: enable low, position stays
        // at the last confirmed stop.
        if self.moving {
            self.drop_enable(board);
            self.moving = false;
        }

        if target == self.current_position {
            return Ok(());
        }

        let delta = i16::from(target) - i16::from(self.current_position);
        let steps = delta.unsigned_abs() as u64;
        let direction = if delta > 0 { Level::High } else { Level::Low };

        board
            .digital_write(self.direction_pin, direction)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))?;
        board
            .digital_write(self.config.pin, Level::High)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))?;

        self.target_position = target;
        self.moving = true;
        self.move_start_ms = now_ms;
        self.move_duration_ms = steps * (self.config.transition_time_ms / 2);
        debug!(
            pin = self.config.pin,
            from = self.current_position,
            to = target,
            duration_ms = self.move_duration_ms,
            "valve motion started"
        );
        Ok(())
    }
}

impl ActuatorDriver for ValveDriver {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::PositionValve
    }

    fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    fn init(&mut self, board: &mut dyn Board) -> Result<(), ActuatorError> {
        board
            .digital_write(self.config.pin, Level::Low)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))?;
        board
            .digital_write(self.direction_pin, Level::Low)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))?;
        self.initialized = true;
        Ok(())
    }

    fn set_binary(
        &mut self,
        on: bool,
        force: bool,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        if self.emergency_stopped && !force {
            return Err(ActuatorError::EmergencyStopped);
        }
        self.move_to(if on { POS_OPEN } else { POS_CLOSED }, board, now_ms)
    }

    fn set_level(
        &mut self,
        level: f64,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        if self.emergency_stopped {
            return Err(ActuatorError::EmergencyStopped);
        }
        let clamped = level.clamp(0.0, 1.0);
        self.move_to(Self::position_for_level(clamped), board, now_ms)
    }

    fn emergency_stop(&mut self, reason: &str, board: &mut dyn Board, _now_ms: u64) {
        warn!(pin = self.config.pin, reason, "valve emergency stop");
        self.drop_enable(board);
        self.moving = false;
        self.emergency_stopped = true;
    }

    fn clear_emergency(&mut self) {
        self.emergency_stopped = false;
    }

    fn tick(&mut self, board: &mut dyn Board, now_ms: u64) -> Option<TickEvent> {
        if !self.moving {
            return None;
        }
        if now_ms.saturating_sub(self.move_start_ms) >= self.move_duration_ms {
            self.drop_enable(board);
            self.moving = false;
            self.current_position = self.target_position;
            debug!(
                pin = self.config.pin,
                position = self.current_position,
                "valve motion complete"
            );
            return Some(TickEvent::MotionComplete {
                position: self.current_position,
            });
        }
        None
    }

    fn status(&self, _now_ms: u64) -> ActuatorStatus {
        ActuatorStatus {
            state: self.current_position != POS_CLOSED,
            level: match self.current_position {
                POS_CLOSED => 0,
                POS_MID => 128,
                _ => 255,
            },
            runtime_ms: 0,
            emergency: self.emergency_stopped,
            position: Some(self.current_position),
            moving: self.moving,
        }
    }

    fn emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }
}
