//! Actuator driver trait and shared types.
//!
//! One driver per configured actuator. Hardware access is passed in per
//! call; drivers keep only their own state, so the registry can iterate
//! them against a single board reference.

use gaia_common::error::ErrorCode;
use gaia_hal::board::Board;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of supported actuator types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    BinaryPump,
    BinaryRelay,
    PositionValve,
    Pwm,
}

impl ActuatorKind {
    /// Parse a wire discriminant. Unknown strings are refused — unlike
    /// sensors there is no harmless fallback for an output device.
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("pump") {
            Some(Self::BinaryPump)
        } else if lower.contains("relay") || lower.contains("switch") {
            Some(Self::BinaryRelay)
        } else if lower.contains("valve") {
            Some(Self::PositionValve)
        } else if lower.contains("pwm") || lower.contains("dimmer") {
            Some(Self::Pwm)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BinaryPump => "binary_pump",
            Self::BinaryRelay => "binary_relay",
            Self::PositionValve => "position_valve",
            Self::Pwm => "pwm",
        }
    }
}

/// Pump hardware protection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    /// Max accumulated run time before a cooldown is required [ms].
    pub max_run_ms: u64,
    /// Cooldown after the runtime budget is spent [ms].
    pub cooldown_ms: u64,
    /// Rolling window for the activation-frequency gate [ms]. 0 disables.
    pub window_ms: u64,
    /// Max activations inside the rolling window.
    pub max_activations_per_window: u32,
}

/// Static configuration of one actuator.
#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    pub pin: u8,
    /// Direction pin for two-pin position drivers.
    pub pin_b: Option<u8>,
    pub kind: ActuatorKind,
    /// Wire discriminant as configured, echoed back in telemetry.
    pub kind_raw: String,
    pub name: String,
    pub subzone_id: Option<String>,
    pub inverted_logic: bool,
    /// Full-travel time for position valves [ms].
    pub transition_time_ms: u64,
    pub protection: Option<Protection>,
}

/// Snapshot of driver state for telemetry.
#[derive(Debug, Clone, Copy)]
pub struct ActuatorStatus {
    /// Binary on/off view of the output.
    pub state: bool,
    /// PWM duty (0–255); 0/255 for binary outputs.
    pub level: u8,
    /// Accumulated run time [ms].
    pub runtime_ms: u64,
    pub emergency: bool,
    /// Valve position (0 closed, 1 mid, 2 open).
    pub position: Option<u8>,
    /// Valve motion in progress.
    pub moving: bool,
}

/// Driver-level command failure.
#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    #[error("driver not initialized")]
    NotInitialized,

    #[error("emergency stop active")]
    EmergencyStopped,

    #[error("runtime protection tripped: {0}")]
    ProtectionTripped(&'static str),

    #[error("invalid level {0}")]
    InvalidLevel(f64),

    #[error("hardware fault: {0}")]
    Hardware(String),
}

impl ActuatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::VALIDATION_FAILED,
            Self::EmergencyStopped => ErrorCode::EMERGENCY_ACTIVE,
            Self::ProtectionTripped(_) => ErrorCode::PROTECTION_TRIPPED,
            Self::InvalidLevel(_) => ErrorCode::VALIDATION_FAILED,
            Self::Hardware(_) => ErrorCode::PIN_STATE_MISMATCH,
        }
    }

    /// Alert reason string for the `.../alert` topic, when one is due.
    pub fn alert_reason(&self) -> Option<&'static str> {
        match self {
            Self::EmergencyStopped => Some("emergency_stop"),
            Self::ProtectionTripped(_) => Some("runtime_protection"),
            _ => None,
        }
    }
}

/// Event surfaced by a driver's `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// Output was forced off by the runtime budget.
    AutoStopped { reason: &'static str },
    /// Valve motion finished.
    MotionComplete { position: u8 },
}

/// Per-type actuator driver.
pub trait ActuatorDriver {
    fn kind(&self) -> ActuatorKind;

    fn config(&self) -> &ActuatorConfig;

    /// Configure the output hardware and drive it inactive. Called once
    /// after the pins are claimed.
    fn init(&mut self, board: &mut dyn Board) -> Result<(), ActuatorError>;

    /// Binary command. `force` bypasses the emergency gate (used by the
    /// safety controller itself, never by server commands).
    fn set_binary(
        &mut self,
        on: bool,
        force: bool,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError>;

    /// Continuous command in [0, 1]. Binary drivers threshold at 0.5,
    /// valves map to thirds, PWM scales to 0–255.
    fn set_level(
        &mut self,
        level: f64,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError>;

    /// Drive the output to its inactive state and latch the emergency
    /// flag. Infallible: best effort, never refuses.
    fn emergency_stop(&mut self, reason: &str, board: &mut dyn Board, now_ms: u64);

    /// Unlatch the emergency flag. Does not re-activate the output.
    fn clear_emergency(&mut self);

    /// Per-iteration housekeeping (runtime accounting, motion timing).
    fn tick(&mut self, board: &mut dyn Board, now_ms: u64) -> Option<TickEvent>;

    fn status(&self, now_ms: u64) -> ActuatorStatus;

    fn emergency_stopped(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing() {
        assert_eq!(ActuatorKind::parse("binary_pump"), Some(ActuatorKind::BinaryPump));
        assert_eq!(ActuatorKind::parse("water_pump"), Some(ActuatorKind::BinaryPump));
        assert_eq!(ActuatorKind::parse("RELAY"), Some(ActuatorKind::BinaryRelay));
        assert_eq!(
            ActuatorKind::parse("position_valve"),
            Some(ActuatorKind::PositionValve)
        );
        assert_eq!(ActuatorKind::parse("pwm_fan"), Some(ActuatorKind::Pwm));
        assert_eq!(ActuatorKind::parse("servo"), None);
    }

    #[test]
    fn error_classification() {
        assert_eq!(
            ActuatorError::EmergencyStopped.alert_reason(),
            Some("emergency_stop")
        );
        assert_eq!(
            ActuatorError::ProtectionTripped("max run").alert_reason(),
            Some("runtime_protection")
        );
        assert_eq!(ActuatorError::InvalidLevel(2.0).alert_reason(), None);
        assert_eq!(
            ActuatorError::ProtectionTripped("x").code(),
            ErrorCode::PROTECTION_TRIPPED
        );
    }
}
