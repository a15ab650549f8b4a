//! Error code space shared between node and server.
//!
//! Codes are partitioned by range: 1000–1999 hardware, 2000–2999 service,
//! 3000–3999 communication, 4000–4999 application. The server keys its
//! diagnostics on these numbers — never renumber an existing code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity attached to a tracked error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Degraded but operational.
    Warning,
    /// Operation failed; retried or skipped.
    Error,
    /// Hardware or system integrity at risk.
    Critical,
}

/// Coarse classification derived from the code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Hardware,
    Service,
    Communication,
    Application,
    Unknown,
}

/// Wire-stable numeric error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ─── Hardware (1000–1999) ───────────────────────────────────────
    /// Pin is not in the board's safe list.
    pub const PIN_NOT_SAFE: Self = Self(1001);
    /// Pin already owned by another component.
    pub const PIN_IN_USE: Self = Self(1002);
    /// Pin was never registered with the registry.
    pub const PIN_NOT_REGISTERED: Self = Self(1003);
    /// Boot-time pin state readback did not match the safe mode.
    pub const PIN_STATE_MISMATCH: Self = Self(1004);
    /// I²C bus-level fault (arbitration, init, SDA/SCL stuck).
    pub const I2C_BUS_ERROR: Self = Self(1101);
    /// I²C device did not acknowledge its address.
    pub const I2C_DEVICE_NOT_FOUND: Self = Self(1102);
    /// I²C read returned the wrong byte count or failed mid-transfer.
    pub const I2C_READ_FAILED: Self = Self(1103);
    /// Single-wire read failed (no presence, CRC mismatch, bad data).
    pub const ONEWIRE_READ_FAILED: Self = Self(1110);
    /// Analog read refused: channel unusable while the radio is up.
    pub const ANALOG_PIN_UNAVAILABLE: Self = Self(1120);

    // ─── Service (2000–2999) ────────────────────────────────────────
    /// Persistent namespace could not be opened.
    pub const NAMESPACE_OPEN_FAILED: Self = Self(2001);
    /// Persistent write or commit failed; in-memory state retained.
    pub const NVS_WRITE_FAILED: Self = Self(2002);

    // ─── Communication (3000–3999) ──────────────────────────────────
    /// Broker connection attempt failed.
    pub const MQTT_CONNECT_FAILED: Self = Self(3001);
    /// Publish handed to the link failed.
    pub const MQTT_PUBLISH_FAILED: Self = Self(3002);
    /// Offline buffer full; newest message dropped.
    pub const MQTT_BUFFER_FULL: Self = Self(3003);
    /// Out-of-band processing request timed out.
    pub const PROCESSING_TIMEOUT: Self = Self(3010);
    /// Out-of-band processing request failed or returned invalid data.
    pub const PROCESSING_FAILED: Self = Self(3011);

    // ─── Application (4000–4999) ────────────────────────────────────
    /// Sensor table full.
    pub const SENSOR_CAPACITY: Self = Self(4001);
    /// Actuator table full.
    pub const ACTUATOR_CAPACITY: Self = Self(4002);
    /// Requested pin conflicts with an existing owner.
    pub const GPIO_CONFLICT: Self = Self(4003);
    /// Configuration payload failed validation.
    pub const VALIDATION_FAILED: Self = Self(4004);
    /// Pin could not be parsed out of the command topic.
    pub const INVALID_TOPIC: Self = Self(4005);
    /// Command verb not recognized.
    pub const UNKNOWN_COMMAND: Self = Self(4006);
    /// JSON payload malformed.
    pub const INVALID_PAYLOAD: Self = Self(4007);
    /// Command rejected: emergency stop active.
    pub const EMERGENCY_ACTIVE: Self = Self(4010);
    /// Command rejected: runtime/duty protection tripped.
    pub const PROTECTION_TRIPPED: Self = Self(4011);
    /// Command rejected: node not approved by the server.
    pub const NOT_APPROVED: Self = Self(4012);
    /// Subzone operation failed validation.
    pub const SUBZONE_INVALID: Self = Self(4020);

    /// Classify by range.
    pub const fn class(self) -> ErrorClass {
        match self.0 {
            1000..=1999 => ErrorClass::Hardware,
            2000..=2999 => ErrorClass::Service,
            3000..=3999 => ErrorClass::Communication,
            4000..=4999 => ErrorClass::Application,
            _ => ErrorClass::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A refused configuration item: wire code plus a human-readable reason.
#[derive(Debug, Clone)]
pub struct ConfigFault {
    pub code: ErrorCode,
    pub message: String,
}

impl ConfigFault {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ConfigFault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_ranges_classify() {
        assert_eq!(ErrorCode::PIN_IN_USE.class(), ErrorClass::Hardware);
        assert_eq!(ErrorCode::NVS_WRITE_FAILED.class(), ErrorClass::Service);
        assert_eq!(
            ErrorCode::MQTT_BUFFER_FULL.class(),
            ErrorClass::Communication
        );
        assert_eq!(
            ErrorCode::SENSOR_CAPACITY.class(),
            ErrorClass::Application
        );
        assert_eq!(ErrorCode(9999).class(), ErrorClass::Unknown);
    }

    #[test]
    fn display_format() {
        assert_eq!(ErrorCode::PIN_NOT_SAFE.to_string(), "E1001");
    }

    #[test]
    fn severity_serializes_lowercase() {
        let s = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(s, "\"critical\"");
    }
}
