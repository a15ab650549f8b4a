//! Board port trait and hardware-level types.
//!
//! The trait is deliberately thin: raw pin, ADC, PWM, I²C and single-wire
//! primitives plus board diagnostics. Policy (ownership, safety, retries,
//! protocol framing) lives above it, so a backend only maps these calls
//! onto its peripheral registers. The simulation backend records every
//! call for ordering assertions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Electrical configuration of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    /// High impedance with weak pull-up. The safe state.
    HighZPullUp,
    /// Plain digital input.
    Input,
    /// Push-pull digital output.
    Output,
    /// Analog input (ADC channel).
    AnalogIn,
    /// PWM output.
    Pwm,
    /// Single-wire data line.
    OneWire,
    /// Reserved for the I²C peripheral.
    I2c,
}

/// Digital logic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// The opposite level.
    pub fn inverted(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Hardware-level failure reported by a board backend.
#[derive(Debug, Clone, Error)]
pub enum BoardError {
    /// Pin number does not exist on this board.
    #[error("pin {0} not present on this board")]
    NoSuchPin(u8),

    /// Pin cannot be used in the requested mode.
    #[error("pin {pin} does not support {mode:?}")]
    UnsupportedMode { pin: u8, mode: PinMode },

    /// I²C device did not acknowledge.
    #[error("no ack from i2c device 0x{0:02X}")]
    I2cNack(u8),

    /// I²C bus fault (arbitration lost, lines stuck, not initialized).
    #[error("i2c bus fault: {0}")]
    I2cBus(String),

    /// Single-wire reset saw no presence pulse.
    #[error("no presence pulse on single-wire pin {0}")]
    OneWireNoPresence(u8),

    /// Generic transfer failure.
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Hardware port implemented per board backend.
///
/// All mutating operations take `&mut self`; the single-threaded loop is
/// the only caller, so backends never need interior locking.
pub trait Board {
    /// Reconfigure a pin. Must leave the pin electrically idle in the
    /// new mode.
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), BoardError>;

    /// Read back the currently configured mode, if the backend can.
    ///
    /// Used only for boot verification; `None` means "cannot verify".
    fn pin_mode(&self, pin: u8) -> Option<PinMode>;

    fn digital_write(&mut self, pin: u8, level: Level) -> Result<(), BoardError>;

    fn digital_read(&self, pin: u8) -> Result<Level, BoardError>;

    /// 12-bit ADC sample (0–4095).
    fn analog_read(&mut self, pin: u8) -> Result<u16, BoardError>;

    /// 8-bit duty cycle on a PWM-capable pin.
    fn pwm_write(&mut self, pin: u8, duty: u8) -> Result<(), BoardError>;

    /// Write `reg` to the device then read `buf.len()` bytes with a
    /// repeated start. Returns the number of bytes actually read.
    fn i2c_write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<usize, BoardError>;

    /// Single-wire bus reset. Returns true when a presence pulse was seen.
    fn onewire_reset(&mut self, pin: u8) -> Result<bool, BoardError>;

    fn onewire_write(&mut self, pin: u8, bytes: &[u8]) -> Result<(), BoardError>;

    fn onewire_read(&mut self, pin: u8, buf: &mut [u8]) -> Result<(), BoardError>;

    /// Busy-wait for a short settle interval.
    fn delay_us(&mut self, us: u64);

    /// Factory MAC address of the network interface.
    fn mac_address(&self) -> [u8; 6];

    /// Free heap in bytes.
    fn heap_free(&self) -> u32;

    /// Link RSSI in dBm (0 when not associated).
    fn link_rssi(&self) -> i32;

    /// Whether the radio is up (gates half the ADC channels).
    fn radio_active(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_inversion() {
        assert_eq!(Level::Low.inverted(), Level::High);
        assert_eq!(Level::High.inverted(), Level::Low);
    }

    #[test]
    fn pin_mode_serializes_snake_case() {
        let s = serde_json::to_string(&PinMode::HighZPullUp).unwrap();
        assert_eq!(s, "\"high_z_pull_up\"");
    }
}
