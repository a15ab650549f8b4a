//! Analog raw-read primitive.
//!
//! Half the ADC channels share silicon with the radio; the profile's
//! radio-safe list decides which pins are readable while the link is up.

use std::fmt;

use gaia_common::error::ErrorCode;

use crate::board::{Board, PinMode};
use crate::profile::BoardProfile;

/// Full-scale ADC value (12-bit).
pub const ADC_MAX: u16 = 4095;

/// Analog read failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalogError {
    /// Pin has no ADC channel.
    NotAdcCapable(u8),
    /// Channel unusable while the radio is active.
    RadioConflict(u8),
    /// Hardware refused the sample.
    ReadFailed(u8),
}

impl AnalogError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ANALOG_PIN_UNAVAILABLE
    }
}

impl fmt::Display for AnalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAdcCapable(pin) => write!(f, "pin {pin} has no adc channel"),
            Self::RadioConflict(pin) => {
                write!(f, "pin {pin} adc unusable while the radio is active")
            }
            Self::ReadFailed(pin) => write!(f, "adc sample on pin {pin} failed"),
        }
    }
}

impl std::error::Error for AnalogError {}

/// Configure the pin as an analog input and take one 12-bit sample.
pub fn read_raw_analog(
    board: &mut dyn Board,
    profile: &BoardProfile,
    pin: u8,
) -> Result<u16, AnalogError> {
    if !profile.is_adc(pin) {
        return Err(AnalogError::NotAdcCapable(pin));
    }
    if board.radio_active() && !profile.is_radio_safe_adc(pin) {
        return Err(AnalogError::RadioConflict(pin));
    }
    board
        .set_pin_mode(pin, PinMode::AnalogIn)
        .map_err(|_| AnalogError::ReadFailed(pin))?;
    let sample = board.analog_read(pin).map_err(|_| AnalogError::ReadFailed(pin))?;
    Ok(sample.min(ADC_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ESP32;
    use crate::sim::SimBoard;

    #[test]
    fn samples_adc_capable_pin() {
        let mut board = SimBoard::new();
        board.set_analog(32, 2048);
        assert_eq!(read_raw_analog(&mut board, &ESP32, 32), Ok(2048));
        assert_eq!(board.pin_mode(32), Some(PinMode::AnalogIn));
    }

    #[test]
    fn non_adc_pin_refused() {
        let mut board = SimBoard::new();
        assert_eq!(
            read_raw_analog(&mut board, &ESP32, 16),
            Err(AnalogError::NotAdcCapable(16))
        );
    }

    #[test]
    fn radio_conflict_refused() {
        let mut board = SimBoard::new();
        board.set_radio_active(true);
        board.set_analog(4, 100);
        // GPIO4 is an ADC2 channel — unusable with the radio up.
        assert_eq!(
            read_raw_analog(&mut board, &ESP32, 4),
            Err(AnalogError::RadioConflict(4))
        );
        // ADC1 channels keep working.
        board.set_analog(32, 100);
        assert_eq!(read_raw_analog(&mut board, &ESP32, 32), Ok(100));
    }

    #[test]
    fn sample_clamped_to_full_scale() {
        let mut board = SimBoard::new();
        board.set_analog(33, u16::MAX);
        assert_eq!(read_raw_analog(&mut board, &ESP32, 33), Ok(ADC_MAX));
    }
}
