//! Per-board pin capability tables.
//!
//! The registry consults the profile for the safe-pin list, the ADC
//! channels that survive radio activity, and the reserved bus pins.
//! Numbers below are for the ESP32-WROOM class module the node ships on.

/// Static pin capability description of one board variant.
#[derive(Debug, Clone)]
pub struct BoardProfile {
    pub name: &'static str,
    /// Pins the firmware may hand out. Everything else is refused.
    pub safe_pins: &'static [u8],
    /// ADC-capable subset of the safe pins.
    pub adc_pins: &'static [u8],
    /// ADC pins that keep working while the radio is active (ADC1).
    pub radio_safe_adc: &'static [u8],
    /// Input-only pins (no output, no pull-up driver).
    pub input_only: &'static [u8],
    /// I²C data line, reserved at boot.
    pub i2c_sda: u8,
    /// I²C clock line, reserved at boot.
    pub i2c_scl: u8,
    /// Bootstrap pin sampled at reset (factory-reset button).
    pub bootstrap_pin: u8,
}

impl BoardProfile {
    pub fn is_safe(&self, pin: u8) -> bool {
        self.safe_pins.contains(&pin)
    }

    pub fn is_adc(&self, pin: u8) -> bool {
        self.adc_pins.contains(&pin)
    }

    pub fn is_radio_safe_adc(&self, pin: u8) -> bool {
        self.radio_safe_adc.contains(&pin)
    }

    pub fn is_input_only(&self, pin: u8) -> bool {
        self.input_only.contains(&pin)
    }

    pub fn is_bus_pin(&self, pin: u8) -> bool {
        pin == self.i2c_sda || pin == self.i2c_scl
    }
}

/// ESP32-WROOM-32 derivative. GPIO 7–11 (flash), 0/2/12/15 (strapping)
/// and 1/3 (console UART) are deliberately absent from the safe list.
pub const ESP32: BoardProfile = BoardProfile {
    name: "esp32-wroom",
    safe_pins: &[
        4, 5, 6, 13, 14, 16, 17, 18, 19, 23, 25, 26, 27, 32, 33, 34, 35, 36, 39,
    ],
    adc_pins: &[4, 13, 14, 25, 26, 27, 32, 33, 34, 35, 36, 39],
    radio_safe_adc: &[32, 33, 34, 35, 36, 39],
    input_only: &[34, 35, 36, 39],
    i2c_sda: 21,
    i2c_scl: 22,
    bootstrap_pin: 0,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp32_bus_pins_not_in_safe_list() {
        assert!(!ESP32.is_safe(ESP32.i2c_sda));
        assert!(!ESP32.is_safe(ESP32.i2c_scl));
    }

    #[test]
    fn radio_safe_adc_is_subset_of_adc() {
        for pin in ESP32.radio_safe_adc {
            assert!(ESP32.is_adc(*pin), "pin {pin} missing from adc list");
        }
    }

    #[test]
    fn input_only_pins_are_safe() {
        for pin in ESP32.input_only {
            assert!(ESP32.is_safe(*pin));
        }
    }

    #[test]
    fn server_facing_pins_are_usable() {
        // Server-side provisioning templates default to GPIO 4, 5 and 6.
        assert!(ESP32.is_safe(4));
        assert!(ESP32.is_safe(5));
        assert!(ESP32.is_adc(32));
    }
}
