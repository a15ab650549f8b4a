//! Single-wire temperature read primitive (DS18B20 family).
//!
//! A full read is two bus transactions separated by the conversion time:
//!
//! 1. reset → select ROM → CONVERT T (0x44)
//! 2. ≥ 750 ms later: reset → select ROM → READ SCRATCHPAD (0xBE, 9 bytes)
//!    → CRC-8 verify → signed 16-bit raw value
//!
//! The wait is the caller's problem (the poller keeps a pending queue so
//! the loop never blocks); this module only provides the two halves.

use std::fmt;

use gaia_common::error::ErrorCode;

use crate::board::Board;

/// CONVERT T command.
const CMD_CONVERT: u8 = 0x44;
/// READ SCRATCHPAD command.
const CMD_READ_SCRATCHPAD: u8 = 0xBE;
/// MATCH ROM command (addressed select).
const CMD_MATCH_ROM: u8 = 0x55;
/// SKIP ROM command (single device on the bus).
const CMD_SKIP_ROM: u8 = 0xCC;

/// Scratchpad size in bytes (8 data + CRC).
pub const SCRATCHPAD_LEN: usize = 9;

/// Single-wire failure. All variants map to `ONEWIRE_READ_FAILED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneWireError {
    /// No presence pulse after reset.
    NoPresence(u8),
    /// Bus transfer failed.
    Io(String),
    /// Scratchpad CRC mismatch.
    CrcMismatch { expected: u8, got: u8 },
}

impl OneWireError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ONEWIRE_READ_FAILED
    }
}

impl fmt::Display for OneWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPresence(pin) => write!(f, "no presence pulse on pin {pin}"),
            Self::Io(msg) => write!(f, "single-wire transfer failed: {msg}"),
            Self::CrcMismatch { expected, got } => {
                write!(f, "scratchpad crc mismatch: expected {expected:#04X}, got {got:#04X}")
            }
        }
    }
}

impl std::error::Error for OneWireError {}

/// Dallas CRC-8 (polynomial 0x31 reflected → 0x8C).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}

fn reset_and_select(
    board: &mut dyn Board,
    pin: u8,
    rom: Option<&[u8; 8]>,
) -> Result<(), OneWireError> {
    let present = board
        .onewire_reset(pin)
        .map_err(|e| OneWireError::Io(e.to_string()))?;
    if !present {
        return Err(OneWireError::NoPresence(pin));
    }
    match rom {
        Some(rom) => {
            let mut frame = [0u8; 9];
            frame[0] = CMD_MATCH_ROM;
            frame[1..].copy_from_slice(rom);
            board
                .onewire_write(pin, &frame)
                .map_err(|e| OneWireError::Io(e.to_string()))?;
        }
        None => {
            board
                .onewire_write(pin, &[CMD_SKIP_ROM])
                .map_err(|e| OneWireError::Io(e.to_string()))?;
        }
    }
    Ok(())
}

/// Kick off a temperature conversion. Returns immediately; the result is
/// readable after the conversion time elapses.
pub fn start_conversion(
    board: &mut dyn Board,
    pin: u8,
    rom: Option<&[u8; 8]>,
) -> Result<(), OneWireError> {
    reset_and_select(board, pin, rom)?;
    board
        .onewire_write(pin, &[CMD_CONVERT])
        .map_err(|e| OneWireError::Io(e.to_string()))
}

/// Read the scratchpad of a converted device and extract the signed
/// 16-bit raw temperature.
///
/// On any failure the caller's `last_raw` must stay untouched; this
/// function never returns partial data.
pub fn read_raw_temperature(
    board: &mut dyn Board,
    pin: u8,
    rom: Option<&[u8; 8]>,
) -> Result<i16, OneWireError> {
    reset_and_select(board, pin, rom)?;
    board
        .onewire_write(pin, &[CMD_READ_SCRATCHPAD])
        .map_err(|e| OneWireError::Io(e.to_string()))?;

    let mut scratchpad = [0u8; SCRATCHPAD_LEN];
    board
        .onewire_read(pin, &mut scratchpad)
        .map_err(|e| OneWireError::Io(e.to_string()))?;

    let expected = crc8(&scratchpad[..8]);
    let got = scratchpad[8];
    if expected != got {
        return Err(OneWireError::CrcMismatch { expected, got });
    }

    Ok(i16::from_le_bytes([scratchpad[0], scratchpad[1]]))
}
