//! I²C raw-read primitive.
//!
//! The SDA/SCL pins are registry-reserved to the system bus; callers are
//! serialized by the single-threaded loop, so no bus locking exists here.

use std::fmt;

use gaia_common::error::{ErrorCode, Severity};

use crate::board::{Board, BoardError};

/// Lowest valid 7-bit device address.
pub const ADDR_MIN: u8 = 0x08;
/// Highest valid 7-bit device address.
pub const ADDR_MAX: u8 = 0x77;

/// I²C read failure, classified for the ledger.
#[derive(Debug, Clone)]
pub enum I2cError {
    /// Address outside the 7-bit device range.
    InvalidAddress(u8),
    /// Device did not acknowledge its address.
    DeviceNotFound(u8),
    /// Bus-level fault.
    BusError(String),
    /// Transfer failed or returned a short read.
    ReadFailed { addr: u8, expected: usize, got: usize },
}

impl I2cError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidAddress(_) | Self::ReadFailed { .. } => ErrorCode::I2C_READ_FAILED,
            Self::DeviceNotFound(_) => ErrorCode::I2C_DEVICE_NOT_FOUND,
            Self::BusError(_) => ErrorCode::I2C_BUS_ERROR,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::BusError(_) => Severity::Critical,
            Self::DeviceNotFound(_) => Severity::Warning,
            Self::InvalidAddress(_) | Self::ReadFailed { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for I2cError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(addr) => write!(f, "invalid i2c address 0x{addr:02X}"),
            Self::DeviceNotFound(addr) => write!(f, "no i2c device at 0x{addr:02X}"),
            Self::BusError(msg) => write!(f, "i2c bus error: {msg}"),
            Self::ReadFailed {
                addr,
                expected,
                got,
            } => write!(
                f,
                "i2c read from 0x{addr:02X} returned {got}/{expected} bytes"
            ),
        }
    }
}

impl std::error::Error for I2cError {}

/// Read `buf.len()` bytes from `reg` of the device at `addr`.
///
/// Writes the register index, issues a repeated start, reads, and
/// verifies the byte count.
pub fn read_raw(
    board: &mut dyn Board,
    addr: u8,
    reg: u8,
    buf: &mut [u8],
) -> Result<(), I2cError> {
    if !(ADDR_MIN..=ADDR_MAX).contains(&addr) {
        return Err(I2cError::InvalidAddress(addr));
    }

    let expected = buf.len();
    match board.i2c_write_read(addr, reg, buf) {
        Ok(got) if got == expected => Ok(()),
        Ok(got) => Err(I2cError::ReadFailed {
            addr,
            expected,
            got,
        }),
        Err(BoardError::I2cNack(a)) => Err(I2cError::DeviceNotFound(a)),
        Err(BoardError::I2cBus(msg)) => Err(I2cError::BusError(msg)),
        Err(other) => {
            tracing::debug!("i2c transfer fault: {other}");
            Err(I2cError::ReadFailed {
                addr,
                expected,
                got: 0,
            })
        }
    }
}
