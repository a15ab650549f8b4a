//! Sensor registry — configuration, pin claims, persistence.
//!
//! The wire discriminant is a free string; internally it collapses into
//! a closed [`SensorKind`] so the poll loop stays branch-predictable.
//! Unknown strings fall back to the analog path rather than failing the
//! whole configuration batch.

pub mod poller;
pub mod processing;

use gaia_common::consts::{MAX_GPIO, MAX_SENSORS, PIN_UNSET};
use gaia_common::error::{ConfigFault, ErrorCode, Severity};
use gaia_common::payload::SensorConfigMsg;
use gaia_hal::board::{Board, PinMode};
use gaia_hal::bus::i2c::{ADDR_MAX, ADDR_MIN};
use gaia_hal::registry::{PinError, PinOwner, PinRegistry};
use tracing::{info, warn};

use crate::ledger::ErrorLedger;
use crate::storage::{NS_SENSOR, Storage, StorageError};

/// Closed measurement-path discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// 12-bit ADC sample.
    Analog,
    /// DS18B20-class single-wire temperature probe.
    OneWireTemp,
    /// Register-read over the shared I²C bus.
    I2c { addr: u8 },
}

/// Default device addresses for known I²C sensor families.
fn default_i2c_addr(raw: &str) -> u8 {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("sht31") {
        0x44
    } else if lower.contains("bh1750") {
        0x23
    } else {
        0x40
    }
}

impl SensorKind {
    /// Map the wire discriminant. Unknown kinds fall back to analog.
    pub fn parse(raw: &str, i2c_address: Option<u8>) -> Self {
        let lower = raw.to_ascii_lowercase();
        if lower.contains("ds18b20") || lower.contains("onewire") || lower.contains("dallas") {
            Self::OneWireTemp
        } else if lower.starts_with("i2c") || lower.contains("sht31") || lower.contains("bh1750")
        {
            Self::I2c {
                addr: i2c_address.unwrap_or_else(|| default_i2c_addr(raw)),
            }
        } else {
            Self::Analog
        }
    }
}

/// One configured sensor.
#[derive(Debug, Clone)]
pub struct SensorRecord {
    pub pin: u8,
    pub kind: SensorKind,
    /// Wire discriminant as configured, echoed in telemetry.
    pub kind_raw: String,
    pub name: String,
    pub subzone_id: Option<String>,
    pub active: bool,
    /// Single-wire ROM code; absent → Skip ROM addressing.
    pub rom: Option<[u8; 8]>,
    pub last_raw: Option<f64>,
    pub last_read_ms: Option<u64>,
}

/// Parse a 16-hex-char ROM code.
fn parse_rom(raw: &str) -> Result<[u8; 8], ConfigFault> {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();
    if cleaned.len() != 16 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigFault::new(
            ErrorCode::VALIDATION_FAILED,
            format!("rom_code '{raw}' is not 8 hex bytes"),
        ));
    }
    let mut rom = [0u8; 8];
    for (i, slot) in rom.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&cleaned[i * 2..i * 2 + 2], 16)
            .map_err(|_| ConfigFault::new(ErrorCode::VALIDATION_FAILED, "bad rom_code"))?;
    }
    Ok(rom)
}

/// Registry of configured sensors, ordered by configuration time.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    items: Vec<SensorRecord>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, pin: u8) -> Option<&SensorRecord> {
        self.items.iter().find(|s| s.pin == pin)
    }

    pub fn records(&self) -> &[SensorRecord] {
        &self.items
    }

    pub(crate) fn records_mut(&mut self) -> &mut [SensorRecord] {
        &mut self.items
    }

    fn find(&self, pin: u8) -> Option<usize> {
        self.items.iter().position(|s| s.pin == pin)
    }

    // ─── Configuration ──────────────────────────────────────────────

    /// Apply one configuration entry and persist the table.
    pub fn configure(
        &mut self,
        msg: &SensorConfigMsg,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
        storage: &mut Storage,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) -> Result<(), ConfigFault> {
        self.apply_config(msg, pins, board)?;
        if let Err(e) = self.persist(storage) {
            ledger.track(
                now_ms,
                ErrorCode::NVS_WRITE_FAILED,
                Severity::Error,
                &format!("sensor table persist failed: {e}"),
            );
            return Err(ConfigFault::new(
                ErrorCode::NVS_WRITE_FAILED,
                "configured, but persisting failed",
            ));
        }
        Ok(())
    }

    fn apply_config(
        &mut self,
        msg: &SensorConfigMsg,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
    ) -> Result<(), ConfigFault> {
        if msg.sensor_type.trim().is_empty() {
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                "sensor_type must not be empty",
            ));
        }
        if msg.gpio > MAX_GPIO || msg.gpio == PIN_UNSET {
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                format!("gpio {} out of range", msg.gpio),
            ));
        }

        if !msg.active {
            if self.find(msg.gpio).is_some() {
                self.remove_in_memory(msg.gpio, pins, board);
            }
            return Ok(());
        }

        if let Some(addr) = msg.i2c_address {
            if !(ADDR_MIN..=ADDR_MAX).contains(&addr) {
                return Err(ConfigFault::new(
                    ErrorCode::VALIDATION_FAILED,
                    format!("i2c address 0x{addr:02X} out of range"),
                ));
            }
        }
        let rom = msg.rom_code.as_deref().map(parse_rom).transpose()?;

        let existing = self.find(msg.gpio);
        if existing.is_none() && self.items.len() >= MAX_SENSORS {
            return Err(ConfigFault::new(
                ErrorCode::SENSOR_CAPACITY,
                format!("sensor table full ({MAX_SENSORS})"),
            ));
        }
        if existing.is_some() {
            // Idempotent reconfig: free the claim, re-request under the
            // (possibly new) name.
            let _ = pins.release(msg.gpio, board);
        }

        let name = if msg.sensor_name.is_empty() {
            format!("sensor_{}", msg.gpio)
        } else {
            msg.sensor_name.clone()
        };
        pins.request(msg.gpio, PinOwner::Sensor, &name)
            .map_err(pin_fault)?;

        let kind = SensorKind::parse(&msg.sensor_type, msg.i2c_address);
        let mode = match kind {
            SensorKind::Analog => PinMode::AnalogIn,
            SensorKind::OneWireTemp => PinMode::OneWire,
            // I²C devices live on the shared bus; the record pin is the
            // logical identity only.
            SensorKind::I2c { .. } => PinMode::Input,
        };
        pins.configure_mode(msg.gpio, mode, board).map_err(pin_fault)?;

        let record = SensorRecord {
            pin: msg.gpio,
            kind,
            kind_raw: msg.sensor_type.clone(),
            name,
            subzone_id: msg.subzone_id.clone(),
            active: true,
            rom,
            last_raw: None,
            last_read_ms: None,
        };
        match existing {
            Some(idx) => self.items[idx] = record,
            None => self.items.push(record),
        }
        info!(pin = msg.gpio, kind = %msg.sensor_type, "sensor configured");
        Ok(())
    }

    /// Remove a sensor and release its pin.
    pub fn remove(
        &mut self,
        pin: u8,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
        storage: &mut Storage,
    ) -> Result<(), ConfigFault> {
        if self.find(pin).is_none() {
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                format!("no sensor on gpio {pin}"),
            ));
        }
        self.remove_in_memory(pin, pins, board);
        self.persist(storage)
            .map_err(|e| ConfigFault::new(e.code(), e.to_string()))
    }

    fn remove_in_memory(&mut self, pin: u8, pins: &mut PinRegistry, board: &mut dyn Board) {
        if let Some(idx) = self.find(pin) {
            let _ = pins.release(pin, board);
            self.items.remove(idx);
            info!(pin, "sensor removed");
        }
    }

    // ─── Persistence ────────────────────────────────────────────────

    pub fn persist(&self, storage: &mut Storage) -> Result<(), StorageError> {
        let mut session = storage.begin(NS_SENSOR, false)?;
        session.clear()?;
        session.put_u8("sen_count", self.items.len() as u8)?;
        for (i, record) in self.items.iter().enumerate() {
            session.put_u8(&format!("sen_{i}_pin"), record.pin)?;
            session.put_string(&format!("sen_{i}_kind"), &record.kind_raw)?;
            session.put_string(&format!("sen_{i}_name"), &record.name)?;
            session.put_string(
                &format!("sen_{i}_subzone"),
                record.subzone_id.as_deref().unwrap_or(""),
            )?;
            if let Some(rom) = record.rom {
                let hex: String = rom.iter().map(|b| format!("{b:02X}")).collect();
                session.put_string(&format!("sen_{i}_rom"), &hex)?;
            }
            if let SensorKind::I2c { addr } = record.kind {
                session.put_u8(&format!("sen_{i}_addr"), addr)?;
            }
        }
        session.commit()
    }

    pub fn load_persisted(
        &mut self,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
        storage: &mut Storage,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) {
        let messages = {
            let Ok(session) = storage.begin(NS_SENSOR, true) else {
                ledger.track(
                    now_ms,
                    ErrorCode::NAMESPACE_OPEN_FAILED,
                    Severity::Warning,
                    "sensor namespace unavailable at boot",
                );
                return;
            };
            let count = session.get_u8("sen_count", 0) as usize;
            (0..count.min(MAX_SENSORS))
                .map(|i| {
                    let subzone = session.get_string(&format!("sen_{i}_subzone"), "");
                    let rom = session.get_string(&format!("sen_{i}_rom"), "");
                    let addr = session.get_u8(&format!("sen_{i}_addr"), 0);
                    SensorConfigMsg {
                        gpio: session.get_u8(&format!("sen_{i}_pin"), PIN_UNSET),
                        sensor_type: session.get_string(&format!("sen_{i}_kind"), ""),
                        sensor_name: session.get_string(&format!("sen_{i}_name"), ""),
                        subzone_id: (!subzone.is_empty()).then_some(subzone),
                        active: true,
                        raw_mode: true,
                        rom_code: (!rom.is_empty()).then_some(rom),
                        i2c_address: (addr != 0).then_some(addr),
                    }
                })
                .collect::<Vec<_>>()
        };

        for msg in messages {
            if let Err(e) = self.apply_config(&msg, pins, board) {
                ledger.track(
                    now_ms,
                    e.code,
                    Severity::Warning,
                    &format!("persisted sensor gpio {} rejected: {}", msg.gpio, e.message),
                );
            }
        }
        if !self.items.is_empty() {
            info!(count = self.items.len(), "sensors restored from storage");
        }
    }
}

fn pin_fault(e: PinError) -> ConfigFault {
    let code = match e {
        PinError::InUse { .. } => ErrorCode::GPIO_CONFLICT,
        _ => ErrorCode::VALIDATION_FAILED,
    };
    warn!("sensor pin claim failed: {e}");
    ConfigFault::new(code, e.to_string())
}
