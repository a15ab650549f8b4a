//! Simulation board backend.
//!
//! Stands in for real hardware in tests and in `--sim` runs: pin state
//! lives in memory, sensor values are scripted, and every hardware call
//! is appended to a sequence-numbered probe so tests can assert ordering
//! (de-energize before high-Z, no writes during emergencies, ...).

use std::collections::HashMap;

use crate::board::{Board, BoardError, Level, PinMode};

/// Highest pin number the simulated package exposes.
const SIM_MAX_PIN: u8 = 39;

/// One recorded hardware operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOp {
    Mode(PinMode),
    Write(Level),
    Pwm(u8),
    DelayUs(u64),
}

/// Probe entry: global sequence number plus the touched pin.
#[derive(Debug, Clone)]
pub struct ProbeEvent {
    pub seq: u64,
    pub pin: Option<u8>,
    pub op: ProbeOp,
}

#[derive(Debug, Clone, Default)]
struct PinState {
    mode: Option<PinMode>,
    /// Output level as a bool (true = high).
    level: bool,
    duty: u8,
}

#[derive(Debug, Clone)]
struct OneWireDevice {
    rom: [u8; 8],
    scratchpad: [u8; 9],
    selected: bool,
}

/// In-memory board with scripted peripherals.
pub struct SimBoard {
    pins: HashMap<u8, PinState>,
    probe: Vec<ProbeEvent>,
    seq: u64,
    analog: HashMap<u8, u16>,
    i2c_devices: HashMap<u8, Vec<u8>>,
    i2c_bus_fault: Option<String>,
    onewire: HashMap<u8, OneWireDevice>,
    onewire_read_queue: HashMap<u8, Vec<u8>>,
    mac: [u8; 6],
    heap_free: u32,
    rssi: i32,
    radio_active: bool,
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            pins: HashMap::new(),
            probe: Vec::new(),
            seq: 0,
            analog: HashMap::new(),
            i2c_devices: HashMap::new(),
            i2c_bus_fault: None,
            onewire: HashMap::new(),
            onewire_read_queue: HashMap::new(),
            // Last three bytes spell the node id used in server examples.
            mac: [0xA4, 0xCF, 0x12, 0xAB, 0x12, 0xCD],
            heap_free: 186_000,
            rssi: -61,
            radio_active: false,
        }
    }

    // ─── Scripting ──────────────────────────────────────────────────

    pub fn set_analog(&mut self, pin: u8, value: u16) {
        self.analog.insert(pin, value);
    }

    /// Install an I²C device with a flat register file.
    pub fn set_i2c_device(&mut self, addr: u8, registers: Vec<u8>) {
        self.i2c_devices.insert(addr, registers);
    }

    /// Make every subsequent I²C transfer fail at the bus level.
    pub fn fail_i2c_bus(&mut self, reason: &str) {
        self.i2c_bus_fault = Some(reason.to_string());
    }

    pub fn clear_i2c_fault(&mut self) {
        self.i2c_bus_fault = None;
    }

    /// Install a single-wire device on a pin.
    pub fn set_onewire_device(&mut self, pin: u8, rom: [u8; 8], scratchpad: [u8; 9]) {
        self.onewire.insert(
            pin,
            OneWireDevice {
                rom,
                scratchpad,
                selected: false,
            },
        );
    }

    /// Replace the scratchpad of an installed device.
    pub fn set_onewire_scratchpad(&mut self, pin: u8, scratchpad: [u8; 9]) {
        if let Some(dev) = self.onewire.get_mut(&pin) {
            dev.scratchpad = scratchpad;
        }
    }

    pub fn set_radio_active(&mut self, active: bool) {
        self.radio_active = active;
    }

    pub fn set_heap_free(&mut self, bytes: u32) {
        self.heap_free = bytes;
    }

    pub fn set_mac(&mut self, mac: [u8; 6]) {
        self.mac = mac;
    }

    // ─── Probe access ───────────────────────────────────────────────

    pub fn probe(&self) -> &[ProbeEvent] {
        &self.probe
    }

    /// All recorded operations touching one pin, in order.
    pub fn ops_for(&self, pin: u8) -> Vec<ProbeOp> {
        self.probe
            .iter()
            .filter(|e| e.pin == Some(pin))
            .map(|e| e.op.clone())
            .collect()
    }

    /// Current output level of a pin (false = low).
    pub fn level_of(&self, pin: u8) -> bool {
        self.pins.get(&pin).map(|p| p.level).unwrap_or(false)
    }

    /// Current PWM duty of a pin.
    pub fn duty_of(&self, pin: u8) -> u8 {
        self.pins.get(&pin).map(|p| p.duty).unwrap_or(0)
    }

    pub fn clear_probe(&mut self) {
        self.probe.clear();
    }

    fn record(&mut self, pin: Option<u8>, op: ProbeOp) {
        self.seq += 1;
        self.probe.push(ProbeEvent {
            seq: self.seq,
            pin,
            op,
        });
    }

    fn check_pin(pin: u8) -> Result<(), BoardError> {
        if pin > SIM_MAX_PIN {
            return Err(BoardError::NoSuchPin(pin));
        }
        Ok(())
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for SimBoard {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), BoardError> {
        Self::check_pin(pin)?;
        self.record(Some(pin), ProbeOp::Mode(mode));
        self.pins.entry(pin).or_default().mode = Some(mode);
        Ok(())
    }

    fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.pins.get(&pin).and_then(|p| p.mode)
    }

    fn digital_write(&mut self, pin: u8, level: Level) -> Result<(), BoardError> {
        Self::check_pin(pin)?;
        self.record(Some(pin), ProbeOp::Write(level));
        self.pins.entry(pin).or_default().level = level == Level::High;
        Ok(())
    }

    fn digital_read(&self, pin: u8) -> Result<Level, BoardError> {
        Self::check_pin(pin)?;
        Ok(if self.level_of(pin) {
            Level::High
        } else {
            Level::Low
        })
    }

    fn analog_read(&mut self, pin: u8) -> Result<u16, BoardError> {
        Self::check_pin(pin)?;
        Ok(self.analog.get(&pin).copied().unwrap_or(0))
    }

    fn pwm_write(&mut self, pin: u8, duty: u8) -> Result<(), BoardError> {
        Self::check_pin(pin)?;
        self.record(Some(pin), ProbeOp::Pwm(duty));
        self.pins.entry(pin).or_default().duty = duty;
        Ok(())
    }

    fn i2c_write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<usize, BoardError> {
        if let Some(reason) = &self.i2c_bus_fault {
            return Err(BoardError::I2cBus(reason.clone()));
        }
        let Some(registers) = self.i2c_devices.get(&addr) else {
            return Err(BoardError::I2cNack(addr));
        };
        let start = reg as usize;
        if start >= registers.len() {
            return Ok(0);
        }
        let available = registers.len() - start;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&registers[start..start + n]);
        Ok(n)
    }

    fn onewire_reset(&mut self, pin: u8) -> Result<bool, BoardError> {
        Self::check_pin(pin)?;
        self.onewire_read_queue.remove(&pin);
        if let Some(dev) = self.onewire.get_mut(&pin) {
            dev.selected = false;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn onewire_write(&mut self, pin: u8, bytes: &[u8]) -> Result<(), BoardError> {
        Self::check_pin(pin)?;
        let Some(dev) = self.onewire.get_mut(&pin) else {
            return Ok(());
        };
        let mut idx = 0;
        while idx < bytes.len() {
            match bytes[idx] {
                0xCC => {
                    dev.selected = true;
                    idx += 1;
                }
                0x55 => {
                    let rom_end = idx + 9;
                    if rom_end <= bytes.len() {
                        dev.selected = bytes[idx + 1..rom_end] == dev.rom;
                        idx = rom_end;
                    } else {
                        dev.selected = false;
                        idx = bytes.len();
                    }
                }
                0x44 => {
                    // Conversion starts; the sim result is always ready.
                    idx += 1;
                }
                0xBE => {
                    let data = if dev.selected {
                        dev.scratchpad.to_vec()
                    } else {
                        // Unselected devices leave the bus idle-high.
                        vec![0xFF; 9]
                    };
                    self.onewire_read_queue.insert(pin, data);
                    idx += 1;
                }
                _ => idx += 1,
            }
        }
        Ok(())
    }

    fn onewire_read(&mut self, pin: u8, buf: &mut [u8]) -> Result<(), BoardError> {
        Self::check_pin(pin)?;
        let queue = self.onewire_read_queue.remove(&pin).unwrap_or_default();
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = queue.get(i).copied().unwrap_or(0xFF);
        }
        Ok(())
    }

    fn delay_us(&mut self, us: u64) {
        self.record(None, ProbeOp::DelayUs(us));
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn heap_free(&self) -> u32 {
        self.heap_free
    }

    fn link_rssi(&self) -> i32 {
        self.rssi
    }

    fn radio_active(&self) -> bool {
        self.radio_active
    }
}

/// Clonable handle around [`SimBoard`] so a test can keep scripting
/// devices and inspecting the probe after handing the board to the node.
/// Not thread-safe; the node loop is single-threaded.
#[derive(Clone, Default)]
pub struct SharedSimBoard(std::rc::Rc<std::cell::RefCell<SimBoard>>);

impl SharedSimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, SimBoard> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, SimBoard> {
        self.0.borrow_mut()
    }
}

impl Board for SharedSimBoard {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), BoardError> {
        self.0.borrow_mut().set_pin_mode(pin, mode)
    }

    fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.0.borrow().pin_mode(pin)
    }

    fn digital_write(&mut self, pin: u8, level: Level) -> Result<(), BoardError> {
        self.0.borrow_mut().digital_write(pin, level)
    }

    fn digital_read(&self, pin: u8) -> Result<Level, BoardError> {
        self.0.borrow().digital_read(pin)
    }

    fn analog_read(&mut self, pin: u8) -> Result<u16, BoardError> {
        self.0.borrow_mut().analog_read(pin)
    }

    fn pwm_write(&mut self, pin: u8, duty: u8) -> Result<(), BoardError> {
        self.0.borrow_mut().pwm_write(pin, duty)
    }

    fn i2c_write_read(
        &mut self,
        addr: u8,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<usize, BoardError> {
        self.0.borrow_mut().i2c_write_read(addr, reg, buf)
    }

    fn onewire_reset(&mut self, pin: u8) -> Result<bool, BoardError> {
        self.0.borrow_mut().onewire_reset(pin)
    }

    fn onewire_write(&mut self, pin: u8, bytes: &[u8]) -> Result<(), BoardError> {
        self.0.borrow_mut().onewire_write(pin, bytes)
    }

    fn onewire_read(&mut self, pin: u8, buf: &mut [u8]) -> Result<(), BoardError> {
        self.0.borrow_mut().onewire_read(pin, buf)
    }

    fn delay_us(&mut self, us: u64) {
        self.0.borrow_mut().delay_us(us);
    }

    fn mac_address(&self) -> [u8; 6] {
        self.0.borrow().mac_address()
    }

    fn heap_free(&self) -> u32 {
        self.0.borrow().heap_free()
    }

    fn link_rssi(&self) -> i32 {
        self.0.borrow().link_rssi()
    }

    fn radio_active(&self) -> bool {
        self.0.borrow().radio_active()
    }
}
