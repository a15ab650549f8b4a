//! Pin Registry — ownership arbitration and safe-mode lifecycle.
//!
//! Every addressable pin has exactly one owner at any moment and reverts
//! to high impedance with pull-up when released. The registry holds the
//! metadata; the hardware is passed in per call (the board port), so the
//! registry can sequence de-energize strictly before mode changes.

use std::collections::HashMap;
use std::fmt;

use gaia_common::error::ErrorCode;
use tracing::{debug, warn};

use crate::board::{Board, BoardError, Level, PinMode};
use crate::profile::BoardProfile;

/// Settle interval between driving an output inactive and re-muxing it.
const RELEASE_SETTLE_US: u64 = 10;

// ─── Error Types ────────────────────────────────────────────────────

/// Pin arbitration failure.
#[derive(Debug, Clone)]
pub enum PinError {
    /// Pin is not in the board's safe list.
    NotSafe(u8),
    /// Pin already owned under a different name.
    InUse { pin: u8, owner: String },
    /// Pin was never registered at boot.
    NotRegistered(u8),
    /// Pin already grouped into another subzone.
    SubzoneConflict { pin: u8, current: String },
    /// Subzone id is not defined.
    SubzoneUnknown(String),
    /// Hardware refused an operation during the state change.
    Hardware(BoardError),
}

impl PinError {
    /// Wire error code for the ledger.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotSafe(_) => ErrorCode::PIN_NOT_SAFE,
            Self::InUse { .. } => ErrorCode::PIN_IN_USE,
            Self::NotRegistered(_) => ErrorCode::PIN_NOT_REGISTERED,
            Self::SubzoneConflict { .. } | Self::SubzoneUnknown(_) => ErrorCode::SUBZONE_INVALID,
            Self::Hardware(_) => ErrorCode::PIN_STATE_MISMATCH,
        }
    }
}

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSafe(pin) => write!(f, "pin {pin} is not in the safe list"),
            Self::InUse { pin, owner } => write!(f, "pin {pin} already owned by '{owner}'"),
            Self::NotRegistered(pin) => write!(f, "pin {pin} is not registered"),
            Self::SubzoneConflict { pin, current } => {
                write!(f, "pin {pin} already grouped in subzone '{current}'")
            }
            Self::SubzoneUnknown(id) => write!(f, "subzone '{id}' is not defined"),
            Self::Hardware(e) => write!(f, "hardware fault: {e}"),
        }
    }
}

impl std::error::Error for PinError {}

impl From<BoardError> for PinError {
    fn from(e: BoardError) -> Self {
        Self::Hardware(e)
    }
}

// ─── Records ────────────────────────────────────────────────────────

/// Who holds a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOwner {
    Unowned,
    /// Reserved bus lines (I²C SDA/SCL).
    SystemBus,
    Sensor,
    Actuator,
    Subzone,
}

/// Per-pin bookkeeping.
#[derive(Debug, Clone)]
pub struct PinRecord {
    pub pin: u8,
    pub owner: PinOwner,
    pub owner_name: String,
    pub mode: PinMode,
    /// True iff the pin is unowned and parked at high-Z with pull-up.
    pub in_safe_mode: bool,
    pub subzone_id: Option<String>,
}

/// Intra-node pin group with its own forced-safe overlay.
#[derive(Debug, Clone)]
pub struct Subzone {
    pub id: String,
    pub name: String,
    pub parent_zone_id: String,
    /// Assignment order is preserved for safe-mode sweeps.
    pub pins: Vec<u8>,
    pub safe_mode_active: bool,
}

/// Boot initialization outcome.
#[derive(Debug, Clone, Default)]
pub struct SafeInitReport {
    /// Pins parked in safe mode.
    pub initialized: usize,
    /// Pins whose readback did not match (logged, not fatal).
    pub mismatches: Vec<u8>,
}

// ─── PinRegistry ────────────────────────────────────────────────────

/// Sole authority over pin ownership.
///
/// Sensor and actuator registries must obtain pins through [`request`]
/// and give them back through [`release`]; they never mux pins directly.
///
/// [`request`]: PinRegistry::request
/// [`release`]: PinRegistry::release
#[derive(Debug)]
pub struct PinRegistry {
    profile: BoardProfile,
    records: HashMap<u8, PinRecord>,
    subzones: HashMap<String, Subzone>,
}

impl PinRegistry {
    pub fn new(profile: BoardProfile) -> Self {
        Self {
            profile,
            records: HashMap::new(),
            subzones: HashMap::new(),
        }
    }

    pub fn profile(&self) -> &BoardProfile {
        &self.profile
    }

    /// Park every safe-list pin at high-Z with pull-up and reserve the
    /// I²C lines. Must run before any other hardware access at boot.
    ///
    /// Readback mismatches are reported, never fatal: a board that cannot
    /// verify still has to come up.
    pub fn init_all_safe(&mut self, board: &mut dyn Board) -> SafeInitReport {
        let mut report = SafeInitReport::default();

        for &pin in self.profile.safe_pins {
            if let Err(e) = board.set_pin_mode(pin, PinMode::HighZPullUp) {
                warn!("boot: pin {pin} refused safe mode: {e}");
                report.mismatches.push(pin);
            }
            self.records.insert(
                pin,
                PinRecord {
                    pin,
                    owner: PinOwner::Unowned,
                    owner_name: String::new(),
                    mode: PinMode::HighZPullUp,
                    in_safe_mode: true,
                    subzone_id: None,
                },
            );
            report.initialized += 1;

            match board.pin_mode(pin) {
                Some(PinMode::HighZPullUp) | None => {}
                Some(other) => {
                    warn!("boot: pin {pin} readback {other:?}, expected high-Z pull-up");
                    if !report.mismatches.contains(&pin) {
                        report.mismatches.push(pin);
                    }
                }
            }
        }

        for pin in [self.profile.i2c_sda, self.profile.i2c_scl] {
            let _ = board.set_pin_mode(pin, PinMode::I2c);
            self.records.insert(
                pin,
                PinRecord {
                    pin,
                    owner: PinOwner::SystemBus,
                    owner_name: "i2c".to_string(),
                    mode: PinMode::I2c,
                    in_safe_mode: false,
                    subzone_id: None,
                },
            );
        }

        debug!(
            initialized = report.initialized,
            mismatches = report.mismatches.len(),
            "pin registry initialized"
        );
        report
    }

    // ─── Ownership ──────────────────────────────────────────────────

    /// Claim a pin for an owner. Re-requesting with the same owner and
    /// name is idempotent (reconfiguration path).
    pub fn request(&mut self, pin: u8, owner: PinOwner, name: &str) -> Result<(), PinError> {
        if !self.profile.is_safe(pin) {
            return Err(PinError::NotSafe(pin));
        }
        let record = self
            .records
            .get_mut(&pin)
            .ok_or(PinError::NotRegistered(pin))?;

        match record.owner {
            PinOwner::Unowned => {}
            o if o == owner && record.owner_name == name => return Ok(()),
            _ => {
                return Err(PinError::InUse {
                    pin,
                    owner: record.owner_name.clone(),
                });
            }
        }

        record.owner = owner;
        record.owner_name = name.to_string();
        record.in_safe_mode = false;
        Ok(())
    }

    /// Release a pin back to the safe state.
    ///
    /// Output pins are driven inactive and given a settle interval
    /// strictly before the mode change.
    pub fn release(&mut self, pin: u8, board: &mut dyn Board) -> Result<(), PinError> {
        let record = self
            .records
            .get_mut(&pin)
            .ok_or(PinError::NotRegistered(pin))?;

        if matches!(record.mode, PinMode::Output | PinMode::Pwm) {
            Self::de_energize(pin, record.mode, board)?;
        }
        board.set_pin_mode(pin, PinMode::HighZPullUp)?;

        record.owner = PinOwner::Unowned;
        record.owner_name.clear();
        record.mode = PinMode::HighZPullUp;
        record.in_safe_mode = true;
        Ok(())
    }

    /// Record and apply a mode change on an owned pin.
    pub fn configure_mode(
        &mut self,
        pin: u8,
        mode: PinMode,
        board: &mut dyn Board,
    ) -> Result<(), PinError> {
        let record = self
            .records
            .get_mut(&pin)
            .ok_or(PinError::NotRegistered(pin))?;
        if record.owner == PinOwner::Unowned {
            return Err(PinError::NotRegistered(pin));
        }
        board.set_pin_mode(pin, mode)?;
        record.mode = mode;
        Ok(())
    }

    pub fn is_available(&self, pin: u8) -> bool {
        self.profile.is_safe(pin)
            && self
                .records
                .get(&pin)
                .is_some_and(|r| r.owner == PinOwner::Unowned)
    }

    pub fn owner_of(&self, pin: u8) -> Option<(PinOwner, &str)> {
        self.records
            .get(&pin)
            .map(|r| (r.owner, r.owner_name.as_str()))
    }

    pub fn mode_of(&self, pin: u8) -> Option<PinMode> {
        self.records.get(&pin).map(|r| r.mode)
    }

    pub fn record(&self, pin: u8) -> Option<&PinRecord> {
        self.records.get(&pin)
    }

    /// True when no two owners collide and every owned pin is out of
    /// safe mode (consulted by safety verification).
    pub fn consistent(&self) -> bool {
        self.records
            .values()
            .all(|r| r.owner == PinOwner::Unowned || !r.in_safe_mode)
    }

    // ─── Subzone grouping ───────────────────────────────────────────

    /// Create or update a subzone definition.
    pub fn define_subzone(&mut self, id: &str, name: &str, parent_zone_id: &str) {
        let entry = self.subzones.entry(id.to_string()).or_insert(Subzone {
            id: id.to_string(),
            name: String::new(),
            parent_zone_id: String::new(),
            pins: Vec::new(),
            safe_mode_active: false,
        });
        entry.name = name.to_string();
        entry.parent_zone_id = parent_zone_id.to_string();
    }

    pub fn subzone(&self, id: &str) -> Option<&Subzone> {
        self.subzones.get(id)
    }

    pub fn subzones(&self) -> impl Iterator<Item = &Subzone> {
        self.subzones.values()
    }

    pub fn subzone_count(&self) -> usize {
        self.subzones.len()
    }

    /// Group a pin into a subzone.
    ///
    /// Re-assigning to the same subzone is idempotent; a pin belongs to
    /// at most one subzone. When the subzone's safe-mode overlay is
    /// active, a newly assigned pin is driven safe immediately.
    pub fn assign_to_subzone(
        &mut self,
        pin: u8,
        subzone_id: &str,
        board: &mut dyn Board,
    ) -> Result<(), PinError> {
        if !self.profile.is_safe(pin) {
            return Err(PinError::NotSafe(pin));
        }
        let subzone = self
            .subzones
            .get_mut(subzone_id)
            .ok_or_else(|| PinError::SubzoneUnknown(subzone_id.to_string()))?;
        let record = self
            .records
            .get_mut(&pin)
            .ok_or(PinError::NotRegistered(pin))?;

        match &record.subzone_id {
            Some(current) if current == subzone_id => return Ok(()),
            Some(current) => {
                return Err(PinError::SubzoneConflict {
                    pin,
                    current: current.clone(),
                });
            }
            None => {}
        }

        record.subzone_id = Some(subzone_id.to_string());
        subzone.pins.push(pin);

        if subzone.safe_mode_active {
            Self::park_pin(pin, record.mode, board)?;
        }
        Ok(())
    }

    pub fn remove_from_subzone(&mut self, pin: u8) -> Result<(), PinError> {
        let record = self
            .records
            .get_mut(&pin)
            .ok_or(PinError::NotRegistered(pin))?;
        let Some(id) = record.subzone_id.take() else {
            return Ok(());
        };
        if let Some(subzone) = self.subzones.get_mut(&id) {
            subzone.pins.retain(|p| *p != pin);
        }
        Ok(())
    }

    /// Drop a subzone definition, ungrouping its pins. Hardware state is
    /// untouched; owners keep their pins.
    pub fn remove_subzone(&mut self, id: &str) -> Result<(), PinError> {
        let subzone = self
            .subzones
            .remove(id)
            .ok_or_else(|| PinError::SubzoneUnknown(id.to_string()))?;
        for pin in subzone.pins {
            if let Some(record) = self.records.get_mut(&pin) {
                record.subzone_id = None;
            }
        }
        Ok(())
    }

    pub fn subzone_pins(&self, id: &str) -> Vec<u8> {
        self.subzones
            .get(id)
            .map(|s| s.pins.clone())
            .unwrap_or_default()
    }

    /// Force every pin of a subzone into the electrical safe state.
    ///
    /// Ownership records are kept; the overlay only parks the hardware.
    /// Outputs de-energize strictly before their mode change.
    pub fn enable_safe_mode_for_subzone(
        &mut self,
        id: &str,
        board: &mut dyn Board,
    ) -> Result<(), PinError> {
        let subzone = self
            .subzones
            .get_mut(id)
            .ok_or_else(|| PinError::SubzoneUnknown(id.to_string()))?;
        subzone.safe_mode_active = true;
        let pins = subzone.pins.clone();
        for pin in pins {
            if let Some(mode) = self.records.get(&pin).map(|r| r.mode) {
                Self::park_pin(pin, mode, board)?;
            }
        }
        Ok(())
    }

    /// Lift the subzone overlay and restore each pin's configured mode.
    pub fn disable_safe_mode_for_subzone(
        &mut self,
        id: &str,
        board: &mut dyn Board,
    ) -> Result<(), PinError> {
        let subzone = self
            .subzones
            .get_mut(id)
            .ok_or_else(|| PinError::SubzoneUnknown(id.to_string()))?;
        subzone.safe_mode_active = false;
        let pins = subzone.pins.clone();
        for pin in pins {
            if let Some(record) = self.records.get(&pin) {
                if record.owner != PinOwner::Unowned {
                    board.set_pin_mode(pin, record.mode)?;
                }
            }
        }
        Ok(())
    }

    /// Emergency path: park every registered pin, outputs first.
    ///
    /// The I²C reservation is left alone — the bus is system-owned and
    /// carries no actuation.
    pub fn enable_safe_mode_all(&mut self, board: &mut dyn Board) {
        let mut pins: Vec<u8> = self
            .records
            .values()
            .filter(|r| r.owner != PinOwner::SystemBus)
            .map(|r| r.pin)
            .collect();
        pins.sort_unstable();

        for &pin in &pins {
            let mode = self.records.get(&pin).map(|r| r.mode);
            if let Some(mode) = mode {
                if let Err(e) = Self::park_pin(pin, mode, board) {
                    warn!("safe-mode-all: pin {pin}: {e}");
                }
            }
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Drive an output inactive and let it settle.
    fn de_energize(pin: u8, mode: PinMode, board: &mut dyn Board) -> Result<(), PinError> {
        match mode {
            PinMode::Pwm => board.pwm_write(pin, 0)?,
            _ => board.digital_write(pin, Level::Low)?,
        }
        board.delay_us(RELEASE_SETTLE_US);
        Ok(())
    }

    /// De-energize (if output) then high-Z. Record state untouched.
    fn park_pin(pin: u8, mode: PinMode, board: &mut dyn Board) -> Result<(), PinError> {
        if matches!(mode, PinMode::Output | PinMode::Pwm) {
            Self::de_energize(pin, mode, board)?;
        }
        board.set_pin_mode(pin, PinMode::HighZPullUp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ESP32;
    use crate::sim::{ProbeOp, SimBoard};

    fn booted() -> (PinRegistry, SimBoard) {
        let mut board = SimBoard::new();
        let mut registry = PinRegistry::new(ESP32.clone());
        let report = registry.init_all_safe(&mut board);
        assert!(report.mismatches.is_empty());
        (registry, board)
    }

    #[test]
    fn boot_parks_every_safe_pin() {
        let (registry, board) = booted();
        for &pin in ESP32.safe_pins {
            assert_eq!(board.pin_mode(pin), Some(PinMode::HighZPullUp));
            let record = registry.record(pin).unwrap();
            assert!(record.in_safe_mode);
            assert_eq!(record.owner, PinOwner::Unowned);
        }
    }

    #[test]
    fn boot_reserves_i2c_lines() {
        let (registry, _) = booted();
        let (owner, name) = registry.owner_of(ESP32.i2c_sda).unwrap();
        assert_eq!(owner, PinOwner::SystemBus);
        assert_eq!(name, "i2c");
        assert!(!registry.record(ESP32.i2c_scl).unwrap().in_safe_mode);
    }

    #[test]
    fn request_takes_ownership() {
        let (mut registry, _) = booted();
        registry.request(4, PinOwner::Sensor, "T1").unwrap();
        assert!(!registry.is_available(4));
        let record = registry.record(4).unwrap();
        assert!(!record.in_safe_mode);
        assert_eq!(record.owner, PinOwner::Sensor);
    }

    #[test]
    fn request_is_idempotent_for_same_owner() {
        let (mut registry, _) = booted();
        registry.request(4, PinOwner::Sensor, "T1").unwrap();
        registry.request(4, PinOwner::Sensor, "T1").unwrap();
    }

    #[test]
    fn request_conflict_refused() {
        let (mut registry, _) = booted();
        registry.request(4, PinOwner::Sensor, "T1").unwrap();
        let err = registry.request(4, PinOwner::Actuator, "P1").unwrap_err();
        assert!(matches!(err, PinError::InUse { pin: 4, .. }));
        assert_eq!(err.code(), ErrorCode::PIN_IN_USE);
    }

    #[test]
    fn request_outside_safe_list_refused() {
        let (mut registry, _) = booted();
        let err = registry.request(7, PinOwner::Sensor, "X").unwrap_err();
        assert!(matches!(err, PinError::NotSafe(7)));
    }

    #[test]
    fn bus_pins_cannot_be_requested() {
        let (mut registry, _) = booted();
        let err = registry
            .request(ESP32.i2c_sda, PinOwner::Sensor, "X")
            .unwrap_err();
        assert!(matches!(err, PinError::NotSafe(_)));
    }

    #[test]
    fn release_de_energizes_output_before_mode_change() {
        let (mut registry, mut board) = booted();
        registry.request(5, PinOwner::Actuator, "pump").unwrap();
        registry
            .configure_mode(5, PinMode::Output, &mut board)
            .unwrap();
        board.digital_write(5, Level::High).unwrap();

        registry.release(5, &mut board).unwrap();

        // Probe order: ... write High, write Low, delay, mode HighZ.
        let ops = board.ops_for(5);
        let low_at = ops
            .iter()
            .rposition(|op| matches!(op, ProbeOp::Write(Level::Low)))
            .expect("inactive write missing");
        let highz_at = ops
            .iter()
            .rposition(|op| matches!(op, ProbeOp::Mode(PinMode::HighZPullUp)))
            .expect("mode change missing");
        assert!(low_at < highz_at, "de-energize must precede mode change");
        assert!(registry.is_available(5));
        assert!(registry.record(5).unwrap().in_safe_mode);
    }

    #[test]
    fn subzone_assignment_idempotent() {
        let (mut registry, mut board) = booted();
        registry.define_subzone("A", "bed A", "zone-1");
        registry.assign_to_subzone(4, "A", &mut board).unwrap();
        registry.assign_to_subzone(4, "A", &mut board).unwrap();
        assert_eq!(registry.subzone_pins("A"), vec![4]);
    }

    #[test]
    fn subzone_cross_assignment_refused() {
        let (mut registry, mut board) = booted();
        registry.define_subzone("A", "", "");
        registry.define_subzone("B", "", "");
        registry.assign_to_subzone(4, "A", &mut board).unwrap();
        let err = registry.assign_to_subzone(4, "B", &mut board).unwrap_err();
        assert!(matches!(err, PinError::SubzoneConflict { pin: 4, .. }));
    }

    #[test]
    fn subzone_safe_mode_parks_outputs_first() {
        let (mut registry, mut board) = booted();
        registry.define_subzone("A", "", "");
        registry.request(5, PinOwner::Actuator, "pump").unwrap();
        registry
            .configure_mode(5, PinMode::Output, &mut board)
            .unwrap();
        registry.assign_to_subzone(5, "A", &mut board).unwrap();
        board.digital_write(5, Level::High).unwrap();

        registry
            .enable_safe_mode_for_subzone("A", &mut board)
            .unwrap();

        assert!(registry.subzone("A").unwrap().safe_mode_active);
        assert_eq!(board.pin_mode(5), Some(PinMode::HighZPullUp));
        let ops = board.ops_for(5);
        let low = ops
            .iter()
            .rposition(|op| matches!(op, ProbeOp::Write(Level::Low)))
            .unwrap();
        let highz = ops
            .iter()
            .rposition(|op| matches!(op, ProbeOp::Mode(PinMode::HighZPullUp)))
            .unwrap();
        assert!(low < highz);
        // Ownership survives the overlay.
        assert_eq!(registry.owner_of(5).unwrap().0, PinOwner::Actuator);
    }

    #[test]
    fn subzone_safe_mode_catches_new_pins() {
        let (mut registry, mut board) = booted();
        registry.define_subzone("A", "", "");
        registry
            .enable_safe_mode_for_subzone("A", &mut board)
            .unwrap();

        registry.request(5, PinOwner::Actuator, "pump").unwrap();
        registry
            .configure_mode(5, PinMode::Output, &mut board)
            .unwrap();
        registry.assign_to_subzone(5, "A", &mut board).unwrap();
        // Joining an active-safe-mode subzone parks the pin immediately.
        assert_eq!(board.pin_mode(5), Some(PinMode::HighZPullUp));
    }

    #[test]
    fn subzone_disable_restores_modes() {
        let (mut registry, mut board) = booted();
        registry.define_subzone("A", "", "");
        registry.request(5, PinOwner::Actuator, "pump").unwrap();
        registry
            .configure_mode(5, PinMode::Output, &mut board)
            .unwrap();
        registry.assign_to_subzone(5, "A", &mut board).unwrap();
        registry
            .enable_safe_mode_for_subzone("A", &mut board)
            .unwrap();
        registry
            .disable_safe_mode_for_subzone("A", &mut board)
            .unwrap();
        assert_eq!(board.pin_mode(5), Some(PinMode::Output));
    }

    #[test]
    fn safe_mode_all_parks_everything_but_the_bus() {
        let (mut registry, mut board) = booted();
        registry.request(5, PinOwner::Actuator, "pump").unwrap();
        registry
            .configure_mode(5, PinMode::Output, &mut board)
            .unwrap();
        registry.request(6, PinOwner::Actuator, "fan").unwrap();
        registry.configure_mode(6, PinMode::Pwm, &mut board).unwrap();

        registry.enable_safe_mode_all(&mut board);

        assert_eq!(board.pin_mode(5), Some(PinMode::HighZPullUp));
        assert_eq!(board.pin_mode(6), Some(PinMode::HighZPullUp));
        assert_eq!(board.pin_mode(ESP32.i2c_sda), Some(PinMode::I2c));
    }

    #[test]
    fn release_unregistered_pin_fails() {
        let (mut registry, mut board) = booted();
        let err = registry.release(200, &mut board).unwrap_err();
        assert!(matches!(err, PinError::NotRegistered(200)));
        assert_eq!(err.code(), ErrorCode::PIN_NOT_REGISTERED);
    }
}
