//! Actuator registry — configuration, command routing, persistence.
//!
//! Holds one driver per configured actuator (capacity 12). Pins are
//! obtained from the pin registry and given back on removal; command
//! outcomes are returned as data so the node can publish the response
//! strictly after the hardware state change.

pub mod binary;
pub mod driver;
pub mod pwm;
pub mod valve;

use gaia_common::consts::{MAX_ACTUATORS, MAX_GPIO, PIN_UNSET};
use gaia_common::error::{ConfigFault, ErrorCode, Severity};
use gaia_common::payload::{ActuatorCommandMsg, ActuatorConfigMsg};
use gaia_hal::board::{Board, PinMode};
use gaia_hal::registry::{PinError, PinOwner, PinRegistry};
use tracing::{info, warn};

use crate::ledger::ErrorLedger;
use crate::storage::{NS_ACTUATOR, Storage, StorageError};
use binary::BinaryDriver;
use driver::{ActuatorDriver, ActuatorKind, Protection, TickEvent};
use pwm::PwmDriver;
use valve::ValveDriver;

/// Default full-travel time for valves without an explicit setting [ms].
const DEFAULT_TRANSITION_MS: u64 = 3_000;

/// One configured actuator.
pub struct ActuatorRecord {
    pub driver: Box<dyn ActuatorDriver>,
    pub last_command_ms: Option<u64>,
    /// Timed-run deadline armed by an ON command with `duration`.
    pub auto_off_at_ms: Option<u64>,
}

impl ActuatorRecord {
    pub fn pin(&self) -> u8 {
        self.driver.config().pin
    }
}

/// Result of one inbound command, ready for response publication.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub pin: u8,
    pub command: String,
    pub value: Option<f64>,
    pub duration: Option<u64>,
    pub success: bool,
    pub message: String,
    /// Reason for an `.../alert` publish, when the failure warrants one.
    pub alert_reason: Option<&'static str>,
}

/// Event from the per-iteration actuator sweep.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    pub pin: u8,
    pub event: TickEvent,
}

/// Registry of configured actuators, ordered by configuration time.
#[derive(Default)]
pub struct ActuatorRegistry {
    items: Vec<ActuatorRecord>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, pin: u8) -> Option<&ActuatorRecord> {
        self.items.iter().find(|r| r.pin() == pin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActuatorRecord> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ActuatorRecord> {
        self.items.iter_mut()
    }

    // ─── Configuration ──────────────────────────────────────────────

    /// Apply one configuration entry and persist the table.
    ///
    /// A persistence failure keeps the in-memory state and is still
    /// reported so the server learns via the config response.
    pub fn configure(
        &mut self,
        msg: &ActuatorConfigMsg,
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
                &format!("actuator table persist failed: {e}"),
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
        msg: &ActuatorConfigMsg,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
    ) -> Result<(), ConfigFault> {
        if msg.actuator_type.trim().is_empty() {
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                "actuator_type must not be empty",
            ));
        }
        if msg.gpio > MAX_GPIO || msg.gpio == PIN_UNSET {
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                format!("gpio {} out of range", msg.gpio),
            ));
        }

        // `active: false` is a removal.
        if !msg.active {
            if self.find(msg.gpio).is_some() {
                self.remove_in_memory(msg.gpio, pins, board);
            }
            return Ok(());
        }

        let kind = ActuatorKind::parse(&msg.actuator_type).ok_or_else(|| {
            ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                format!("unknown actuator_type '{}'", msg.actuator_type),
            )
        })?;

        let pin_b = match (kind, msg.gpio_b) {
            (ActuatorKind::PositionValve, Some(b)) if b <= MAX_GPIO => Some(b),
            (ActuatorKind::PositionValve, _) => {
                return Err(ConfigFault::new(
                    ErrorCode::VALIDATION_FAILED,
                    "position_valve requires a valid gpio_b",
                ));
            }
            _ => None,
        };

        // Reconfiguration frees the old claim first (name or kind may
        // have changed); capacity only binds for genuinely new entries.
        let existing = self.find(msg.gpio);
        if existing.is_none() && self.items.len() >= MAX_ACTUATORS {
            return Err(ConfigFault::new(
                ErrorCode::ACTUATOR_CAPACITY,
                format!("actuator table full ({MAX_ACTUATORS})"),
            ));
        }
        if let Some(idx) = existing {
            let old = &self.items[idx];
            let old_pin_b = old.driver.config().pin_b;
            let _ = pins.release(msg.gpio, board);
            if let Some(b) = old_pin_b {
                let _ = pins.release(b, board);
            }
        }

        let name = if msg.actuator_name.is_empty() {
            format!("actuator_{}", msg.gpio)
        } else {
            msg.actuator_name.clone()
        };

        pins.request(msg.gpio, PinOwner::Actuator, &name)
            .map_err(pin_fault)?;
        if let Some(b) = pin_b {
            if let Err(e) = pins.request(b, PinOwner::Actuator, &name) {
                let _ = pins.release(msg.gpio, board);
                return Err(pin_fault(e));
            }
        }

        let mode = match kind {
            ActuatorKind::Pwm => PinMode::Pwm,
            _ => PinMode::Output,
        };
        pins.configure_mode(msg.gpio, mode, board).map_err(pin_fault)?;
        if let Some(b) = pin_b {
            pins.configure_mode(b, PinMode::Output, board)
                .map_err(pin_fault)?;
        }

        let config = driver::ActuatorConfig {
            pin: msg.gpio,
            pin_b,
            kind,
            kind_raw: msg.actuator_type.clone(),
            name,
            subzone_id: msg.subzone_id.clone(),
            inverted_logic: msg.inverted_logic,
            transition_time_ms: msg.transition_time_ms.unwrap_or(DEFAULT_TRANSITION_MS),
            protection: msg.protection.map(|p| Protection {
                max_run_ms: p.max_run_ms,
                cooldown_ms: p.cooldown_ms,
                window_ms: p.window_ms,
                max_activations_per_window: p.max_activations_per_window,
            }),
        };

        let mut boxed: Box<dyn ActuatorDriver> = match kind {
            ActuatorKind::BinaryPump | ActuatorKind::BinaryRelay => {
                Box::new(BinaryDriver::new(config))
            }
            ActuatorKind::PositionValve => Box::new(ValveDriver::new(config)),
            ActuatorKind::Pwm => Box::new(PwmDriver::new(config)),
        };
        if let Err(e) = boxed.init(board) {
            let _ = pins.release(msg.gpio, board);
            if let Some(b) = pin_b {
                let _ = pins.release(b, board);
            }
            return Err(ConfigFault::new(
                ErrorCode::VALIDATION_FAILED,
                format!("driver init failed: {e}"),
            ));
        }

        let record = ActuatorRecord {
            driver: boxed,
            last_command_ms: None,
            auto_off_at_ms: None,
        };
        match existing {
            Some(idx) => self.items[idx] = record,
            None => self.items.push(record),
        }
        info!(pin = msg.gpio, kind = kind.as_str(), "actuator configured");
        Ok(())
    }

    /// Remove an actuator, releasing its pins and closing the table gap.
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
                format!("no actuator on gpio {pin}"),
            ));
        }
        self.remove_in_memory(pin, pins, board);
        self.persist(storage)
            .map_err(|e| ConfigFault::new(e.code(), e.to_string()))
    }

    fn remove_in_memory(&mut self, pin: u8, pins: &mut PinRegistry, board: &mut dyn Board) {
        if let Some(idx) = self.find(pin) {
            let pin_b = self.items[idx].driver.config().pin_b;
            let _ = pins.release(pin, board);
            if let Some(b) = pin_b {
                let _ = pins.release(b, board);
            }
            self.items.remove(idx);
            info!(pin, "actuator removed");
        }
    }

    fn find(&self, pin: u8) -> Option<usize> {
        self.items.iter().position(|r| r.pin() == pin)
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Execute one parsed command against the addressed actuator.
    pub fn handle_command(
        &mut self,
        pin: u8,
        msg: &ActuatorCommandMsg,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> CommandOutcome {
        let command = msg.command.to_ascii_uppercase();
        let mut outcome = CommandOutcome {
            pin,
            command: command.clone(),
            value: msg.value,
            duration: msg.duration,
            success: false,
            message: String::new(),
            alert_reason: None,
        };

        let Some(idx) = self.find(pin) else {
            outcome.message = format!("no actuator configured on gpio {pin}");
            return outcome;
        };
        let record = &mut self.items[idx];

        let result = match command.as_str() {
            "ON" => record.driver.set_binary(true, false, board, now_ms),
            "OFF" => record.driver.set_binary(false, false, board, now_ms),
            "TOGGLE" => {
                let current = record.driver.status(now_ms).state;
                record.driver.set_binary(!current, false, board, now_ms)
            }
            "PWM" => match msg.value {
                None => Err(driver::ActuatorError::InvalidLevel(f64::NAN)),
                Some(v) => {
                    if record.driver.kind() == ActuatorKind::Pwm {
                        record.driver.set_level(v.clamp(0.0, 1.0), board, now_ms)
                    } else if (0.0..=1.0).contains(&v) {
                        record.driver.set_level(v, board, now_ms)
                    } else {
                        Err(driver::ActuatorError::InvalidLevel(v))
                    }
                }
            },
            _ => {
                outcome.message = format!("unknown command '{}'", msg.command);
                return outcome;
            }
        };

        match result {
            Ok(()) => {
                record.last_command_ms = Some(now_ms);
                record.auto_off_at_ms = match command.as_str() {
                    "ON" => msg.duration.map(|d| now_ms + d),
                    _ => None,
                };
                outcome.success = true;
                outcome.message = "command executed".to_string();
            }
            Err(e) => {
                outcome.message = e.to_string();
                outcome.alert_reason = e.alert_reason();
            }
        }
        outcome
    }

    /// Per-iteration sweep: timed-run deadlines and driver ticks.
    pub fn tick_all(&mut self, board: &mut dyn Board, now_ms: u64) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        for record in &mut self.items {
            let pin = record.pin();

            if let Some(deadline) = record.auto_off_at_ms {
                if now_ms >= deadline {
                    record.auto_off_at_ms = None;
                    match record.driver.set_binary(false, false, board, now_ms) {
                        Ok(()) => outcomes.push(TickOutcome {
                            pin,
                            event: TickEvent::AutoStopped {
                                reason: "duration_elapsed",
                            },
                        }),
                        Err(e) => warn!(pin, "timed auto-off failed: {e}"),
                    }
                }
            }

            if let Some(event) = record.driver.tick(board, now_ms) {
                if matches!(event, TickEvent::AutoStopped { .. }) {
                    record.auto_off_at_ms = None;
                }
                outcomes.push(TickOutcome { pin, event });
            }
        }
        outcomes
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Write the whole table in the indexed slot layout.
    pub fn persist(&self, storage: &mut Storage) -> Result<(), StorageError> {
        let mut session = storage.begin(NS_ACTUATOR, false)?;
        session.clear()?;
        session.put_u8("act_count", self.items.len() as u8)?;
        for (i, record) in self.items.iter().enumerate() {
            let config = record.driver.config();
            session.put_u8(&format!("act_{i}_pin"), config.pin)?;
            session.put_u8(&format!("act_{i}_pin_b"), config.pin_b.unwrap_or(PIN_UNSET))?;
            session.put_string(&format!("act_{i}_kind"), &config.kind_raw)?;
            session.put_string(&format!("act_{i}_name"), &config.name)?;
            session.put_string(
                &format!("act_{i}_subzone"),
                config.subzone_id.as_deref().unwrap_or(""),
            )?;
            session.put_bool(&format!("act_{i}_inv"), config.inverted_logic)?;
            session.put_u64(&format!("act_{i}_trans"), config.transition_time_ms)?;
            session.put_bool(&format!("act_{i}_prot"), config.protection.is_some())?;
            if let Some(p) = config.protection {
                session.put_u64(&format!("act_{i}_maxrun"), p.max_run_ms)?;
                session.put_u64(&format!("act_{i}_cool"), p.cooldown_ms)?;
                session.put_u64(&format!("act_{i}_window"), p.window_ms)?;
                session.put_u32(&format!("act_{i}_maxact"), p.max_activations_per_window)?;
            }
        }
        session.commit()
    }

    /// Rebuild the table from storage at boot.
    pub fn load_persisted(
        &mut self,
        pins: &mut PinRegistry,
        board: &mut dyn Board,
        storage: &mut Storage,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) {
        let messages = {
            let Ok(session) = storage.begin(NS_ACTUATOR, true) else {
                ledger.track(
                    now_ms,
                    ErrorCode::NAMESPACE_OPEN_FAILED,
                    Severity::Warning,
                    "actuator namespace unavailable at boot",
                );
                return;
            };
            let count = session.get_u8("act_count", 0) as usize;
            (0..count.min(MAX_ACTUATORS))
                .map(|i| {
                    let pin_b = session.get_u8(&format!("act_{i}_pin_b"), PIN_UNSET);
                    let subzone = session.get_string(&format!("act_{i}_subzone"), "");
                    let has_protection = session.get_bool(&format!("act_{i}_prot"), false);
                    ActuatorConfigMsg {
                        gpio: session.get_u8(&format!("act_{i}_pin"), PIN_UNSET),
                        gpio_b: (pin_b != PIN_UNSET).then_some(pin_b),
                        actuator_type: session.get_string(&format!("act_{i}_kind"), ""),
                        actuator_name: session.get_string(&format!("act_{i}_name"), ""),
                        subzone_id: (!subzone.is_empty()).then_some(subzone),
                        active: true,
                        inverted_logic: session.get_bool(&format!("act_{i}_inv"), false),
                        transition_time_ms: Some(
                            session.get_u64(&format!("act_{i}_trans"), DEFAULT_TRANSITION_MS),
                        ),
                        protection: has_protection.then(|| {
                            gaia_common::payload::ProtectionMsg {
                                max_run_ms: session.get_u64(&format!("act_{i}_maxrun"), 0),
                                cooldown_ms: session.get_u64(&format!("act_{i}_cool"), 0),
                                window_ms: session.get_u64(&format!("act_{i}_window"), 0),
                                max_activations_per_window: session
                                    .get_u32(&format!("act_{i}_maxact"), 0),
                            }
                        }),
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
                    &format!("persisted actuator gpio {} rejected: {}", msg.gpio, e.message),
                );
            }
        }
        if !self.items.is_empty() {
            info!(count = self.items.len(), "actuators restored from storage");
        }
    }
}

fn pin_fault(e: PinError) -> ConfigFault {
    let code = match e {
        PinError::InUse { .. } => ErrorCode::GPIO_CONFLICT,
        _ => ErrorCode::VALIDATION_FAILED,
    };
    ConfigFault::new(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_common::payload::ProtectionMsg;
    use gaia_hal::profile::ESP32;
    use gaia_hal::sim::SimBoard;

    struct Fixture {
        registry: ActuatorRegistry,
        pins: PinRegistry,
        board: SimBoard,
        storage: Storage,
        ledger: ErrorLedger,
    }

    fn fixture() -> Fixture {
        let mut board = SimBoard::new();
        let mut pins = PinRegistry::new(ESP32.clone());
        pins.init_all_safe(&mut board);
        Fixture {
            registry: ActuatorRegistry::new(),
            pins,
            board,
            storage: Storage::in_memory(),
            ledger: ErrorLedger::new(),
        }
    }

    fn pump_msg(pin: u8) -> ActuatorConfigMsg {
        ActuatorConfigMsg {
            gpio: pin,
            gpio_b: None,
            actuator_type: "binary_pump".to_string(),
            actuator_name: "P1".to_string(),
            subzone_id: None,
            active: true,
            inverted_logic: false,
            transition_time_ms: None,
            protection: None,
        }
    }

    #[test]
    fn configure_claims_pin_and_inits() {
        let mut f = fixture();
        f.registry
            .configure(
                &pump_msg(5),
                &mut f.pins,
                &mut f.board,
                &mut f.storage,
                &mut f.ledger,
                0,
            )
            .unwrap();
        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.pins.owner_of(5).unwrap().0, PinOwner::Actuator);
        assert!(!f.board.level_of(5));
    }

    #[test]
    fn capacity_enforced() {
        let mut f = fixture();
        let safe = ESP32.safe_pins;
        let mut configured = 0;
        for &pin in safe.iter() {
            if ESP32.is_input_only(pin) {
                continue;
            }
            if configured == MAX_ACTUATORS as u32 {
                let err = f
                    .registry
                    .configure(
                        &pump_msg(pin),
                        &mut f.pins,
                        &mut f.board,
                        &mut f.storage,
                        &mut f.ledger,
                        0,
                    )
                    .unwrap_err();
                assert_eq!(err.code, ErrorCode::ACTUATOR_CAPACITY);
                return;
            }
            f.registry
                .configure(
                    &pump_msg(pin),
                    &mut f.pins,
                    &mut f.board,
                    &mut f.storage,
                    &mut f.ledger,
                    0,
                )
                .unwrap();
            configured += 1;
        }
        panic!("not enough output-capable pins to exercise capacity");
    }

    #[test]
    fn pin_conflict_reported() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        f.pins.request(6, PinOwner::Sensor, "S").unwrap();
        let err = f
            .registry
            .configure(&pump_msg(6), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::GPIO_CONFLICT);
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut f = fixture();
        let mut msg = pump_msg(5);
        msg.actuator_type = "servo".to_string();
        let err = f
            .registry
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::VALIDATION_FAILED);
    }

    #[test]
    fn inactive_config_removes() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        let mut msg = pump_msg(5);
        msg.active = false;
        f.registry
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 1)
            .unwrap();
        assert!(f.registry.is_empty());
        assert!(f.pins.is_available(5));
    }

    #[test]
    fn on_off_command_flow() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();

        let msg = ActuatorCommandMsg {
            command: "on".to_string(),
            value: None,
            duration: None,
        };
        let outcome = f.registry.handle_command(5, &msg, &mut f.board, 10);
        assert!(outcome.success, "{}", outcome.message);
        assert!(f.board.level_of(5));
        assert_eq!(outcome.command, "ON");

        let msg = ActuatorCommandMsg {
            command: "TOGGLE".to_string(),
            value: None,
            duration: None,
        };
        let outcome = f.registry.handle_command(5, &msg, &mut f.board, 20);
        assert!(outcome.success);
        assert!(!f.board.level_of(5));
    }

    #[test]
    fn unknown_pin_and_command_fail() {
        let mut f = fixture();
        let msg = ActuatorCommandMsg {
            command: "ON".to_string(),
            value: None,
            duration: None,
        };
        let outcome = f.registry.handle_command(9, &msg, &mut f.board, 0);
        assert!(!outcome.success);

        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        let msg = ActuatorCommandMsg {
            command: "EXPLODE".to_string(),
            value: None,
            duration: None,
        };
        let outcome = f.registry.handle_command(5, &msg, &mut f.board, 0);
        assert!(!outcome.success);
        assert!(outcome.message.contains("unknown command"));
    }

    #[test]
    fn pwm_out_of_range_rejected_for_binary() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        let msg = ActuatorCommandMsg {
            command: "PWM".to_string(),
            value: Some(1.5),
            duration: None,
        };
        let outcome = f.registry.handle_command(5, &msg, &mut f.board, 0);
        assert!(!outcome.success);
        assert!(outcome.message.contains("invalid level"));
    }

    #[test]
    fn protection_trip_surfaces_alert_reason() {
        let mut f = fixture();
        let mut msg = pump_msg(5);
        msg.protection = Some(ProtectionMsg {
            max_run_ms: 600_000,
            cooldown_ms: 10_000,
            window_ms: 60_000,
            max_activations_per_window: 2,
        });
        f.registry
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();

        let on = ActuatorCommandMsg {
            command: "ON".to_string(),
            value: None,
            duration: None,
        };
        let off = ActuatorCommandMsg {
            command: "OFF".to_string(),
            value: None,
            duration: None,
        };
        assert!(f.registry.handle_command(5, &on, &mut f.board, 1_000).success);
        assert!(f.registry.handle_command(5, &off, &mut f.board, 2_000).success);
        assert!(f.registry.handle_command(5, &on, &mut f.board, 3_000).success);
        assert!(f.registry.handle_command(5, &off, &mut f.board, 4_000).success);

        let outcome = f.registry.handle_command(5, &on, &mut f.board, 5_000);
        assert!(!outcome.success);
        assert_eq!(outcome.alert_reason, Some("runtime_protection"));
        assert!(!f.board.level_of(5));
    }

    #[test]
    fn duration_arms_auto_off() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        let msg = ActuatorCommandMsg {
            command: "ON".to_string(),
            value: None,
            duration: Some(2_000),
        };
        assert!(f.registry.handle_command(5, &msg, &mut f.board, 100).success);
        assert!(f.board.level_of(5));

        assert!(f.registry.tick_all(&mut f.board, 1_000).is_empty());
        let events = f.registry.tick_all(&mut f.board, 2_100);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].event,
            TickEvent::AutoStopped {
                reason: "duration_elapsed"
            }
        ));
        assert!(!f.board.level_of(5));
    }

    #[test]
    fn persist_and_restore_round_trip() {
        let mut f = fixture();
        let valve = ActuatorConfigMsg {
            gpio: 13,
            gpio_b: Some(14),
            actuator_type: "position_valve".to_string(),
            actuator_name: "V1".to_string(),
            subzone_id: Some("A".to_string()),
            active: true,
            inverted_logic: false,
            transition_time_ms: Some(4_000),
            protection: None,
        };
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        f.registry
            .configure(&valve, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();

        // Fresh process: new registries, same storage.
        let mut board = SimBoard::new();
        let mut pins = PinRegistry::new(ESP32.clone());
        pins.init_all_safe(&mut board);
        let mut restored = ActuatorRegistry::new();
        restored.load_persisted(&mut pins, &mut board, &mut f.storage, &mut f.ledger, 0);

        assert_eq!(restored.len(), 2);
        let valve_rec = restored.get(13).unwrap();
        assert_eq!(valve_rec.driver.kind(), ActuatorKind::PositionValve);
        assert_eq!(valve_rec.driver.config().transition_time_ms, 4_000);
        assert_eq!(valve_rec.driver.config().subzone_id.as_deref(), Some("A"));
        assert_eq!(pins.owner_of(14).unwrap().0, PinOwner::Actuator);
    }

    #[test]
    fn reconfigure_same_pin_updates_in_place() {
        let mut f = fixture();
        f.registry
            .configure(&pump_msg(5), &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        let mut msg = pump_msg(5);
        msg.actuator_name = "P1-renamed".to_string();
        msg.inverted_logic = true;
        f.registry
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 1)
            .unwrap();
        assert_eq!(f.registry.len(), 1);
        let record = f.registry.get(5).unwrap();
        assert!(record.driver.config().inverted_logic);
        assert_eq!(record.driver.config().name, "P1-renamed");
    }
}
