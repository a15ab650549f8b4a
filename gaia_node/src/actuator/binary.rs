//! Binary output driver (pumps and relays).
//!
//! Pumps carry the hardware protection record: a runtime budget with a
//! cooldown, and an activation-frequency gate over a rolling window.
//! Relays are the same driver without protection.

use gaia_hal::board::{Board, Level};
use tracing::{debug, warn};

use super::driver::{
    ActuatorConfig, ActuatorDriver, ActuatorError, ActuatorKind, ActuatorStatus, TickEvent,
};

/// Rolling activation history depth. Must cover any sane
/// `max_activations_per_window`.
const HISTORY_CAP: usize = 32;

/// On/off output with optional pump protection.
pub struct BinaryDriver {
    config: ActuatorConfig,
    initialized: bool,
    emergency_stopped: bool,
    on: bool,
    /// Run time accumulated since the last cooldown reset [ms].
    accumulated_run_ms: u64,
    /// Set while the output is on; last accounting point.
    last_accounted_ms: Option<u64>,
    last_stop_ms: Option<u64>,
    /// Timestamps of recent activations for the frequency gate.
    history: heapless::Vec<u64, HISTORY_CAP>,
}

impl BinaryDriver {
    pub fn new(config: ActuatorConfig) -> Self {
        Self {
            config,
            initialized: false,
            emergency_stopped: false,
            on: false,
            accumulated_run_ms: 0,
            last_accounted_ms: None,
            last_stop_ms: None,
            history: heapless::Vec::new(),
        }
    }

    fn active_level(&self) -> Level {
        if self.config.inverted_logic {
            Level::Low
        } else {
            Level::High
        }
    }

    fn inactive_level(&self) -> Level {
        self.active_level().inverted()
    }

    /// Protection gate for a new activation.
    ///
    /// The runtime budget resets once the cooldown has elapsed; the
    /// frequency gate counts activations inside the rolling window
    /// (a zero window disables it).
    fn can_activate(&mut self, now_ms: u64) -> Result<(), ActuatorError> {
        let Some(protection) = self.config.protection else {
            return Ok(());
        };

        if self.accumulated_run_ms >= protection.max_run_ms {
            let cooled = self
                .last_stop_ms
                .is_some_and(|t| now_ms.saturating_sub(t) >= protection.cooldown_ms);
            if cooled {
                debug!(pin = self.config.pin, "cooldown elapsed, runtime budget reset");
                self.accumulated_run_ms = 0;
            } else {
                return Err(ActuatorError::ProtectionTripped("runtime budget spent"));
            }
        }

        if protection.window_ms > 0 {
            let in_window = self
                .history
                .iter()
                .filter(|t| now_ms.saturating_sub(**t) < protection.window_ms)
                .count();
            if in_window >= protection.max_activations_per_window as usize {
                return Err(ActuatorError::ProtectionTripped(
                    "too many activations in window",
                ));
            }
        }
        Ok(())
    }

    fn record_activation(&mut self, now_ms: u64) {
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(now_ms);
    }

    /// Close the current run: fold elapsed time into the accumulator.
    fn account_stop(&mut self, now_ms: u64) {
        if let Some(since) = self.last_accounted_ms.take() {
            self.accumulated_run_ms += now_ms.saturating_sub(since);
        }
        self.last_stop_ms = Some(now_ms);
    }

    fn write_output(&self, level: Level, board: &mut dyn Board) -> Result<(), ActuatorError> {
        board
            .digital_write(self.config.pin, level)
            .map_err(|e| ActuatorError::Hardware(e.to_string()))
    }
}

impl ActuatorDriver for BinaryDriver {
    fn kind(&self) -> ActuatorKind {
        self.config.kind
    }

    fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    fn init(&mut self, board: &mut dyn Board) -> Result<(), ActuatorError> {
        self.write_output(self.inactive_level(), board)?;
        self.initialized = true;
        self.on = false;
        Ok(())
    }

    fn set_binary(
        &mut self,
        on: bool,
        force: bool,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Err(ActuatorError::NotInitialized);
        }
        if self.emergency_stopped && !force {
            return Err(ActuatorError::EmergencyStopped);
        }
        if on == self.on {
            return Ok(());
        }

        if on {
            if !force {
                self.can_activate(now_ms)?;
            }
            self.record_activation(now_ms);
            self.write_output(self.active_level(), board)?;
            self.on = true;
            self.last_accounted_ms = Some(now_ms);
        } else {
            self.write_output(self.inactive_level(), board)?;
            self.on = false;
            self.account_stop(now_ms);
        }
        Ok(())
    }

    fn set_level(
        &mut self,
        level: f64,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> Result<(), ActuatorError> {
        self.set_binary(level >= 0.5, false, board, now_ms)
    }

    fn emergency_stop(&mut self, reason: &str, board: &mut dyn Board, now_ms: u64) {
        warn!(pin = self.config.pin, reason, "binary output emergency stop");
        if let Err(e) = self.write_output(self.inactive_level(), board) {
            warn!(pin = self.config.pin, "emergency de-energize failed: {e}");
        }
        if self.on {
            self.account_stop(now_ms);
            self.on = false;
        }
        self.emergency_stopped = true;
    }

    fn clear_emergency(&mut self) {
        self.emergency_stopped = false;
    }

    fn tick(&mut self, board: &mut dyn Board, now_ms: u64) -> Option<TickEvent> {
        if !self.on {
            return None;
        }
        // Live runtime accounting.
        if let Some(since) = self.last_accounted_ms {
            self.accumulated_run_ms += now_ms.saturating_sub(since);
            self.last_accounted_ms = Some(now_ms);
        }
        // The runtime budget also bounds a run in progress.
        if let Some(protection) = self.config.protection {
            if self.accumulated_run_ms >= protection.max_run_ms {
                warn!(pin = self.config.pin, "runtime budget spent, forcing off");
                if let Err(e) = self.write_output(self.inactive_level(), board) {
                    warn!(pin = self.config.pin, "protective stop failed: {e}");
                }
                self.on = false;
                self.account_stop(now_ms);
                return Some(TickEvent::AutoStopped {
                    reason: "runtime_protection",
                });
            }
        }
        None
    }

    fn status(&self, now_ms: u64) -> ActuatorStatus {
        let mut runtime = self.accumulated_run_ms;
        if let Some(since) = self.last_accounted_ms {
            runtime += now_ms.saturating_sub(since);
        }
        ActuatorStatus {
            state: self.on,
            level: if self.on { 255 } else { 0 },
            runtime_ms: runtime,
            emergency: self.emergency_stopped,
            position: None,
            moving: false,
        }
    }

    fn emergency_stopped(&self) -> bool {
        self.emergency_stopped
    }
}

#[cfg(test)]
mod tests {
    use super::super::driver::Protection;
    use super::*;
    use gaia_hal::sim::SimBoard;

    fn pump_config(protection: Option<Protection>) -> ActuatorConfig {
        ActuatorConfig {
            pin: 5,
            pin_b: None,
            kind: ActuatorKind::BinaryPump,
            kind_raw: "binary_pump".to_string(),
            name: "P1".to_string(),
            subzone_id: None,
            inverted_logic: false,
            transition_time_ms: 0,
            protection,
        }
    }

    fn init_pump(protection: Option<Protection>) -> (BinaryDriver, SimBoard) {
        let mut board = SimBoard::new();
        let mut driver = BinaryDriver::new(pump_config(protection));
        board.set_pin_mode(5, gaia_hal::board::PinMode::Output).unwrap();
        driver.init(&mut board).unwrap();
        (driver, board)
    }

    #[test]
    fn init_drives_inactive() {
        let (_, board) = init_pump(None);
        assert!(!board.level_of(5));
    }

    #[test]
    fn uninitialized_rejects_commands() {
        let mut board = SimBoard::new();
        let mut driver = BinaryDriver::new(pump_config(None));
        assert!(matches!(
            driver.set_binary(true, false, &mut board, 0),
            Err(ActuatorError::NotInitialized)
        ));
    }

    #[test]
    fn on_off_cycle_accounts_runtime() {
        let (mut driver, mut board) = init_pump(None);
        driver.set_binary(true, false, &mut board, 1000).unwrap();
        assert!(board.level_of(5));
        driver.set_binary(false, false, &mut board, 3500).unwrap();
        assert!(!board.level_of(5));
        assert_eq!(driver.status(4000).runtime_ms, 2500);
    }

    #[test]
    fn repeated_same_state_is_noop() {
        let (mut driver, mut board) = init_pump(None);
        driver.set_binary(true, false, &mut board, 0).unwrap();
        driver.set_binary(true, false, &mut board, 100).unwrap();
        // One activation recorded, not two.
        assert_eq!(driver.history.len(), 1);
    }

    #[test]
    fn inverted_logic_flips_levels() {
        let mut board = SimBoard::new();
        let mut config = pump_config(None);
        config.inverted_logic = true;
        let mut driver = BinaryDriver::new(config);
        driver.init(&mut board).unwrap();
        // Inactive = high for inverted outputs.
        assert!(board.level_of(5));
        driver.set_binary(true, false, &mut board, 0).unwrap();
        assert!(!board.level_of(5));
    }

    #[test]
    fn frequency_gate_trips_third_activation() {
        let protection = Protection {
            max_run_ms: 600_000,
            cooldown_ms: 10_000,
            window_ms: 60_000,
            max_activations_per_window: 2,
        };
        let (mut driver, mut board) = init_pump(Some(protection));

        driver.set_binary(true, false, &mut board, 1_000).unwrap();
        driver.set_binary(false, false, &mut board, 2_000).unwrap();
        driver.set_binary(true, false, &mut board, 3_000).unwrap();
        driver.set_binary(false, false, &mut board, 4_000).unwrap();

        let err = driver.set_binary(true, false, &mut board, 5_000).unwrap_err();
        assert!(matches!(err, ActuatorError::ProtectionTripped(_)));
        // No HIGH write for the refused activation.
        assert!(!board.level_of(5));

        // Outside the window the gate releases.
        driver.set_binary(true, false, &mut board, 62_000).unwrap();
        assert!(board.level_of(5));
    }

    #[test]
    fn zero_window_never_trips_frequency_gate() {
        let protection = Protection {
            max_run_ms: 600_000,
            cooldown_ms: 10_000,
            window_ms: 0,
            max_activations_per_window: 1,
        };
        let (mut driver, mut board) = init_pump(Some(protection));
        for t in 0..10u64 {
            driver.set_binary(true, false, &mut board, t * 100).unwrap();
            driver
                .set_binary(false, false, &mut board, t * 100 + 50)
                .unwrap();
        }
    }

    #[test]
    fn runtime_budget_requires_cooldown() {
        let protection = Protection {
            max_run_ms: 1_000,
            cooldown_ms: 5_000,
            window_ms: 0,
            max_activations_per_window: 0,
        };
        let (mut driver, mut board) = init_pump(Some(protection));

        driver.set_binary(true, false, &mut board, 0).unwrap();
        driver.set_binary(false, false, &mut board, 1_200).unwrap();

        // Budget spent, cooldown not elapsed.
        let err = driver.set_binary(true, false, &mut board, 2_000).unwrap_err();
        assert!(matches!(err, ActuatorError::ProtectionTripped(_)));

        // After the cooldown the budget resets.
        driver.set_binary(true, false, &mut board, 6_300).unwrap();
        assert!(board.level_of(5));
        assert_eq!(driver.accumulated_run_ms, 0);
    }

    #[test]
    fn tick_enforces_budget_mid_run() {
        let protection = Protection {
            max_run_ms: 1_000,
            cooldown_ms: 5_000,
            window_ms: 0,
            max_activations_per_window: 0,
        };
        let (mut driver, mut board) = init_pump(Some(protection));
        driver.set_binary(true, false, &mut board, 0).unwrap();

        assert_eq!(driver.tick(&mut board, 500), None);
        let event = driver.tick(&mut board, 1_100);
        assert_eq!(
            event,
            Some(TickEvent::AutoStopped {
                reason: "runtime_protection"
            })
        );
        assert!(!board.level_of(5));
        assert!(!driver.status(1_200).state);
    }

    #[test]
    fn emergency_gate_blocks_until_cleared() {
        let (mut driver, mut board) = init_pump(None);
        driver.set_binary(true, false, &mut board, 0).unwrap();
        driver.emergency_stop("broadcast", &mut board, 100);
        assert!(!board.level_of(5));
        assert!(driver.emergency_stopped());

        let err = driver.set_binary(true, false, &mut board, 200).unwrap_err();
        assert!(matches!(err, ActuatorError::EmergencyStopped));

        driver.clear_emergency();
        driver.set_binary(true, false, &mut board, 300).unwrap();
        assert!(board.level_of(5));
    }

    #[test]
    fn level_threshold_maps_to_binary() {
        let (mut driver, mut board) = init_pump(None);
        driver.set_level(0.7, &mut board, 0).unwrap();
        assert!(board.level_of(5));
        driver.set_level(0.3, &mut board, 10).unwrap();
        assert!(!board.level_of(5));
    }
}
