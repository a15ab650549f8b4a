//! Safety controller — emergency-stop state machine.
//!
//! NORMAL → ACTIVE → CLEARING → RESUMING → NORMAL. Stopping latches
//! every actuator driver; clearing requires a verification pass that is
//! strictly a hardware/state check (elapsed hold-off, pin registry
//! consistency, free heap, outputs inactive). Business priorities —
//! which actuator matters most — belong to the server, not here.
//!
//! Resuming never re-activates outputs; the server must reissue its
//! desired commands.

use bitflags::bitflags;
use gaia_common::consts::{SAFETY_HEAP_FLOOR, SAFETY_VERIFY_TIMEOUT_MS};
use gaia_hal::board::Board;
use gaia_hal::registry::PinRegistry;
use tracing::{info, warn};

use crate::actuator::ActuatorRegistry;

/// Emergency lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyState {
    Normal,
    /// Emergency latched; all non-force commands rejected.
    Active,
    /// Verification pass in progress.
    Clearing,
    /// Verified; outputs stay off until the server commands otherwise.
    Resuming,
}

bitflags! {
    /// Individual verification checks. A failed clear reports the
    /// checks that did not pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SafetyChecks: u8 {
        /// Hold-off since the stop has elapsed.
        const DELAY_ELAPSED    = 0b0001;
        /// Pin registry is conflict-free.
        const PINS_CONSISTENT  = 0b0010;
        /// Free heap above the floor.
        const HEAP_OK          = 0b0100;
        /// Every actuator output reads inactive.
        const OUTPUTS_INACTIVE = 0b1000;
    }
}

/// Emergency-stop state machine. Owns nothing but its own state; the
/// actuator registry and board are passed per call.
#[derive(Debug)]
pub struct SafetyController {
    state: SafetyState,
    reason: String,
    emergency_ts_ms: Option<u64>,
    verification_timeout_ms: u64,
}

impl SafetyController {
    pub fn new() -> Self {
        Self {
            state: SafetyState::Normal,
            reason: String::new(),
            emergency_ts_ms: None,
            verification_timeout_ms: SAFETY_VERIFY_TIMEOUT_MS,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != SafetyState::Normal
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Latch the emergency and stop every actuator.
    ///
    /// Idempotent: a second call while ACTIVE is a no-op and returns
    /// false. Drivers publish their own alerts as they transition.
    pub fn emergency_stop_all(
        &mut self,
        reason: &str,
        actuators: &mut ActuatorRegistry,
        board: &mut dyn Board,
        now_ms: u64,
    ) -> bool {
        if self.state == SafetyState::Active {
            return false;
        }
        warn!(reason, "EMERGENCY STOP");
        self.state = SafetyState::Active;
        self.reason = reason.to_string();
        self.emergency_ts_ms = Some(now_ms);

        for record in actuators.iter_mut() {
            record.auto_off_at_ms = None;
            record.driver.emergency_stop(reason, board, now_ms);
        }
        true
    }

    /// Run the verification checks without mutating state.
    pub fn verify_system_safety(
        &self,
        actuators: &ActuatorRegistry,
        pins: &PinRegistry,
        board: &dyn Board,
        now_ms: u64,
    ) -> SafetyChecks {
        let mut passed = SafetyChecks::empty();

        let elapsed_ok = self
            .emergency_ts_ms
            .is_some_and(|t| now_ms.saturating_sub(t) >= self.verification_timeout_ms);
        if elapsed_ok {
            passed |= SafetyChecks::DELAY_ELAPSED;
        }
        if pins.consistent() {
            passed |= SafetyChecks::PINS_CONSISTENT;
        }
        if board.heap_free() >= SAFETY_HEAP_FLOOR {
            passed |= SafetyChecks::HEAP_OK;
        }
        if actuators.iter().all(|r| !r.driver.status(now_ms).state) {
            passed |= SafetyChecks::OUTPUTS_INACTIVE;
        }
        passed
    }

    /// ACTIVE → CLEARING → RESUMING, or back to ACTIVE with the failed
    /// checks when verification does not pass.
    pub fn clear_emergency(
        &mut self,
        actuators: &mut ActuatorRegistry,
        pins: &PinRegistry,
        board: &dyn Board,
        now_ms: u64,
    ) -> Result<(), SafetyChecks> {
        if self.state != SafetyState::Active {
            // Nothing latched; treat as success without touching drivers.
            return Ok(());
        }
        self.state = SafetyState::Clearing;

        let passed = self.verify_system_safety(actuators, pins, board, now_ms);
        let failed = SafetyChecks::all() - passed;
        if !failed.is_empty() {
            warn!(?failed, "emergency clear verification failed");
            self.state = SafetyState::Active;
            return Err(failed);
        }

        for record in actuators.iter_mut() {
            record.driver.clear_emergency();
        }
        info!("emergency cleared, resuming");
        self.state = SafetyState::Resuming;
        Ok(())
    }

    /// Advance RESUMING → NORMAL. Called every loop iteration; returns
    /// true on the transition.
    pub fn tick(&mut self) -> bool {
        if self.state == SafetyState::Resuming {
            self.state = SafetyState::Normal;
            self.reason.clear();
            self.emergency_ts_ms = None;
            info!("safety state back to normal");
            return true;
        }
        false
    }
}

impl Default for SafetyController {
    fn default() -> Self {
        Self::new()
    }
}
