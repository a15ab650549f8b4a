//! Node identity, zone assignment and the approval gate.
//!
//! The server must approve a node before measurement and actuation are
//! allowed; until then only heartbeats and administrative traffic flow.
//! Approval and identity are persisted so a restart comes back in the
//! same state.

use gaia_common::consts::DEFAULT_KAISER_ID;
use gaia_common::error::{ErrorCode, Severity};
use tracing::{info, warn};

use crate::ledger::ErrorLedger;
use crate::storage::{NS_SYSTEM, NS_ZONE, Storage};

/// Top-level run state of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for the server's approval; suppresses measurement and
    /// actuator command execution.
    PendingApproval,
    /// Fully operational.
    Operational,
    /// Rejected by the server or unrecoverable fault.
    Error,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Operational => "operational",
            Self::Error => "error",
        }
    }
}

/// Why the loop should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    /// Plain reboot.
    Restart,
    /// Factory reset already executed; reboot into provisioning.
    FactoryReset,
}

/// Outcome of a heartbeat-ack, for the caller to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Approval granted now (or re-confirmed).
    Approved,
    /// Still waiting.
    Pending,
    /// Server rejected the node.
    Rejected,
    /// Unknown status string; ignored.
    Ignored,
}

/// Identity, zone and approval state owned by the node.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub node_id: String,
    pub kaiser_id: String,
    pub zone_id: String,
    pub master_zone_id: String,
    pub zone_name: String,
    pub approved: bool,
    pub run_state: RunState,
    /// Wall clock at boot, for `uptime_s`.
    pub boot_epoch_s: u64,
    /// False after a namespace open failure; reported in heartbeats.
    pub storage_ok: bool,
    pub shutdown: Option<ShutdownRequest>,
}

/// `ESP_` + uppercase hex of the last three MAC bytes.
pub fn node_id_from_mac(mac: [u8; 6]) -> String {
    format!("ESP_{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5])
}

impl SystemState {
    /// Load identity and zone from storage, deriving and persisting the
    /// node id on first boot.
    pub fn load(storage: &mut Storage, mac: [u8; 6], boot_epoch_s: u64) -> Self {
        let mut storage_ok = true;

        let (node_id, approved) = match storage.begin(NS_SYSTEM, false) {
            Ok(mut session) => {
                let approved = session.get_bool("approved", false);
                if session.contains("node_id") {
                    (session.get_string("node_id", ""), approved)
                } else {
                    let derived = node_id_from_mac(mac);
                    if session.put_string("node_id", &derived).is_ok() {
                        if let Err(e) = session.commit() {
                            warn!("node id persist failed: {e}");
                        }
                    }
                    (derived, approved)
                }
            }
            Err(e) => {
                warn!("system namespace unavailable: {e}");
                storage_ok = false;
                (node_id_from_mac(mac), false)
            }
        };

        let (kaiser_id, zone_id, master_zone_id, zone_name) = match storage.begin(NS_ZONE, true) {
            Ok(session) => (
                session.get_string("kaiser_id", DEFAULT_KAISER_ID),
                session.get_string("zone_id", ""),
                session.get_string("master_zone", ""),
                session.get_string("zone_name", ""),
            ),
            Err(e) => {
                warn!("zone namespace unavailable: {e}");
                storage_ok = false;
                (DEFAULT_KAISER_ID.to_string(), String::new(), String::new(), String::new())
            }
        };

        let run_state = if approved {
            RunState::Operational
        } else {
            RunState::PendingApproval
        };

        info!(%node_id, %kaiser_id, approved, "system state loaded");
        Self {
            node_id,
            kaiser_id,
            zone_id,
            master_zone_id,
            zone_name,
            approved,
            run_state,
            boot_epoch_s,
            storage_ok,
            shutdown: None,
        }
    }

    pub fn zone_assigned(&self) -> bool {
        !self.zone_id.is_empty()
    }

    /// Measurement and actuation allowed?
    pub fn operational(&self) -> bool {
        self.run_state == RunState::Operational
    }

    pub fn uptime_s(&self, epoch_s: u64) -> u64 {
        epoch_s.saturating_sub(self.boot_epoch_s)
    }

    /// Apply a zone assignment and persist it.
    pub fn assign_zone(
        &mut self,
        zone_id: &str,
        master_zone_id: &str,
        zone_name: &str,
        kaiser_id: Option<&str>,
        storage: &mut Storage,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) {
        self.zone_id = zone_id.to_string();
        self.master_zone_id = master_zone_id.to_string();
        self.zone_name = zone_name.to_string();
        if let Some(kaiser) = kaiser_id {
            if !kaiser.is_empty() {
                self.kaiser_id = kaiser.to_string();
            }
        }

        let result = storage.begin(NS_ZONE, false).and_then(|mut session| {
            session.put_string("zone_id", &self.zone_id)?;
            session.put_string("master_zone", &self.master_zone_id)?;
            session.put_string("zone_name", &self.zone_name)?;
            session.put_string("kaiser_id", &self.kaiser_id)?;
            session.commit()
        });
        if let Err(e) = result {
            ledger.track(now_ms, e.code(), Severity::Error, &format!("zone persist: {e}"));
        }
        info!(zone_id, kaiser = %self.kaiser_id, "zone assigned");
    }

    /// Handle a `system/heartbeat/ack` status per the approval protocol.
    pub fn apply_heartbeat_ack(
        &mut self,
        status: &str,
        server_time: Option<u64>,
        storage: &mut Storage,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) -> AckOutcome {
        match status {
            "approved" | "online" => {
                let first = !self.approved;
                self.approved = true;
                self.run_state = RunState::Operational;
                let result = storage.begin(NS_SYSTEM, false).and_then(|mut session| {
                    session.put_bool("approved", true)?;
                    if let Some(ts) = server_time {
                        session.put_u64("approved_at", ts)?;
                    }
                    session.commit()
                });
                if let Err(e) = result {
                    ledger.track(
                        now_ms,
                        e.code(),
                        Severity::Error,
                        &format!("approval persist: {e}"),
                    );
                }
                if first {
                    info!("server approval granted, entering operational state");
                }
                AckOutcome::Approved
            }
            "pending_approval" => {
                // Not persisted; the node keeps asking via heartbeats.
                if self.run_state != RunState::Error {
                    self.run_state = if self.approved {
                        RunState::Operational
                    } else {
                        RunState::PendingApproval
                    };
                }
                AckOutcome::Pending
            }
            "rejected" => {
                warn!("server rejected this node");
                self.approved = false;
                self.run_state = RunState::Error;
                let result = storage.begin(NS_SYSTEM, false).and_then(|mut session| {
                    session.erase("approved")?;
                    session.erase("approved_at")?;
                    session.commit()
                });
                if let Err(e) = result {
                    ledger.track(
                        now_ms,
                        e.code(),
                        Severity::Error,
                        &format!("approval clear: {e}"),
                    );
                }
                AckOutcome::Rejected
            }
            other => {
                ledger.track(
                    now_ms,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Warning,
                    &format!("unknown heartbeat ack status '{other}'"),
                );
                AckOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0xA4, 0xCF, 0x12, 0xAB, 0x12, 0xCD];

    #[test]
    fn node_id_derivation() {
        assert_eq!(node_id_from_mac(MAC), "ESP_AB12CD");
        assert_eq!(
            node_id_from_mac([0, 0, 0, 0x01, 0x02, 0x0F]),
            "ESP_01020F"
        );
    }

    #[test]
    fn first_boot_derives_and_persists_id() {
        let mut storage = Storage::in_memory();
        let state = SystemState::load(&mut storage, MAC, 1_700_000_000);
        assert_eq!(state.node_id, "ESP_AB12CD");
        assert_eq!(state.kaiser_id, DEFAULT_KAISER_ID);
        assert!(!state.approved);
        assert_eq!(state.run_state, RunState::PendingApproval);

        // Second boot reads the persisted id even with another MAC.
        let state2 = SystemState::load(&mut storage, [9; 6], 1_700_000_100);
        assert_eq!(state2.node_id, "ESP_AB12CD");
    }

    #[test]
    fn approval_ack_persists_across_restart() {
        let mut storage = Storage::in_memory();
        let mut ledger = ErrorLedger::new();
        let mut state = SystemState::load(&mut storage, MAC, 0);

        let outcome = state.apply_heartbeat_ack(
            "approved",
            Some(1_700_000_100),
            &mut storage,
            &mut ledger,
            5,
        );
        assert_eq!(outcome, AckOutcome::Approved);
        assert!(state.operational());

        let rebooted = SystemState::load(&mut storage, MAC, 10);
        assert!(rebooted.approved);
        assert_eq!(rebooted.run_state, RunState::Operational);
    }

    #[test]
    fn pending_ack_does_not_persist() {
        let mut storage = Storage::in_memory();
        let mut ledger = ErrorLedger::new();
        let mut state = SystemState::load(&mut storage, MAC, 0);

        let outcome =
            state.apply_heartbeat_ack("pending_approval", None, &mut storage, &mut ledger, 5);
        assert_eq!(outcome, AckOutcome::Pending);
        assert_eq!(state.run_state, RunState::PendingApproval);

        let rebooted = SystemState::load(&mut storage, MAC, 10);
        assert!(!rebooted.approved);
    }

    #[test]
    fn rejection_clears_persisted_approval() {
        let mut storage = Storage::in_memory();
        let mut ledger = ErrorLedger::new();
        let mut state = SystemState::load(&mut storage, MAC, 0);
        state.apply_heartbeat_ack("approved", None, &mut storage, &mut ledger, 1);

        let outcome = state.apply_heartbeat_ack("rejected", None, &mut storage, &mut ledger, 2);
        assert_eq!(outcome, AckOutcome::Rejected);
        assert_eq!(state.run_state, RunState::Error);

        let rebooted = SystemState::load(&mut storage, MAC, 10);
        assert!(!rebooted.approved);
    }

    #[test]
    fn zone_assignment_persists() {
        let mut storage = Storage::in_memory();
        let mut ledger = ErrorLedger::new();
        let mut state = SystemState::load(&mut storage, MAC, 0);
        assert!(!state.zone_assigned());

        state.assign_zone(
            "greenhouse-3",
            "site-1",
            "North greenhouse",
            Some("kaiser-2"),
            &mut storage,
            &mut ledger,
            5,
        );
        assert!(state.zone_assigned());
        assert_eq!(state.kaiser_id, "kaiser-2");

        let rebooted = SystemState::load(&mut storage, MAC, 10);
        assert_eq!(rebooted.zone_id, "greenhouse-3");
        assert_eq!(rebooted.master_zone_id, "site-1");
        assert_eq!(rebooted.kaiser_id, "kaiser-2");
    }

    #[test]
    fn unknown_ack_status_ignored() {
        let mut storage = Storage::in_memory();
        let mut ledger = ErrorLedger::new();
        let mut state = SystemState::load(&mut storage, MAC, 0);
        let outcome = state.apply_heartbeat_ack("resting", None, &mut storage, &mut ledger, 1);
        assert_eq!(outcome, AckOutcome::Ignored);
        assert_eq!(state.run_state, RunState::PendingApproval);
        assert_eq!(ledger.len(), 1);
    }
}
