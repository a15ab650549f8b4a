//! Periodic measurement pipeline.
//!
//! A poll cycle reads analog and I²C sensors immediately and starts
//! single-wire conversions; conversions finish through a pending queue
//! on later loop iterations, so no tick ever blocks for the 750 ms
//! conversion time. One failed sensor never blocks the others.

use gaia_common::consts::ONEWIRE_CONVERSION_MS;
use gaia_common::error::Severity;
use gaia_common::payload::{ProcessingRequest, ProcessingResponse, SensorDataPayload};
use gaia_hal::board::Board;
use gaia_hal::bus::{analog, i2c, onewire};
use gaia_hal::profile::BoardProfile;
use tracing::debug;

use super::processing::ProcessingClient;
use super::{SensorKind, SensorRecord, SensorRegistry};
use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::ledger::ErrorLedger;

/// Identity fields stamped into every measurement payload.
#[derive(Debug, Clone)]
pub struct MeasurementScope {
    pub esp_id: String,
    pub zone_id: String,
    pub epoch_s: u64,
}

/// A single-wire conversion in flight.
#[derive(Debug, Clone, Copy)]
struct PendingConversion {
    pin: u8,
    ready_at_ms: u64,
}

/// Drives raw reads and processing calls; the node publishes the
/// returned payloads.
pub struct SensorPoller {
    processing: Box<dyn ProcessingClient>,
    breaker: CircuitBreaker,
    pending: Vec<PendingConversion>,
}

impl SensorPoller {
    pub fn new(processing: Box<dyn ProcessingClient>) -> Self {
        Self {
            processing,
            breaker: CircuitBreaker::new(BreakerConfig::PROCESSING),
            pending: Vec::new(),
        }
    }

    pub fn processing_breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Start one measurement cycle: immediate buses now, single-wire
    /// conversions into the pending queue.
    pub fn start_cycle(
        &mut self,
        sensors: &mut SensorRegistry,
        board: &mut dyn Board,
        profile: &BoardProfile,
        ledger: &mut ErrorLedger,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> Vec<SensorDataPayload> {
        let mut out = Vec::new();
        for idx in 0..sensors.records().len() {
            let (pin, kind, active) = {
                let r = &sensors.records()[idx];
                (r.pin, r.kind, r.active)
            };
            if !active {
                continue;
            }
            match kind {
                SensorKind::OneWireTemp => self.start_conversion(sensors, idx, board, ledger, now_ms),
                SensorKind::Analog | SensorKind::I2c { .. } => {
                    if let Some(payload) =
                        self.read_immediate(sensors, idx, board, profile, ledger, now_ms, scope)
                    {
                        out.push(payload);
                    }
                }
            }
            debug!(pin, "sensor cycle step done");
        }
        out
    }

    /// Complete due single-wire conversions. Call every loop iteration.
    pub fn tick(
        &mut self,
        sensors: &mut SensorRegistry,
        board: &mut dyn Board,
        ledger: &mut ErrorLedger,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> Vec<SensorDataPayload> {
        let mut out = Vec::new();
        let due: Vec<u8> = self
            .pending
            .iter()
            .filter(|p| now_ms >= p.ready_at_ms)
            .map(|p| p.pin)
            .collect();
        if due.is_empty() {
            return out;
        }
        self.pending.retain(|p| now_ms < p.ready_at_ms);

        for pin in due {
            let Some(idx) = sensors.records().iter().position(|r| r.pin == pin) else {
                // Sensor removed while converting.
                continue;
            };
            let rom = sensors.records()[idx].rom;
            match onewire::read_raw_temperature(board, pin, rom.as_ref()) {
                Ok(raw) => {
                    let payload =
                        self.finish_measurement(sensors, idx, f64::from(raw), now_ms, scope);
                    out.push(payload);
                }
                Err(e) => {
                    // `last_raw` stays untouched on a failed read.
                    ledger.track(now_ms, e.code(), Severity::Error, &format!("pin {pin}: {e}"));
                }
            }
        }
        out
    }

    /// Out-of-cycle single read (server `read` command). Single-wire
    /// sensors answer on a later tick through the pending queue.
    pub fn read_single(
        &mut self,
        sensors: &mut SensorRegistry,
        pin: u8,
        board: &mut dyn Board,
        profile: &BoardProfile,
        ledger: &mut ErrorLedger,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> Option<SensorDataPayload> {
        let idx = sensors.records().iter().position(|r| r.pin == pin)?;
        match sensors.records()[idx].kind {
            SensorKind::OneWireTemp => {
                self.start_conversion(sensors, idx, board, ledger, now_ms);
                None
            }
            _ => self.read_immediate(sensors, idx, board, profile, ledger, now_ms, scope),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn start_conversion(
        &mut self,
        sensors: &SensorRegistry,
        idx: usize,
        board: &mut dyn Board,
        ledger: &mut ErrorLedger,
        now_ms: u64,
    ) {
        let record = &sensors.records()[idx];
        if self.pending.iter().any(|p| p.pin == record.pin) {
            // Previous conversion still in flight.
            return;
        }
        match onewire::start_conversion(board, record.pin, record.rom.as_ref()) {
            Ok(()) => self.pending.push(PendingConversion {
                pin: record.pin,
                ready_at_ms: now_ms + ONEWIRE_CONVERSION_MS,
            }),
            Err(e) => ledger.track(
                now_ms,
                e.code(),
                Severity::Error,
                &format!("pin {}: {e}", record.pin),
            ),
        }
    }

    fn read_immediate(
        &mut self,
        sensors: &mut SensorRegistry,
        idx: usize,
        board: &mut dyn Board,
        profile: &BoardProfile,
        ledger: &mut ErrorLedger,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> Option<SensorDataPayload> {
        let (pin, kind) = {
            let r = &sensors.records()[idx];
            (r.pin, r.kind)
        };
        let raw = match kind {
            SensorKind::Analog => match analog::read_raw_analog(board, profile, pin) {
                Ok(sample) => f64::from(sample),
                Err(e) => {
                    ledger.track(now_ms, e.code(), Severity::Warning, &format!("pin {pin}: {e}"));
                    return None;
                }
            },
            SensorKind::I2c { addr } => {
                let mut buf = [0u8; 2];
                match i2c::read_raw(board, addr, 0x00, &mut buf) {
                    Ok(()) => f64::from(u16::from_be_bytes(buf)),
                    Err(e) => {
                        ledger.track(now_ms, e.code(), e.severity(), &format!("pin {pin}: {e}"));
                        return None;
                    }
                }
            }
            SensorKind::OneWireTemp => return None,
        };
        Some(self.finish_measurement(sensors, idx, raw, now_ms, scope))
    }

    /// Record the raw value, run the processing call, build the payload.
    fn finish_measurement(
        &mut self,
        sensors: &mut SensorRegistry,
        idx: usize,
        raw: f64,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> SensorDataPayload {
        {
            let record = &mut sensors.records_mut()[idx];
            record.last_raw = Some(raw);
            record.last_read_ms = Some(now_ms);
        }
        let record = &sensors.records()[idx];
        let processed = self.request_processing(record, raw, now_ms, scope);
        build_payload(record, raw, processed, scope)
    }

    /// Out-of-band processing, guarded by its own breaker. A denied or
    /// failed call degrades to a raw-only payload, never an error.
    fn request_processing(
        &mut self,
        record: &SensorRecord,
        raw: f64,
        now_ms: u64,
        scope: &MeasurementScope,
    ) -> Option<ProcessingResponse> {
        if !self.breaker.allow_request(now_ms) {
            return None;
        }
        let request = ProcessingRequest {
            esp_id: scope.esp_id.clone(),
            pin: record.pin,
            kind: record.kind_raw.clone(),
            raw_value: raw,
            ts: scope.epoch_s,
            metadata: serde_json::json!({
                "sensor_name": record.name,
                "subzone_id": record.subzone_id,
            }),
        };
        match self.processing.process(&request) {
            Ok(response) => {
                self.breaker.record_success(now_ms);
                Some(response)
            }
            Err(e) => {
                self.breaker.record_failure(now_ms);
                debug!(pin = record.pin, "processing call failed: {e}");
                None
            }
        }
    }
}

fn build_payload(
    record: &SensorRecord,
    raw: f64,
    processed: Option<ProcessingResponse>,
    scope: &MeasurementScope,
) -> SensorDataPayload {
    match processed {
        Some(response) => SensorDataPayload {
            esp_id: scope.esp_id.clone(),
            zone_id: scope.zone_id.clone(),
            subzone_id: record.subzone_id.clone(),
            pin: record.pin,
            sensor_kind: record.kind_raw.clone(),
            raw_value: raw,
            processed_value: response.value,
            unit: response.unit,
            quality: response.quality,
            valid: response.valid,
            timestamp: scope.epoch_s,
        },
        None => SensorDataPayload {
            esp_id: scope.esp_id.clone(),
            zone_id: scope.zone_id.clone(),
            subzone_id: record.subzone_id.clone(),
            pin: record.pin,
            sensor_kind: record.kind_raw.clone(),
            raw_value: raw,
            processed_value: 0.0,
            unit: String::new(),
            quality: String::new(),
            valid: false,
            timestamp: scope.epoch_s,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::processing::SharedMockProcessing;
    use super::*;
    use gaia_common::payload::SensorConfigMsg;
    use gaia_hal::profile::ESP32;
    use gaia_hal::registry::PinRegistry;
    use gaia_hal::sim::SimBoard;
    use crate::storage::Storage;

    const POR_SCRATCHPAD: [u8; 9] = [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x1C];
    const ROM: [u8; 8] = [0x28, 0xFF, 0x64, 0x1E, 0x0F, 0x00, 0x00, 0x2C];

    struct Fixture {
        sensors: SensorRegistry,
        pins: PinRegistry,
        board: SimBoard,
        storage: Storage,
        ledger: ErrorLedger,
        poller: SensorPoller,
        mock: SharedMockProcessing,
    }

    fn scope() -> MeasurementScope {
        MeasurementScope {
            esp_id: "ESP_AB12CD".to_string(),
            zone_id: "zone-1".to_string(),
            epoch_s: 1_700_000_000,
        }
    }

    fn fixture() -> Fixture {
        let mut board = SimBoard::new();
        let mut pins = PinRegistry::new(ESP32.clone());
        pins.init_all_safe(&mut board);
        let mock = SharedMockProcessing::new();
        Fixture {
            sensors: SensorRegistry::new(),
            pins,
            board,
            storage: Storage::in_memory(),
            ledger: ErrorLedger::new(),
            poller: SensorPoller::new(Box::new(mock.clone())),
            mock,
        }
    }

    fn add_sensor(f: &mut Fixture, pin: u8, sensor_type: &str) {
        let msg = SensorConfigMsg {
            gpio: pin,
            sensor_type: sensor_type.to_string(),
            sensor_name: format!("S{pin}"),
            subzone_id: None,
            active: true,
            raw_mode: true,
            rom_code: None,
            i2c_address: None,
        };
        f.sensors
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
    }

    #[test]
    fn analog_cycle_processes_and_builds_payload() {
        let mut f = fixture();
        add_sensor(&mut f, 32, "analog_moisture");
        f.board.set_analog(32, 2048);

        let payloads =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 1_000, &scope());
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_eq!(p.pin, 32);
        assert_eq!(p.raw_value, 2048.0);
        assert!(p.valid);
        assert!((p.processed_value - 204.8).abs() < 1e-9);
        assert_eq!(f.sensors.get(32).unwrap().last_raw, Some(2048.0));
    }

    #[test]
    fn onewire_completes_after_conversion_time() {
        let mut f = fixture();
        add_sensor(&mut f, 4, "temperature_ds18b20");
        f.board.set_onewire_device(4, ROM, POR_SCRATCHPAD);

        let immediate =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 1_000, &scope());
        assert!(immediate.is_empty());
        assert_eq!(f.poller.pending_count(), 1);

        // Too early: conversion still running.
        let early = f
            .poller
            .tick(&mut f.sensors, &mut f.board, &mut f.ledger, 1_500, &scope());
        assert!(early.is_empty());

        let done = f
            .poller
            .tick(&mut f.sensors, &mut f.board, &mut f.ledger, 1_750, &scope());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].raw_value, 1360.0);
        assert_eq!(f.poller.pending_count(), 0);
        assert_eq!(f.sensors.get(4).unwrap().last_raw, Some(1360.0));
    }

    #[test]
    fn crc_failure_leaves_last_raw_untouched() {
        let mut f = fixture();
        add_sensor(&mut f, 4, "temperature_ds18b20");
        let mut bad = POR_SCRATCHPAD;
        bad[8] ^= 0xFF;
        f.board.set_onewire_device(4, ROM, bad);

        f.poller
            .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 0, &scope());
        let done = f
            .poller
            .tick(&mut f.sensors, &mut f.board, &mut f.ledger, 800, &scope());
        assert!(done.is_empty());
        assert_eq!(f.sensors.get(4).unwrap().last_raw, None);
        assert!(!f.ledger.is_empty());
    }

    #[test]
    fn failed_sensor_does_not_block_others() {
        let mut f = fixture();
        add_sensor(&mut f, 4, "temperature_ds18b20"); // no device → fails
        add_sensor(&mut f, 32, "analog");
        f.board.set_analog(32, 1000);

        let payloads =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 0, &scope());
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].pin, 32);
        assert!(!f.ledger.is_empty());
    }

    #[test]
    fn processing_failure_degrades_to_raw_only() {
        let mut f = fixture();
        add_sensor(&mut f, 32, "analog");
        f.board.set_analog(32, 777);
        f.mock.borrow_mut().fail_next(1);

        let payloads =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 0, &scope());
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert!(!p.valid);
        assert_eq!(p.raw_value, 777.0);
        assert_eq!(p.processed_value, 0.0);
        assert!(p.unit.is_empty());
        assert!(p.quality.is_empty());
    }

    #[test]
    fn processing_breaker_opens_after_three_failures() {
        let mut f = fixture();
        add_sensor(&mut f, 32, "analog");
        f.board.set_analog(32, 100);
        f.mock.borrow_mut().fail_next(10);

        for t in 0..3u64 {
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, t, &scope());
        }
        assert_eq!(f.poller.processing_breaker_state(), BreakerState::Open);

        // Breaker open: no processing attempt, still a raw publish.
        let before = f.mock.borrow_mut().requests.len();
        let payloads =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 10, &scope());
        assert_eq!(payloads.len(), 1);
        assert!(!payloads[0].valid);
        assert_eq!(f.mock.borrow_mut().requests.len(), before);
    }

    #[test]
    fn i2c_sensor_reads_via_bus() {
        let mut f = fixture();
        let msg = SensorConfigMsg {
            gpio: 16,
            sensor_type: "i2c-sht31".to_string(),
            sensor_name: "H1".to_string(),
            subzone_id: None,
            active: true,
            raw_mode: true,
            rom_code: None,
            i2c_address: None,
        };
        f.sensors
            .configure(&msg, &mut f.pins, &mut f.board, &mut f.storage, &mut f.ledger, 0)
            .unwrap();
        f.board.set_i2c_device(0x44, vec![0x61, 0xA8]);

        let payloads =
            f.poller
                .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 0, &scope());
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].raw_value, f64::from(0x61A8u16));
    }

    #[test]
    fn repeated_cycle_does_not_duplicate_pending() {
        let mut f = fixture();
        add_sensor(&mut f, 4, "temperature_ds18b20");
        f.board.set_onewire_device(4, ROM, POR_SCRATCHPAD);

        f.poller
            .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 0, &scope());
        f.poller
            .start_cycle(&mut f.sensors, &mut f.board, &ESP32, &mut f.ledger, 100, &scope());
        assert_eq!(f.poller.pending_count(), 1);
    }
}
