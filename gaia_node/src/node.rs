//! Node wiring — ownership of every subsystem and the loop itself.
//!
//! One `Node` value owns the clock, board, registries, transport and
//! safety controller; cross-component access happens by passing the
//! needed references into subsystem calls. No globals, no singletons.
//!
//! Boot order contract: the pin registry parks every pin in safe mode
//! before anything else touches hardware.

use gaia_common::clock::Clock;
use gaia_common::config::TimingConfig;
use gaia_common::consts::MAX_GPIO;
use gaia_common::error::{ErrorCode, Severity};
use gaia_common::payload::{
    ActuatorCommandMsg, ActuatorResponsePayload, ActuatorStatusPayload, AlertPayload,
    ConfigMessage, ConfigResponsePayload, ConfigStatus, HeartbeatAckMsg, HeartbeatPayload,
    SensorCommandMsg, SensorDataPayload, SubzoneAckPayload, SubzoneAssignMsg, SubzoneRemoveMsg,
    SystemCommandMsg, WillPayload, ZoneAckPayload, ZoneAssignMsg,
};
use gaia_common::topic::{BROADCAST_EMERGENCY, TopicBuilder};
use gaia_hal::board::Board;
use gaia_hal::profile::BoardProfile;
use gaia_hal::registry::PinRegistry;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actuator::driver::TickEvent;
use crate::actuator::ActuatorRegistry;
use crate::ledger::ErrorLedger;
use crate::router::{Route, route};
use crate::safety::SafetyController;
use crate::scheduler::{Cadences, WatchdogFeed};
use crate::sensor::poller::{MeasurementScope, SensorPoller};
use crate::sensor::processing::ProcessingClient;
use crate::sensor::SensorRegistry;
use crate::storage::{NS_SUBZONE, NS_WIFI, NS_ZONE, Storage};
use crate::system::{ShutdownRequest, SystemState};
use crate::transport::link::{InboundMessage, MqttLink, QosLevel, WillConfig};
use crate::transport::TransportClient;

/// The edge controller core.
pub struct Node {
    clock: Box<dyn Clock>,
    board: Box<dyn Board>,
    profile: BoardProfile,
    pins: PinRegistry,
    storage: Storage,
    ledger: ErrorLedger,
    transport: TransportClient,
    sensors: SensorRegistry,
    poller: SensorPoller,
    actuators: ActuatorRegistry,
    safety: SafetyController,
    system: SystemState,
    topics: TopicBuilder,
    cadences: Cadences,
    watchdog: Option<WatchdogFeed>,
}

impl Node {
    /// Boot the node: pins to safe mode first, then identity, persisted
    /// configuration, and the transport.
    pub fn new(
        clock: Box<dyn Clock>,
        mut board: Box<dyn Board>,
        profile: BoardProfile,
        mut storage: Storage,
        link: Box<dyn MqttLink>,
        processing: Box<dyn ProcessingClient>,
        timing: &TimingConfig,
    ) -> Self {
        let boot_ms = clock.monotonic_ms();
        let mut ledger = ErrorLedger::new();

        // GPIO safe-mode initialization is the very first operation.
        let mut pins = PinRegistry::new(profile.clone());
        let report = pins.init_all_safe(board.as_mut());
        for pin in &report.mismatches {
            ledger.track(
                boot_ms,
                ErrorCode::PIN_STATE_MISMATCH,
                Severity::Warning,
                &format!("boot readback mismatch on pin {pin}"),
            );
        }

        let system = SystemState::load(&mut storage, board.mac_address(), clock.epoch_s());
        let topics = TopicBuilder::new(&system.kaiser_id, &system.node_id);

        let mut sensors = SensorRegistry::new();
        sensors.load_persisted(&mut pins, board.as_mut(), &mut storage, &mut ledger, boot_ms);
        let mut actuators = ActuatorRegistry::new();
        actuators.load_persisted(&mut pins, board.as_mut(), &mut storage, &mut ledger, boot_ms);
        load_subzones(&mut pins, &mut storage, board.as_mut());

        let will = WillConfig {
            topic: topics.will(),
            payload: serde_json::to_vec(&WillPayload::offline(clock.epoch_s()))
                .unwrap_or_default(),
            qos: QosLevel::AtLeastOnce,
            retain: true,
        };
        let transport = TransportClient::new(link, will, topics.subscriptions());

        info!(node_id = %system.node_id, "node core initialized");
        Self {
            clock,
            board,
            profile,
            pins,
            storage,
            ledger,
            transport,
            sensors,
            poller: SensorPoller::new(processing),
            actuators,
            safety: SafetyController::new(),
            system,
            topics,
            cadences: Cadences::from_timing(timing),
            watchdog: None,
        }
    }

    /// Install the external watchdog feed; invoked once per iteration.
    pub fn set_watchdog(&mut self, feed: WatchdogFeed) {
        self.watchdog = Some(feed);
    }

    // ─── Accessors (telemetry and tests) ────────────────────────────

    pub fn system(&self) -> &SystemState {
        &self.system
    }

    pub fn safety(&self) -> &SafetyController {
        &self.safety
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn pins(&self) -> &PinRegistry {
        &self.pins
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    pub fn actuators(&self) -> &ActuatorRegistry {
        &self.actuators
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    pub fn shutdown_requested(&self) -> Option<ShutdownRequest> {
        self.system.shutdown
    }

    // ─── The loop ───────────────────────────────────────────────────

    /// Run until a shutdown is requested or `running` goes false.
    ///
    /// On the way out every pin reverts to the high-impedance safe
    /// state, outputs first.
    pub fn run(&mut self, running: &std::sync::atomic::AtomicBool) {
        use std::sync::atomic::Ordering;
        while running.load(Ordering::SeqCst) && self.system.shutdown.is_none() {
            self.tick();
            if let Some(feed) = self.watchdog.as_mut() {
                feed();
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        self.pins.enable_safe_mode_all(self.board.as_mut());
        info!("node loop exited, pins parked safe");
    }

    /// One cooperative iteration.
    pub fn tick(&mut self) {
        let now = self.clock.monotonic_ms();

        // Transport first: drive the link, then handle what arrived.
        let inbound = self.transport.tick(now, &mut self.ledger);
        for msg in inbound {
            self.dispatch(msg);
        }

        // Actuator loop: valve motion, runtime accounting, timed runs.
        let events = self.actuators.tick_all(self.board.as_mut(), now);
        for outcome in events {
            self.publish_tick_event(outcome.pin, outcome.event);
        }

        self.safety.tick();

        if self.system.operational() {
            let scope = self.scope();
            let done =
                self.poller
                    .tick(&mut self.sensors, self.board.as_mut(), &mut self.ledger, now, &scope);
            for payload in done {
                self.publish_sensor_data(payload);
            }

            if self.cadences.measurement.tick(now) {
                let payloads = self.poller.start_cycle(
                    &mut self.sensors,
                    self.board.as_mut(),
                    &self.profile,
                    &mut self.ledger,
                    now,
                    &scope,
                );
                for payload in payloads {
                    self.publish_sensor_data(payload);
                }
            }
        }

        if self.cadences.heartbeat.due(now) {
            self.publish_heartbeat(false);
        }

        if self.cadences.health.tick(now) {
            self.log_health();
        }

        if self.cadences.actuator_status.tick(now) {
            self.publish_all_status();
        }
    }

    /// Override the measurement cadence (server reconfiguration).
    pub fn set_measurement_interval(&mut self, period_ms: u64) {
        self.cadences.measurement.set_period(period_ms);
    }

    // ─── Dispatch ───────────────────────────────────────────────────

    fn dispatch(&mut self, msg: InboundMessage) {
        let now = self.clock.monotonic_ms();

        if msg.topic == BROADCAST_EMERGENCY {
            self.handle_emergency("broadcast_emergency", now);
            return;
        }
        let Some(suffix) = self.topics.suffix_of(&msg.topic).map(str::to_string) else {
            debug!(topic = %msg.topic, "foreign topic ignored");
            return;
        };

        match route(&suffix) {
            Route::Config => self.handle_config(&msg.payload, now),
            Route::SystemCommand => self.handle_system_command(&msg.payload, now),
            Route::ActuatorCommand(pin) => self.handle_actuator_command(pin, &msg.payload, now),
            Route::ActuatorEmergency => self.handle_emergency("emergency_topic", now),
            Route::ZoneAssign => self.handle_zone_assign(&msg.payload, now),
            Route::SubzoneAssign => self.handle_subzone_assign(&msg.payload, now),
            Route::SubzoneRemove => self.handle_subzone_remove(&msg.payload, now),
            Route::SensorCommand(pin) => self.handle_sensor_command(pin, &msg.payload, now),
            Route::HeartbeatAck => self.handle_heartbeat_ack(&msg.payload, now),
            Route::Malformed => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_TOPIC,
                    Severity::Warning,
                    &format!("bad pin segment in '{suffix}'"),
                );
            }
            Route::Unknown => {
                info!(topic = %suffix, "unhandled topic dropped");
            }
        }
    }

    fn handle_config(&mut self, payload: &[u8], now: u64) {
        let msg: ConfigMessage = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("config payload: {e}"),
                );
                let response = ConfigResponsePayload {
                    status: "error".to_string(),
                    item_type: "config".to_string(),
                    count: 0,
                    message: format!("invalid JSON: {e}"),
                    error_code: Some(ErrorCode::INVALID_PAYLOAD.0),
                    failed_item: None,
                };
                self.publish(&self.topics.config_response(), &response, QosLevel::AtLeastOnce);
                return;
            }
        };

        if !msg.sensors.is_empty() {
            let mut ok = 0usize;
            for sensor in &msg.sensors {
                match self.sensors.configure(
                    sensor,
                    &mut self.pins,
                    self.board.as_mut(),
                    &mut self.storage,
                    &mut self.ledger,
                    now,
                ) {
                    Ok(()) => ok += 1,
                    Err(fault) => {
                        let response = ConfigResponsePayload {
                            status: "error".to_string(),
                            item_type: "sensor".to_string(),
                            count: ok,
                            message: fault.message.clone(),
                            error_code: Some(fault.code.0),
                            failed_item: Some(format!("gpio {}", sensor.gpio)),
                        };
                        self.publish(
                            &self.topics.config_response(),
                            &response,
                            QosLevel::AtLeastOnce,
                        );
                    }
                }
            }
            if ok > 0 {
                let response = ConfigResponsePayload {
                    status: "success".to_string(),
                    item_type: "sensor".to_string(),
                    count: ok,
                    message: format!("Configured {ok} sensor(s) successfully"),
                    error_code: None,
                    failed_item: None,
                };
                self.publish(&self.topics.config_response(), &response, QosLevel::AtLeastOnce);
            }
        }

        if !msg.actuators.is_empty() {
            let mut ok = 0usize;
            for actuator in &msg.actuators {
                match self.actuators.configure(
                    actuator,
                    &mut self.pins,
                    self.board.as_mut(),
                    &mut self.storage,
                    &mut self.ledger,
                    now,
                ) {
                    Ok(()) => ok += 1,
                    Err(fault) => {
                        let response = ConfigResponsePayload {
                            status: "error".to_string(),
                            item_type: "actuator".to_string(),
                            count: ok,
                            message: fault.message.clone(),
                            error_code: Some(fault.code.0),
                            failed_item: Some(format!("gpio {}", actuator.gpio)),
                        };
                        self.publish(
                            &self.topics.config_response(),
                            &response,
                            QosLevel::AtLeastOnce,
                        );
                    }
                }
            }
            if ok > 0 {
                let response = ConfigResponsePayload {
                    status: "success".to_string(),
                    item_type: "actuator".to_string(),
                    count: ok,
                    message: format!("Configured {ok} actuator(s) successfully"),
                    error_code: None,
                    failed_item: None,
                };
                self.publish(&self.topics.config_response(), &response, QosLevel::AtLeastOnce);
            }
        }
    }

    fn handle_actuator_command(&mut self, pin: u8, payload: &[u8], now: u64) {
        if !self.system.operational() {
            self.ledger.track(
                now,
                ErrorCode::NOT_APPROVED,
                Severity::Warning,
                &format!("actuator command on gpio {pin} suppressed (not approved)"),
            );
            return;
        }
        let msg: ActuatorCommandMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("actuator command payload: {e}"),
                );
                return;
            }
        };

        let outcome = self
            .actuators
            .handle_command(pin, &msg, self.board.as_mut(), now);

        // Response strictly after the hardware change (or rejection).
        let response = ActuatorResponsePayload {
            esp_id: self.system.node_id.clone(),
            zone_id: self.system.zone_id.clone(),
            ts: self.clock.epoch_s(),
            pin,
            command: outcome.command.clone(),
            value: outcome.value,
            duration: outcome.duration,
            success: outcome.success,
            message: outcome.message.clone(),
        };
        self.publish(&self.topics.actuator_response(pin), &response, QosLevel::AtLeastOnce);

        if let Some(reason) = outcome.alert_reason {
            self.publish_alert(Some(pin), reason, &outcome.message);
        }
        if outcome.success {
            self.publish_status_for(pin);
        }
    }

    fn handle_emergency(&mut self, source: &str, now: u64) {
        let stopped =
            self.safety
                .emergency_stop_all(source, &mut self.actuators, self.board.as_mut(), now);
        if !stopped {
            return;
        }
        // Each actuator reports its own transition.
        let pins: Vec<u8> = self.actuators.iter().map(|r| r.pin()).collect();
        for pin in pins {
            self.publish_alert(Some(pin), "emergency_stop", source);
        }
    }

    fn handle_system_command(&mut self, payload: &[u8], now: u64) {
        let msg: SystemCommandMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("system command payload: {e}"),
                );
                return;
            }
        };

        match msg.command.as_str() {
            "factory_reset" => {
                if !msg.confirm {
                    warn!("factory reset without confirm=true ignored");
                    return;
                }
                info!("factory reset: clearing provisioning and zone state");
                let _ = self.storage.erase_namespace(NS_WIFI);
                let _ = self.storage.erase_namespace(NS_ZONE);
                self.system.shutdown = Some(ShutdownRequest::FactoryReset);
            }
            "restart" => {
                info!("restart requested by the server");
                self.system.shutdown = Some(ShutdownRequest::Restart);
            }
            "status" => self.publish_heartbeat(true),
            "set_interval" => match msg.interval_ms {
                Some(interval) if interval > 0 => {
                    info!(interval, "measurement cadence reconfigured");
                    self.set_measurement_interval(interval);
                }
                _ => {
                    self.ledger.track(
                        now,
                        ErrorCode::INVALID_PAYLOAD,
                        Severity::Warning,
                        "set_interval requires interval_ms > 0",
                    );
                }
            },
            "clear_emergency" => {
                let result = self.safety.clear_emergency(
                    &mut self.actuators,
                    &self.pins,
                    self.board.as_ref(),
                    now,
                );
                if let Err(failed) = result {
                    self.publish_alert(
                        None,
                        "verification_failed",
                        &format!("checks not passed: {failed:?}"),
                    );
                }
            }
            other => {
                self.ledger.track(
                    now,
                    ErrorCode::UNKNOWN_COMMAND,
                    Severity::Warning,
                    &format!("unknown system command '{other}'"),
                );
            }
        }
    }

    fn handle_zone_assign(&mut self, payload: &[u8], now: u64) {
        let msg: ZoneAssignMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("zone assign payload: {e}"),
                );
                return;
            }
        };

        self.system.assign_zone(
            &msg.zone_id,
            &msg.master_zone_id,
            &msg.zone_name,
            msg.kaiser_id.as_deref(),
            &mut self.storage,
            &mut self.ledger,
            now,
        );
        self.topics.set_kaiser(&self.system.kaiser_id);

        // Live subscriptions stay on the old prefix until the next
        // reconnect; the will and subscription set are staged now.
        self.transport.set_subscriptions(self.topics.subscriptions());
        self.transport.set_will(WillConfig {
            topic: self.topics.will(),
            payload: serde_json::to_vec(&WillPayload::offline(self.clock.epoch_s()))
                .unwrap_or_default(),
            qos: QosLevel::AtLeastOnce,
            retain: true,
        });

        let ack = ZoneAckPayload {
            status: "ok".to_string(),
            zone_id: self.system.zone_id.clone(),
            kaiser_id: self.system.kaiser_id.clone(),
        };
        self.publish(&self.topics.zone_ack(), &ack, QosLevel::AtLeastOnce);
        self.publish_heartbeat(true);
    }

    fn handle_subzone_assign(&mut self, payload: &[u8], now: u64) {
        let msg: SubzoneAssignMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("subzone assign payload: {e}"),
                );
                return;
            }
        };

        if !msg.parent_zone_id.is_empty()
            && self.system.zone_assigned()
            && msg.parent_zone_id != self.system.zone_id
        {
            let ack = SubzoneAckPayload {
                status: "error".to_string(),
                subzone_id: msg.subzone_id.clone(),
                message: format!(
                    "parent zone '{}' does not match assigned zone '{}'",
                    msg.parent_zone_id, self.system.zone_id
                ),
            };
            self.publish(&self.topics.subzone_ack(), &ack, QosLevel::AtLeastOnce);
            return;
        }

        self.pins
            .define_subzone(&msg.subzone_id, &msg.name, &msg.parent_zone_id);
        let mut failures = Vec::new();
        for &pin in &msg.pins {
            if pin > MAX_GPIO {
                failures.push(format!("pin {pin} out of range"));
                continue;
            }
            if let Err(e) = self
                .pins
                .assign_to_subzone(pin, &msg.subzone_id, self.board.as_mut())
            {
                self.ledger
                    .track(now, e.code(), Severity::Warning, &e.to_string());
                failures.push(e.to_string());
            }
        }
        self.persist_subzones(now);

        let ack = if failures.is_empty() {
            SubzoneAckPayload {
                status: "ok".to_string(),
                subzone_id: msg.subzone_id.clone(),
                message: format!("{} pin(s) assigned", msg.pins.len()),
            }
        } else {
            SubzoneAckPayload {
                status: "error".to_string(),
                subzone_id: msg.subzone_id.clone(),
                message: failures.join("; "),
            }
        };
        self.publish(&self.topics.subzone_ack(), &ack, QosLevel::AtLeastOnce);
    }

    fn handle_subzone_remove(&mut self, payload: &[u8], now: u64) {
        let msg: SubzoneRemoveMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("subzone remove payload: {e}"),
                );
                return;
            }
        };

        let result = self.pins.remove_subzone(&msg.subzone_id);
        let ack = match result {
            Ok(()) => {
                self.persist_subzones(now);
                SubzoneAckPayload {
                    status: "ok".to_string(),
                    subzone_id: msg.subzone_id.clone(),
                    message: "subzone removed".to_string(),
                }
            }
            Err(e) => SubzoneAckPayload {
                status: "error".to_string(),
                subzone_id: msg.subzone_id.clone(),
                message: e.to_string(),
            },
        };
        self.publish(&self.topics.subzone_ack(), &ack, QosLevel::AtLeastOnce);
    }

    fn handle_sensor_command(&mut self, pin: u8, payload: &[u8], now: u64) {
        let msg: SensorCommandMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("sensor command payload: {e}"),
                );
                return;
            }
        };

        match msg.command.to_ascii_lowercase().as_str() {
            "remove" => {
                if let Err(fault) = self.sensors.remove(
                    pin,
                    &mut self.pins,
                    self.board.as_mut(),
                    &mut self.storage,
                ) {
                    self.ledger
                        .track(now, fault.code, Severity::Warning, &fault.message);
                }
            }
            "read" => {
                if !self.system.operational() {
                    self.ledger.track(
                        now,
                        ErrorCode::NOT_APPROVED,
                        Severity::Warning,
                        "sensor read suppressed (not approved)",
                    );
                    return;
                }
                let scope = self.scope();
                if let Some(payload) = self.poller.read_single(
                    &mut self.sensors,
                    pin,
                    self.board.as_mut(),
                    &self.profile,
                    &mut self.ledger,
                    now,
                    &scope,
                ) {
                    self.publish_sensor_data(payload);
                }
            }
            other => {
                self.ledger.track(
                    now,
                    ErrorCode::UNKNOWN_COMMAND,
                    Severity::Warning,
                    &format!("unknown sensor command '{other}'"),
                );
            }
        }
    }

    fn handle_heartbeat_ack(&mut self, payload: &[u8], now: u64) {
        let msg: HeartbeatAckMsg = match serde_json::from_slice(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.ledger.track(
                    now,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("heartbeat ack payload: {e}"),
                );
                return;
            }
        };
        self.system.apply_heartbeat_ack(
            &msg.status,
            msg.server_time,
            &mut self.storage,
            &mut self.ledger,
            now,
        );
    }

    // ─── Publication ────────────────────────────────────────────────

    fn publish<T: Serialize>(&mut self, topic: &str, payload: &T, qos: QosLevel) -> bool {
        let now = self.clock.monotonic_ms();
        self.transport
            .publish_json(now, topic, payload, qos, &mut self.ledger)
    }

    fn publish_sensor_data(&mut self, payload: SensorDataPayload) {
        let topic = self.topics.sensor_data(payload.pin);
        self.publish(&topic, &payload, QosLevel::AtLeastOnce);
    }

    fn publish_alert(&mut self, pin: Option<u8>, reason: &str, message: &str) {
        let alert = AlertPayload {
            esp_id: self.system.node_id.clone(),
            zone_id: self.system.zone_id.clone(),
            ts: self.clock.epoch_s(),
            pin,
            reason: reason.to_string(),
            message: message.to_string(),
        };
        let topic = match pin {
            Some(pin) => self.topics.actuator_alert(pin),
            None => self.topics.system_alert(),
        };
        self.publish(&topic, &alert, QosLevel::AtLeastOnce);
    }

    fn publish_status_for(&mut self, pin: u8) {
        let now = self.clock.monotonic_ms();
        let Some(record) = self.actuators.get(pin) else {
            return;
        };
        let config = record.driver.config();
        let status = record.driver.status(now);
        let payload = ActuatorStatusPayload {
            esp_id: self.system.node_id.clone(),
            zone_id: self.system.zone_id.clone(),
            subzone_id: config.subzone_id.clone(),
            ts: self.clock.epoch_s(),
            pin,
            kind: config.kind_raw.clone(),
            state: status.state,
            pwm: status.level,
            runtime_ms: status.runtime_ms,
            emergency: status.emergency,
        };
        let topic = self.topics.actuator_status(pin);
        self.publish(&topic, &payload, QosLevel::AtLeastOnce);
    }

    /// Periodic status for every actuator, commands or not.
    pub fn publish_all_status(&mut self) {
        let pins: Vec<u8> = self.actuators.iter().map(|r| r.pin()).collect();
        for pin in pins {
            self.publish_status_for(pin);
        }
    }

    fn publish_tick_event(&mut self, pin: u8, event: TickEvent) {
        match event {
            TickEvent::AutoStopped { reason } => {
                self.publish_alert(Some(pin), reason, "output forced off");
                self.publish_status_for(pin);
            }
            TickEvent::MotionComplete { .. } => {
                self.publish_status_for(pin);
            }
        }
    }

    /// Heartbeat publish. Normal calls respect the cadence throttle;
    /// `force` bypasses it.
    pub fn publish_heartbeat(&mut self, force: bool) {
        let now = self.clock.monotonic_ms();
        if !force && !self.cadences.heartbeat.due(now) {
            return;
        }
        let epoch = self.clock.epoch_s();
        let payload = HeartbeatPayload {
            esp_id: self.system.node_id.clone(),
            zone_id: self.system.zone_id.clone(),
            master_zone_id: self.system.master_zone_id.clone(),
            zone_assigned: self.system.zone_assigned(),
            ts: epoch,
            uptime_s: self.system.uptime_s(epoch),
            heap_free: self.board.heap_free(),
            link_rssi: self.board.link_rssi(),
            sensor_count: self.sensors.len(),
            actuator_count: self.actuators.len(),
            config_status: ConfigStatus {
                state: self.system.run_state.as_str().to_string(),
                approved: self.system.approved,
                sensors: self.sensors.len(),
                actuators: self.actuators.len(),
                subzones: self.pins.subzone_count(),
                storage_ok: self.system.storage_ok,
            },
        };
        let topic = self.topics.heartbeat();
        self.publish(&topic, &payload, QosLevel::AtMostOnce);
        self.cadences.heartbeat.fire(now);
    }

    fn log_health(&mut self) {
        info!(
            state = self.system.run_state.as_str(),
            connected = self.transport.is_connected(),
            offline_backlog = self.transport.offline_len(),
            errors = self.ledger.len(),
            heap_free = self.board.heap_free(),
            "health"
        );
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn scope(&self) -> MeasurementScope {
        MeasurementScope {
            esp_id: self.system.node_id.clone(),
            zone_id: self.system.zone_id.clone(),
            epoch_s: self.clock.epoch_s(),
        }
    }

    fn persist_subzones(&mut self, now: u64) {
        let subzones: Vec<_> = self
            .pins
            .subzones()
            .map(|s| {
                (
                    s.id.clone(),
                    s.name.clone(),
                    s.parent_zone_id.clone(),
                    s.pins.clone(),
                )
            })
            .collect();
        let result = self.storage.begin(NS_SUBZONE, false).and_then(|mut session| {
            session.clear()?;
            let ids: Vec<&str> = subzones.iter().map(|s| s.0.as_str()).collect();
            session.put_string("sz_ids", &ids.join(","))?;
            session.put_u8("sz_count", subzones.len() as u8)?;
            for (i, (id, name, parent, pins)) in subzones.iter().enumerate() {
                session.put_string(&format!("sz_{i}_id"), id)?;
                session.put_string(&format!("sz_{i}_name"), name)?;
                session.put_string(&format!("sz_{i}_parent"), parent)?;
                let csv: Vec<String> = pins.iter().map(u8::to_string).collect();
                session.put_string(&format!("sz_{i}_pins"), &csv.join(","))?;
            }
            session.commit()
        });
        if let Err(e) = result {
            self.ledger.track(
                now,
                e.code(),
                Severity::Error,
                &format!("subzone persist: {e}"),
            );
        }
    }
}

/// Rebuild subzone grouping from storage at boot.
fn load_subzones(pins: &mut PinRegistry, storage: &mut Storage, board: &mut dyn Board) {
    let Ok(session) = storage.begin(NS_SUBZONE, true) else {
        return;
    };
    let count = session.get_u8("sz_count", 0) as usize;
    let entries: Vec<(String, String, String, String)> = (0..count)
        .map(|i| {
            (
                session.get_string(&format!("sz_{i}_id"), ""),
                session.get_string(&format!("sz_{i}_name"), ""),
                session.get_string(&format!("sz_{i}_parent"), ""),
                session.get_string(&format!("sz_{i}_pins"), ""),
            )
        })
        .collect();
    drop(session);

    for (id, name, parent, pins_csv) in entries {
        if id.is_empty() {
            continue;
        }
        pins.define_subzone(&id, &name, &parent);
        for pin in pins_csv.split(',').filter_map(|p| p.parse::<u8>().ok()) {
            let _ = pins.assign_to_subzone(pin, &id, board);
        }
    }
}
