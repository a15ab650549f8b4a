//! Transport client — connection policy over the pub/sub link.
//!
//! Owns the offline buffer and both circuit breakers. The link breaker
//! gates connection attempts (with exponential backoff), the transport
//! breaker gates publishes. Clean sessions mean the broker forgets
//! subscriptions on disconnect, so the full set is re-issued after every
//! reconnect, then the offline buffer drains in enqueue order.

pub mod link;

use gaia_common::consts::{
    BACKOFF_BASE_MS, BACKOFF_CAP_MS, CONNECT_TIMEOUT_MS, MAX_RECONNECT_ATTEMPTS,
    OFFLINE_QUEUE_CAP,
};
use gaia_common::error::{ErrorCode, Severity};
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::ledger::ErrorLedger;
use link::{InboundMessage, LinkEvent, MqttLink, QosLevel, WillConfig};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting { started_ms: u64 },
    Connected,
}

/// Publish buffered while the broker is unreachable.
#[derive(Debug, Clone)]
pub struct OfflineMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub enqueued_monotonic: u64,
}

/// Pub/sub client with last-will, bounded offline buffer and reconnect.
pub struct TransportClient {
    link: Box<dyn MqttLink>,
    state: ConnState,
    will: WillConfig,
    subscriptions: Vec<String>,
    link_breaker: CircuitBreaker,
    transport_breaker: CircuitBreaker,
    offline: heapless::Deque<OfflineMessage, OFFLINE_QUEUE_CAP>,
    /// Failed attempts in the current reconnect session.
    attempts: u32,
    /// Earliest monotonic time for the next connect attempt.
    next_attempt_ms: u64,
}

impl TransportClient {
    pub fn new(link: Box<dyn MqttLink>, will: WillConfig, subscriptions: Vec<String>) -> Self {
        Self {
            link,
            state: ConnState::Disconnected,
            will,
            subscriptions,
            link_breaker: CircuitBreaker::new(BreakerConfig::LINK),
            transport_breaker: CircuitBreaker::new(BreakerConfig::TRANSPORT),
            offline: heapless::Deque::new(),
            attempts: 0,
            next_attempt_ms: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn offline_len(&self) -> usize {
        self.offline.len()
    }

    pub fn link_breaker_state(&self) -> BreakerState {
        self.link_breaker.state()
    }

    pub fn transport_breaker_state(&self) -> BreakerState {
        self.transport_breaker.state()
    }

    /// Replace the last-will registration (identity or zone changed).
    /// Takes effect on the next connect.
    pub fn set_will(&mut self, will: WillConfig) {
        self.will = will;
    }

    /// Replace the subscription set. Applied on the next (re)connect —
    /// live subscriptions are not migrated.
    pub fn set_subscriptions(&mut self, subscriptions: Vec<String>) {
        self.subscriptions = subscriptions;
    }

    /// Drive the link once: drain events, time out stalled connects,
    /// run the reconnect policy. Returns inbound messages in order.
    pub fn tick(&mut self, now_ms: u64, ledger: &mut ErrorLedger) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();

        for event in self.link.poll() {
            match event {
                LinkEvent::Connected => self.on_connected(now_ms),
                LinkEvent::Disconnected => self.on_disconnected(now_ms, ledger),
                LinkEvent::Message(msg) => inbound.push(msg),
            }
        }

        if let ConnState::Connecting { started_ms } = self.state {
            if now_ms.saturating_sub(started_ms) >= CONNECT_TIMEOUT_MS {
                warn!("mqtt connect timed out");
                self.state = ConnState::Disconnected;
                self.register_attempt_failure(now_ms, ledger, "connect timeout");
            }
        }

        if self.state == ConnState::Disconnected {
            self.try_reconnect(now_ms, ledger);
        }

        inbound
    }

    /// Publish, degrading in order:
    ///
    /// 1. transport breaker denies → drop (no enqueue), false.
    /// 2. not connected → record failure, enqueue, false.
    /// 3. send; failure → record failure, enqueue, false.
    pub fn publish(
        &mut self,
        now_ms: u64,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        ledger: &mut ErrorLedger,
    ) -> bool {
        if !self.transport_breaker.allow_request(now_ms) {
            return false;
        }

        if self.state != ConnState::Connected {
            self.transport_breaker.record_failure(now_ms);
            self.enqueue(now_ms, topic, payload, qos, ledger);
            return false;
        }

        match self.link.publish(topic, payload, qos, false) {
            Ok(()) => {
                self.transport_breaker.record_success(now_ms);
                true
            }
            Err(e) => {
                self.transport_breaker.record_failure(now_ms);
                ledger.track(
                    now_ms,
                    ErrorCode::MQTT_PUBLISH_FAILED,
                    Severity::Warning,
                    &format!("publish to {topic} failed: {e}"),
                );
                self.enqueue(now_ms, topic, payload, qos, ledger);
                false
            }
        }
    }

    /// Convenience wrapper for JSON payloads.
    pub fn publish_json(
        &mut self,
        now_ms: u64,
        topic: &str,
        payload: &impl serde::Serialize,
        qos: QosLevel,
        ledger: &mut ErrorLedger,
    ) -> bool {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.publish(now_ms, topic, &bytes, qos, ledger),
            Err(e) => {
                ledger.track(
                    now_ms,
                    ErrorCode::INVALID_PAYLOAD,
                    Severity::Error,
                    &format!("serialize for {topic} failed: {e}"),
                );
                false
            }
        }
    }

    // ─── Connection lifecycle ───────────────────────────────────────

    fn on_connected(&mut self, now_ms: u64) {
        info!("mqtt connected");
        self.state = ConnState::Connected;
        self.attempts = 0;
        self.next_attempt_ms = now_ms;
        self.link_breaker.record_success(now_ms);

        // Clean session: the broker forgot everything, re-subscribe.
        for filter in self.subscriptions.clone() {
            if let Err(e) = self.link.subscribe(&filter, QosLevel::AtLeastOnce) {
                warn!("re-subscribe {filter} failed: {e}");
            }
        }

        self.drain_offline(now_ms);
    }

    fn on_disconnected(&mut self, now_ms: u64, ledger: &mut ErrorLedger) {
        match self.state {
            ConnState::Connected => {
                warn!("mqtt connection lost");
                self.state = ConnState::Disconnected;
                // Fresh session: first retry is immediate.
                self.attempts = 0;
                self.next_attempt_ms = now_ms;
            }
            ConnState::Connecting { .. } => {
                self.state = ConnState::Disconnected;
                self.register_attempt_failure(now_ms, ledger, "broker refused connection");
            }
            ConnState::Disconnected => {}
        }
    }

    fn try_reconnect(&mut self, now_ms: u64, ledger: &mut ErrorLedger) {
        // Once the breaker is involved it replaces the backoff schedule:
        // OPEN denies by itself, and the HALF_OPEN probe must go out
        // immediately.
        let breaker_gates = self.link_breaker.state() != BreakerState::Closed;
        if !breaker_gates && now_ms < self.next_attempt_ms {
            return;
        }
        // Past the per-session attempt budget only breaker probes retry.
        if self.attempts >= MAX_RECONNECT_ATTEMPTS
            && self.link_breaker.state() == BreakerState::Closed
        {
            return;
        }
        if !self.link_breaker.allow_request(now_ms) {
            return;
        }

        debug!(attempt = self.attempts + 1, "mqtt connecting");
        match self.link.connect(&self.will) {
            Ok(()) => {
                self.state = ConnState::Connecting {
                    started_ms: now_ms,
                };
            }
            Err(e) => {
                self.register_attempt_failure(now_ms, ledger, &e.to_string());
            }
        }
    }

    fn register_attempt_failure(&mut self, now_ms: u64, ledger: &mut ErrorLedger, reason: &str) {
        self.link_breaker.record_failure(now_ms);
        self.attempts = self.attempts.saturating_add(1);
        let exp = self.attempts.saturating_sub(1).min(6);
        let delay = (BACKOFF_BASE_MS << exp).min(BACKOFF_CAP_MS);
        self.next_attempt_ms = now_ms + delay;
        ledger.track(
            now_ms,
            ErrorCode::MQTT_CONNECT_FAILED,
            Severity::Warning,
            &format!("connect attempt {} failed: {reason}", self.attempts),
        );
    }

    // ─── Offline buffer ─────────────────────────────────────────────

    fn enqueue(
        &mut self,
        now_ms: u64,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        ledger: &mut ErrorLedger,
    ) {
        let msg = OfflineMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            enqueued_monotonic: now_ms,
        };
        if self.offline.push_back(msg).is_err() {
            ledger.track(
                now_ms,
                ErrorCode::MQTT_BUFFER_FULL,
                Severity::Warning,
                "offline buffer full, dropping newest message",
            );
        }
    }

    /// Replay buffered messages in enqueue order; stop at the first
    /// failure to preserve ordering.
    fn drain_offline(&mut self, now_ms: u64) {
        let backlog = self.offline.len();
        if backlog == 0 {
            return;
        }
        info!(backlog, "draining offline buffer");
        while let Some(msg) = self.offline.pop_front() {
            match self.link.publish(&msg.topic, &msg.payload, msg.qos, false) {
                Ok(()) => {
                    self.transport_breaker.record_success(now_ms);
                }
                Err(e) => {
                    warn!("offline drain stopped: {e}");
                    self.transport_breaker.record_failure(now_ms);
                    // Put it back; order is preserved.
                    let _ = self.offline.push_front(msg);
                    break;
                }
            }
        }
    }
}
