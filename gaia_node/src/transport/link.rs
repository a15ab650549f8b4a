//! Wire-level pub/sub link.
//!
//! The transport client is policy (breakers, backoff, offline buffer);
//! this module is mechanism. [`MqttLink`] hides the concrete client
//! library: production uses rumqttc's synchronous client, tests use
//! [`MockLink`] with scripted failures.

use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Packet};
use thiserror::Error;
use tracing::{debug, trace};

/// QoS level, decoupled from the client library's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Last-will registration passed at connect time.
#[derive(Debug, Clone)]
pub struct WillConfig {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
}

/// Message delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Asynchronous link notification.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Broker acknowledged the connection.
    Connected,
    /// Connection lost (or the pending attempt failed).
    Disconnected,
    /// Inbound publish.
    Message(InboundMessage),
}

/// Link-level failure.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Minimal pub/sub client surface the transport needs.
///
/// `connect` starts an attempt; the outcome arrives as a
/// [`LinkEvent::Connected`] / [`LinkEvent::Disconnected`] from `poll`.
pub trait MqttLink {
    fn connect(&mut self, will: &WillConfig) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError>;

    fn subscribe(&mut self, filter: &str, qos: QosLevel) -> Result<(), LinkError>;

    /// Drive the link and drain pending events. Must not block beyond a
    /// few milliseconds.
    fn poll(&mut self) -> Vec<LinkEvent>;
}

// ─── rumqttc backend ────────────────────────────────────────────────

fn to_rumqttc_qos(qos: QosLevel) -> rumqttc::QoS {
    match qos {
        QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Synchronous rumqttc client behind the link trait.
///
/// Clean sessions only: the broker forgets subscriptions on disconnect,
/// so the transport re-subscribes after every reconnect.
pub struct RumqttcLink {
    client_id: String,
    host: String,
    port: u16,
    keep_alive_s: u64,
    credentials: Option<(String, String)>,
    client: Option<Client>,
    connection: Option<Connection>,
    connected: bool,
}

impl RumqttcLink {
    pub fn new(
        client_id: &str,
        host: &str,
        port: u16,
        keep_alive_s: u64,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            host: host.to_string(),
            port,
            keep_alive_s,
            credentials,
            client: None,
            connection: None,
            connected: false,
        }
    }
}

impl MqttLink for RumqttcLink {
    fn connect(&mut self, will: &WillConfig) -> Result<(), LinkError> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_s));
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            &will.topic,
            will.payload.clone(),
            to_rumqttc_qos(will.qos),
            will.retain,
        ));
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, connection) = Client::new(options, 64);
        self.client = Some(client);
        self.connection = Some(connection);
        self.connected = false;
        debug!(host = %self.host, port = self.port, "mqtt connect started");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(client) = &self.client {
            let _ = client.disconnect();
        }
        self.client = None;
        self.connection = None;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError> {
        let client = self.client.as_ref().ok_or(LinkError::NotConnected)?;
        client
            .try_publish(topic, to_rumqttc_qos(qos), retain, payload)
            .map_err(|e| LinkError::PublishFailed(e.to_string()))
    }

    fn subscribe(&mut self, filter: &str, qos: QosLevel) -> Result<(), LinkError> {
        let client = self.client.as_ref().ok_or(LinkError::NotConnected)?;
        client
            .try_subscribe(filter, to_rumqttc_qos(qos))
            .map_err(|e| LinkError::SubscribeFailed(e.to_string()))
    }

    fn poll(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        let Some(connection) = self.connection.as_mut() else {
            return events;
        };

        // Bounded drain so one tick never starves the loop.
        for _ in 0..32 {
            match connection.recv_timeout(Duration::from_millis(5)) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    self.connected = true;
                    events.push(LinkEvent::Connected);
                }
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    trace!(topic = %publish.topic, "inbound publish");
                    events.push(LinkEvent::Message(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    }));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("mqtt connection error: {e}");
                    if self.connected {
                        events.push(LinkEvent::Disconnected);
                    }
                    self.connected = false;
                    break;
                }
                // Nothing pending.
                Err(_) => break,
            }
        }
        events
    }
}

// ─── Mock backend ───────────────────────────────────────────────────

/// Message captured by [`MockLink`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Scriptable in-memory link for tests and the `--sim` binary.
pub struct MockLink {
    connected: bool,
    /// Pending connect attempts refuse while > 0.
    refuse_connects: u32,
    /// Pending publishes fail while > 0.
    fail_publishes: u32,
    pub published: Vec<PublishedMessage>,
    pub subscriptions: Vec<String>,
    pub will: Option<WillConfig>,
    queued: VecDeque<LinkEvent>,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            connected: false,
            refuse_connects: 0,
            fail_publishes: 0,
            published: Vec::new(),
            subscriptions: Vec::new(),
            will: None,
            queued: VecDeque::new(),
        }
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_connects(&mut self, n: u32) {
        self.refuse_connects = n;
    }

    /// Fail the next `n` publishes.
    pub fn fail_publishes(&mut self, n: u32) {
        self.fail_publishes = n;
    }

    /// Simulate a broker-side disconnect.
    pub fn drop_link(&mut self) {
        if self.connected {
            self.connected = false;
            self.queued.push_back(LinkEvent::Disconnected);
        }
    }

    /// Inject an inbound message.
    pub fn inject(&mut self, topic: &str, payload: &str) {
        self.queued.push_back(LinkEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        }));
    }

    /// Messages published on one topic.
    pub fn published_on(&self, topic: &str) -> Vec<&PublishedMessage> {
        self.published.iter().filter(|m| m.topic == topic).collect()
    }

    pub fn clear_published(&mut self) {
        self.published.clear();
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttLink for MockLink {
    fn connect(&mut self, will: &WillConfig) -> Result<(), LinkError> {
        self.will = Some(will.clone());
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            return Err(LinkError::ConnectFailed("refused".to_string()));
        }
        self.connected = true;
        self.queued.push_back(LinkEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.fail_publishes > 0 {
            self.fail_publishes -= 1;
            return Err(LinkError::PublishFailed("scripted failure".to_string()));
        }
        self.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: QosLevel) -> Result<(), LinkError> {
        let _ = qos;
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        self.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn poll(&mut self) -> Vec<LinkEvent> {
        self.queued.drain(..).collect()
    }
}

/// Clonable handle around [`MockLink`] so a test can keep scripting the
/// link after handing it to the transport. Not thread-safe; the node
/// loop is single-threaded.
#[derive(Clone, Default)]
pub struct SharedMockLink(std::rc::Rc<std::cell::RefCell<MockLink>>);

impl SharedMockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the underlying mock for scripting or assertions.
    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, MockLink> {
        self.0.borrow_mut()
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, MockLink> {
        self.0.borrow()
    }
}

impl MqttLink for SharedMockLink {
    fn connect(&mut self, will: &WillConfig) -> Result<(), LinkError> {
        self.0.borrow_mut().connect(will)
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().disconnect();
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().is_connected()
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), LinkError> {
        self.0.borrow_mut().publish(topic, payload, qos, retain)
    }

    fn subscribe(&mut self, filter: &str, qos: QosLevel) -> Result<(), LinkError> {
        self.0.borrow_mut().subscribe(filter, qos)
    }

    fn poll(&mut self) -> Vec<LinkEvent> {
        self.0.borrow_mut().poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn will() -> WillConfig {
        WillConfig {
            topic: "god/esp/X/system/will".to_string(),
            payload: b"{}".to_vec(),
            qos: QosLevel::AtLeastOnce,
            retain: true,
        }
    }

    #[test]
    fn mock_connect_queues_event() {
        let mut link = MockLink::new();
        link.connect(&will()).unwrap();
        assert!(link.is_connected());
        let events = link.poll();
        assert!(matches!(events[0], LinkEvent::Connected));
        assert!(link.will.is_some());
    }

    #[test]
    fn mock_refuses_scripted_connects() {
        let mut link = MockLink::new();
        link.refuse_connects(2);
        assert!(link.connect(&will()).is_err());
        assert!(link.connect(&will()).is_err());
        assert!(link.connect(&will()).is_ok());
    }

    #[test]
    fn mock_publish_requires_connection() {
        let mut link = MockLink::new();
        let err = link
            .publish("t", b"x", QosLevel::AtMostOnce, false)
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }

    #[test]
    fn mock_drop_link_emits_disconnect() {
        let mut link = MockLink::new();
        link.connect(&will()).unwrap();
        link.poll();
        link.drop_link();
        let events = link.poll();
        assert!(matches!(events[0], LinkEvent::Disconnected));
        assert!(!link.is_connected());
    }

    #[test]
    fn mock_records_publishes_in_order() {
        let mut link = MockLink::new();
        link.connect(&will()).unwrap();
        link.publish("a", b"1", QosLevel::AtLeastOnce, false).unwrap();
        link.publish("b", b"2", QosLevel::AtLeastOnce, false).unwrap();
        assert_eq!(link.published.len(), 2);
        assert_eq!(link.published[0].topic, "a");
        assert_eq!(link.published[1].payload_str(), "2");
    }
}
