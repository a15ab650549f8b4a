//! MQTT topic construction and parsing.
//!
//! All node topics live under `<kaiser>/esp/<node_id>/...`; the kaiser
//! prefix changes on zone assignment, so the builder caches the joined
//! prefix and is rebuilt in place by [`TopicBuilder::set_kaiser`].
//! Broadcast topics live under the fixed `kaiser/broadcast/` root.

use crate::consts::TOPIC_MAX;

/// Server-wide emergency broadcast topic.
pub const BROADCAST_EMERGENCY: &str = "kaiser/broadcast/emergency";

/// Per-node topic factory with a cached `<kaiser>/esp/<node>` prefix.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    kaiser: String,
    node_id: String,
    prefix: String,
}

impl TopicBuilder {
    pub fn new(kaiser: &str, node_id: &str) -> Self {
        let mut builder = Self {
            kaiser: kaiser.to_string(),
            node_id: node_id.to_string(),
            prefix: String::new(),
        };
        builder.rebuild();
        builder
    }

    fn rebuild(&mut self) {
        self.prefix = format!("{}/esp/{}", self.kaiser, self.node_id);
        debug_assert!(self.prefix.len() + 32 <= TOPIC_MAX);
    }

    /// Swap the kaiser prefix (zone reassignment).
    pub fn set_kaiser(&mut self, kaiser: &str) {
        self.kaiser = kaiser.to_string();
        self.rebuild();
    }

    pub fn kaiser(&self) -> &str {
        &self.kaiser
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// `<kaiser>/esp/<node>` without a trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ─── Outbound ───────────────────────────────────────────────────

    pub fn will(&self) -> String {
        format!("{}/system/will", self.prefix)
    }

    pub fn heartbeat(&self) -> String {
        format!("{}/system/heartbeat", self.prefix)
    }

    pub fn config_response(&self) -> String {
        format!("{}/config_response", self.prefix)
    }

    pub fn zone_ack(&self) -> String {
        format!("{}/zone/ack", self.prefix)
    }

    pub fn subzone_ack(&self) -> String {
        format!("{}/subzone/ack", self.prefix)
    }

    pub fn system_alert(&self) -> String {
        format!("{}/system/alert", self.prefix)
    }

    pub fn sensor_data(&self, pin: u8) -> String {
        format!("{}/sensor/{}/data", self.prefix, pin)
    }

    pub fn actuator_response(&self, pin: u8) -> String {
        format!("{}/actuator/{}/response", self.prefix, pin)
    }

    pub fn actuator_status(&self, pin: u8) -> String {
        format!("{}/actuator/{}/status", self.prefix, pin)
    }

    pub fn actuator_alert(&self, pin: u8) -> String {
        format!("{}/actuator/{}/alert", self.prefix, pin)
    }

    // ─── Inbound ────────────────────────────────────────────────────

    /// Every filter the node must (re-)subscribe to on connect.
    pub fn subscriptions(&self) -> Vec<String> {
        let p = &self.prefix;
        vec![
            format!("{p}/config"),
            format!("{p}/system/command"),
            format!("{p}/actuator/+/command"),
            format!("{p}/actuator/emergency"),
            format!("{p}/zone/assign"),
            format!("{p}/subzone/assign"),
            format!("{p}/subzone/remove"),
            format!("{p}/sensor/+/command"),
            format!("{p}/system/heartbeat/ack"),
            BROADCAST_EMERGENCY.to_string(),
        ]
    }

    /// Strip the node prefix off an inbound topic.
    ///
    /// Returns the suffix (`config`, `actuator/4/command`, ...) or `None`
    /// when the topic does not belong to this node.
    pub fn suffix_of<'t>(&self, topic: &'t str) -> Option<&'t str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        rest.strip_prefix('/')
    }
}

/// Extract the pin segment out of `actuator/<pin>/command`-shaped suffixes.
pub fn pin_segment(suffix: &str) -> Option<u8> {
    let mut parts = suffix.split('/');
    let _kind = parts.next()?;
    parts.next()?.parse().ok()
}
