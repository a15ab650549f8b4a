//! Wire payload schemas.
//!
//! Every object the node reads from or writes to the broker (and the
//! out-of-band processing channel) is defined here as a serde type, so
//! node and tests share one source of truth for field names.
//!
//! Wall-clock fields (`ts`, `timestamp`, `server_time`) are epoch seconds;
//! `runtime_ms` and other diagnostics are monotonic milliseconds.

use serde::{Deserialize, Serialize};

// ─── Inbound: configuration ─────────────────────────────────────────

/// Batched configuration message on `.../config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigMessage {
    #[serde(default)]
    pub sensors: Vec<SensorConfigMsg>,
    #[serde(default)]
    pub actuators: Vec<ActuatorConfigMsg>,
}

/// One sensor entry of a configuration message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfigMsg {
    pub gpio: u8,
    pub sensor_type: String,
    #[serde(default)]
    pub sensor_name: String,
    #[serde(default)]
    pub subzone_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Raw-value reporting. The node never calibrates, so this is
    /// accepted and echoed but not interpreted.
    #[serde(default = "default_true")]
    pub raw_mode: bool,
    /// Single-wire ROM code, 16 hex chars. Absent → Skip ROM addressing.
    #[serde(default)]
    pub rom_code: Option<String>,
    /// I²C device address. Absent → per-kind default.
    #[serde(default)]
    pub i2c_address: Option<u8>,
}

/// One actuator entry of a configuration message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfigMsg {
    pub gpio: u8,
    /// Second pin for two-pin position drivers.
    #[serde(default)]
    pub gpio_b: Option<u8>,
    pub actuator_type: String,
    #[serde(default)]
    pub actuator_name: String,
    #[serde(default)]
    pub subzone_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub inverted_logic: bool,
    /// Full-travel time for position valves [ms].
    #[serde(default)]
    pub transition_time_ms: Option<u64>,
    #[serde(default)]
    pub protection: Option<ProtectionMsg>,
}

/// Pump protection parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtectionMsg {
    pub max_run_ms: u64,
    pub cooldown_ms: u64,
    pub window_ms: u64,
    pub max_activations_per_window: u32,
}

fn default_true() -> bool {
    true
}

// ─── Inbound: commands ──────────────────────────────────────────────

/// Actuator command on `.../actuator/<pin>/command`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorCommandMsg {
    pub command: String,
    #[serde(default)]
    pub value: Option<f64>,
    /// Auto-off deadline for ON commands [ms].
    #[serde(default)]
    pub duration: Option<u64>,
}

/// Sensor command on `.../sensor/<pin>/command`.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorCommandMsg {
    pub command: String,
}

/// System command on `.../system/command`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemCommandMsg {
    pub command: String,
    #[serde(default)]
    pub confirm: bool,
    /// New measurement cadence for `set_interval` [ms].
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// Zone assignment on `.../zone/assign`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneAssignMsg {
    pub zone_id: String,
    #[serde(default)]
    pub master_zone_id: String,
    #[serde(default)]
    pub zone_name: String,
    /// Server instance prefix; absent keeps the current one.
    #[serde(default)]
    pub kaiser_id: Option<String>,
}

/// Subzone assignment on `.../subzone/assign`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubzoneAssignMsg {
    pub subzone_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_zone_id: String,
    pub pins: Vec<u8>,
}

/// Subzone removal on `.../subzone/remove`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubzoneRemoveMsg {
    pub subzone_id: String,
}

/// Approval response on `.../system/heartbeat/ack`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatAckMsg {
    pub status: String,
    #[serde(default)]
    pub config_available: bool,
    #[serde(default)]
    pub server_time: Option<u64>,
}

// ─── Outbound ───────────────────────────────────────────────────────

/// Last-will payload, registered retained on `.../system/will`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WillPayload {
    pub status: String,
    pub reason: String,
    pub timestamp: u64,
}

impl WillPayload {
    pub fn offline(epoch_s: u64) -> Self {
        Self {
            status: "offline".to_string(),
            reason: "unexpected_disconnect".to_string(),
            timestamp: epoch_s,
        }
    }
}

/// Heartbeat on `.../system/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub esp_id: String,
    pub zone_id: String,
    pub master_zone_id: String,
    pub zone_assigned: bool,
    pub ts: u64,
    pub uptime_s: u64,
    pub heap_free: u32,
    pub link_rssi: i32,
    pub sensor_count: usize,
    pub actuator_count: usize,
    pub config_status: ConfigStatus,
}

/// `config_status` block of the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigStatus {
    pub state: String,
    pub approved: bool,
    pub sensors: usize,
    pub actuators: usize,
    pub subzones: usize,
    pub storage_ok: bool,
}

/// Measurement result on `.../sensor/<pin>/data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDataPayload {
    pub esp_id: String,
    pub zone_id: String,
    #[serde(default)]
    pub subzone_id: Option<String>,
    pub pin: u8,
    pub sensor_kind: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub unit: String,
    pub quality: String,
    pub valid: bool,
    pub timestamp: u64,
}

/// Command outcome on `.../actuator/<pin>/response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorResponsePayload {
    pub esp_id: String,
    pub zone_id: String,
    pub ts: u64,
    pub pin: u8,
    pub command: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub duration: Option<u64>,
    pub success: bool,
    pub message: String,
}

/// Periodic/event state on `.../actuator/<pin>/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorStatusPayload {
    pub esp_id: String,
    pub zone_id: String,
    #[serde(default)]
    pub subzone_id: Option<String>,
    pub ts: u64,
    pub pin: u8,
    pub kind: String,
    pub state: bool,
    pub pwm: u8,
    pub runtime_ms: u64,
    pub emergency: bool,
}

/// Fault notification on `.../actuator/<pin>/alert` or `.../system/alert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub esp_id: String,
    pub zone_id: String,
    pub ts: u64,
    #[serde(default)]
    pub pin: Option<u8>,
    pub reason: String,
    pub message: String,
}

/// Per-batch result on `.../config_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponsePayload {
    pub status: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub count: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_item: Option<String>,
}

/// Acknowledgement on `.../zone/ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneAckPayload {
    pub status: String,
    pub zone_id: String,
    pub kaiser_id: String,
}

/// Acknowledgement on `.../subzone/ack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubzoneAckPayload {
    pub status: String,
    pub subzone_id: String,
    pub message: String,
}

// ─── Out-of-band processing ─────────────────────────────────────────

/// Request the node sends to the server's processing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub esp_id: String,
    pub pin: u8,
    pub kind: String,
    pub raw_value: f64,
    pub ts: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Response from the processing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResponse {
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub quality: String,
    pub valid: bool,
    #[serde(default)]
    pub error_message: String,
}
