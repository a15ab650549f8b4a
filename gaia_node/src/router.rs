//! Inbound topic dispatch table.
//!
//! Pure classification: the node strips its own prefix and this module
//! maps the suffix onto a route. Handling lives in the node so each
//! handler borrows exactly the components it needs.

use gaia_common::topic::pin_segment;

/// Classified inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Batched sensor/actuator configuration.
    Config,
    /// `system/command` (factory reset, restart, status, clear).
    SystemCommand,
    /// `actuator/<pin>/command`.
    ActuatorCommand(u8),
    /// Per-node emergency stop.
    ActuatorEmergency,
    /// `zone/assign`.
    ZoneAssign,
    /// `subzone/assign`.
    SubzoneAssign,
    /// `subzone/remove`.
    SubzoneRemove,
    /// `sensor/<pin>/command`.
    SensorCommand(u8),
    /// `system/heartbeat/ack` (approval protocol).
    HeartbeatAck,
    /// Command-shaped topic with an unparseable pin segment.
    Malformed,
    /// Anything else: logged and dropped.
    Unknown,
}

/// Classify a node-suffix (prefix already stripped).
pub fn route(suffix: &str) -> Route {
    match suffix {
        "config" => Route::Config,
        "system/command" => Route::SystemCommand,
        "system/heartbeat/ack" => Route::HeartbeatAck,
        "actuator/emergency" => Route::ActuatorEmergency,
        "zone/assign" => Route::ZoneAssign,
        "subzone/assign" => Route::SubzoneAssign,
        "subzone/remove" => Route::SubzoneRemove,
        _ => {
            if suffix.starts_with("actuator/") && suffix.ends_with("/command") {
                match pin_segment(suffix) {
                    Some(pin) => Route::ActuatorCommand(pin),
                    None => Route::Malformed,
                }
            } else if suffix.starts_with("sensor/") && suffix.ends_with("/command") {
                match pin_segment(suffix) {
                    Some(pin) => Route::SensorCommand(pin),
                    None => Route::Malformed,
                }
            } else {
                Route::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_routes() {
        assert_eq!(route("config"), Route::Config);
        assert_eq!(route("system/command"), Route::SystemCommand);
        assert_eq!(route("system/heartbeat/ack"), Route::HeartbeatAck);
        assert_eq!(route("actuator/emergency"), Route::ActuatorEmergency);
        assert_eq!(route("zone/assign"), Route::ZoneAssign);
        assert_eq!(route("subzone/assign"), Route::SubzoneAssign);
        assert_eq!(route("subzone/remove"), Route::SubzoneRemove);
    }

    #[test]
    fn pin_routes() {
        assert_eq!(route("actuator/5/command"), Route::ActuatorCommand(5));
        assert_eq!(route("sensor/12/command"), Route::SensorCommand(12));
    }

    #[test]
    fn malformed_pin_detected() {
        assert_eq!(route("actuator/xyz/command"), Route::Malformed);
        assert_eq!(route("sensor//command"), Route::Malformed);
    }

    #[test]
    fn unknown_topics_fall_through() {
        assert_eq!(route("actuator/5/status"), Route::Unknown);
        assert_eq!(route("weather"), Route::Unknown);
        assert_eq!(route(""), Route::Unknown);
    }
}
