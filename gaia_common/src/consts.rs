//! System-wide constants for the GAIA node workspace.
//!
//! Single source of truth for all numeric limits and default cadences.
//! Imported by all crates — no duplication permitted.

use static_assertions::const_assert;

/// Maximum number of configured sensors.
pub const MAX_SENSORS: usize = 10;

/// Maximum number of configured actuators.
pub const MAX_ACTUATORS: usize = 12;

/// Highest addressable GPIO number accepted in configuration.
pub const MAX_GPIO: u8 = 39;

/// Sentinel pin value meaning "unset" in wire payloads.
pub const PIN_UNSET: u8 = 255;

/// Capacity of the offline publish buffer.
pub const OFFLINE_QUEUE_CAP: usize = 100;

/// Capacity of the error ledger ring.
pub const ERROR_LEDGER_CAP: usize = 50;

/// Dedup lookback window of the error ledger (most recent entries).
pub const ERROR_DEDUP_WINDOW: usize = 5;

/// Maximum length of an error message on the wire [bytes].
pub const ERROR_MESSAGE_MAX: usize = 128;

/// Maximum length of a topic string [bytes].
pub const TOPIC_MAX: usize = 128;

/// Maximum length of a storage key [ASCII chars].
pub const STORAGE_KEY_MAX: usize = 15;

/// Default measurement cadence [ms] (server-configurable).
pub const MEASUREMENT_INTERVAL_MS: u64 = 30_000;

/// Default heartbeat cadence [ms].
pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;

/// Health report cadence [ms].
pub const HEALTH_INTERVAL_MS: u64 = 300_000;

/// Periodic actuator status cadence [ms].
pub const ACTUATOR_STATUS_INTERVAL_MS: u64 = 30_000;

/// DS18B20 worst-case conversion time at 12-bit resolution [ms].
pub const ONEWIRE_CONVERSION_MS: u64 = 750;

/// Out-of-band processing request timeout [ms].
pub const PROCESSING_TIMEOUT_MS: u64 = 5_000;

/// Transport connect timeout [ms].
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Reconnect backoff base delay [ms].
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Reconnect backoff ceiling [ms].
pub const BACKOFF_CAP_MS: u64 = 60_000;

/// Reconnect attempts per session before only the breaker gates retries.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Emergency-clear verification delay [ms].
pub const SAFETY_VERIFY_TIMEOUT_MS: u64 = 5_000;

/// Minimum free heap required to pass safety verification [bytes].
pub const SAFETY_HEAP_FLOOR: u32 = 16 * 1024;

/// Default kaiser (server) identity prefix.
pub const DEFAULT_KAISER_ID: &str = "god";

// The dedup scan must never look past the ring itself.
const_assert!(ERROR_DEDUP_WINDOW <= ERROR_LEDGER_CAP);
// A single drained message must always fit back in the ring.
const_assert!(OFFLINE_QUEUE_CAP > 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_SENSORS > 0);
        assert!(MAX_ACTUATORS > 0);
        assert!(MAX_GPIO < PIN_UNSET);
        assert!(BACKOFF_BASE_MS <= BACKOFF_CAP_MS);
        assert!(ONEWIRE_CONVERSION_MS < MEASUREMENT_INTERVAL_MS);
        // Longest indexed storage key must fit the key budget.
        assert!(STORAGE_KEY_MAX >= "act_11_maxrun".len());
    }
}
