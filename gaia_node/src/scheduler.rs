//! Loop cadences and the watchdog feed contract.
//!
//! The node runs one cooperative loop; per-iteration work (transport,
//! actuator motion) runs unconditionally, everything else on a cadence.
//! The hardware watchdog is external: the loop invokes the feed callback
//! exactly once per iteration, whatever else happened.

use gaia_common::clock::Cadence;
use gaia_common::config::TimingConfig;

/// External watchdog feed, invoked once per loop iteration.
pub type WatchdogFeed = Box<dyn FnMut()>;

/// The periodic tasks of the node loop.
#[derive(Debug)]
pub struct Cadences {
    /// Sensor measurement sweep (`T_meas`, server-configurable).
    pub measurement: Cadence,
    /// Heartbeat publish (`T_hb`).
    pub heartbeat: Cadence,
    /// Health summary to the log sink.
    pub health: Cadence,
    /// Periodic actuator status publish.
    pub actuator_status: Cadence,
}

impl Cadences {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            measurement: Cadence::new(timing.measurement_interval_ms),
            heartbeat: Cadence::new(timing.heartbeat_interval_ms),
            health: Cadence::new(timing.health_interval_ms),
            actuator_status: Cadence::new(timing.status_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadences_pick_up_overrides() {
        let timing = TimingConfig {
            measurement_interval_ms: 5_000,
            ..TimingConfig::default()
        };
        let cadences = Cadences::from_timing(&timing);
        assert_eq!(cadences.measurement.period_ms(), 5_000);
        assert_eq!(cadences.heartbeat.period_ms(), 60_000);
    }

    #[test]
    fn all_cadences_fire_on_first_tick() {
        let mut cadences = Cadences::from_timing(&TimingConfig::default());
        assert!(cadences.measurement.tick(0));
        assert!(cadences.heartbeat.tick(0));
        assert!(cadences.health.tick(0));
        assert!(cadences.actuator_status.tick(0));
    }
}
