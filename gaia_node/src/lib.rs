//! # GAIA Node Core Library
//!
//! Firmware core of the GAIA edge controller. A single cooperative loop
//! drives the pub/sub transport, periodic measurement, actuator command
//! execution and the emergency-stop lifecycle; the server ("kaiser") owns
//! calibration and business logic, the node owns hardware safety, timing
//! and pin arbitration.
//!
//! ## Subsystems
//!
//! - [`scheduler`] — loop cadences and the watchdog feed contract
//! - [`storage`] — namespaced persistent key/value facade
//! - [`breaker`] — CLOSED/OPEN/HALF_OPEN guard for remote operations
//! - [`transport`] — pub/sub client: last-will, offline buffer, reconnect
//! - [`ledger`] — bounded ring of recent errors with dedup
//! - [`sensor`] — sensor registry, split-phase poller, processing calls
//! - [`actuator`] — actuator registry and per-type drivers
//! - [`safety`] — emergency-stop state machine
//! - [`router`] — inbound topic dispatch table
//! - [`system`] — identity, zone assignment, approval state
//! - [`node`] — ownership wiring and the loop itself

pub mod actuator;
pub mod breaker;
pub mod ledger;
pub mod node;
pub mod router;
pub mod safety;
pub mod scheduler;
pub mod sensor;
pub mod storage;
pub mod system;
pub mod transport;
