//! GAIA Common Library
//!
//! Shared constants, error codes, wire payload types and configuration
//! loading for the GAIA node workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - System-wide limits and default cadences
//! - [`error`] - Error code space and severities
//! - [`clock`] - Monotonic/wall clock abstraction and cadence timers
//! - [`config`] - TOML configuration loading
//! - [`topic`] - MQTT topic construction and parsing
//! - [`payload`] - Wire payload schemas (serde)

pub mod clock;
pub mod config;
pub mod consts;
pub mod error;
pub mod payload;
pub mod topic;
