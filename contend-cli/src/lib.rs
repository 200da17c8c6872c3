//! Contend CLI Library
//!
//! Shared functionality for the contend command-line tools.

pub mod config;
pub mod stats;

pub use config::{BackoffKind, Config, EchoConfig, RetrySettings, SimulationConfig};
pub use stats::{
    display_simulation_report, format_bandwidth, format_bytes, format_duration, format_rtt,
};
