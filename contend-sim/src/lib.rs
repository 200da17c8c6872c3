//! Fleet simulation
//!
//! Runs many reliable senders against a lossy channel model on a shared
//! discrete-event queue, so a run of thousands of messages completes in
//! milliseconds and replays exactly from its seed.

pub mod channel;
pub mod scenario;

pub use channel::{ChannelConfig, Fate, LossyChannel};
pub use scenario::{
    FleetSimulation, ScenarioConfig, SenderReport, SimEvent, SimEventKind, SimulationReport,
};

use contend_protocol::config::ConfigError;
use contend_protocol::sender::SendError;
use thiserror::Error;

/// Simulation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Send loop error: {0}")]
    Send(#[from] SendError),

    #[error("Probability {name} must be in [0, 1], got {value}")]
    InvalidProbability { name: &'static str, value: f64 },

    #[error("Scenario has no senders")]
    NoSenders,
}
