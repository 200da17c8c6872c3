//! Contend - slotted backoff and adaptive retransmission
//!
//! High-level API over the contention core, its drivers and the fleet
//! simulator.

pub use contend_io as io;
pub use contend_protocol as protocol;
pub use contend_sim as sim;

// Re-export commonly used types
pub use protocol::{
    select_window, BackoffConfig, ContentionWindow, MetricsAggregator, MetricsState,
    ReliableSendLoop, RtoEstimator, SendOutcome, SenderConfig, SlotRng,
};
pub use sim::{FleetSimulation, ScenarioConfig, SimulationReport};
