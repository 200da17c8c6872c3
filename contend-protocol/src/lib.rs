//! Contention and retransmission core
//!
//! This crate implements the sans-I/O core of the reliable sender: slotted
//! backoff over an adaptive contention window, Jacobson/Karn RTO estimation,
//! the retry-driven send loop state machine, and delivery metrics.

pub mod backoff;
pub mod config;
pub mod metrics;
pub mod random;
pub mod rto;
pub mod sender;
pub mod transport;
pub mod window;

pub use backoff::{BackoffConfig, BackoffController, BackoffMode};
pub use config::ConfigError;
pub use metrics::{MetricsAggregator, MetricsRecorder, MetricsState, SharedMetrics};
pub use random::{RandomSource, SlotRng};
pub use rto::{RtoConfig, RtoEstimator, RtoState};
pub use sender::{
    AttemptOutcome, AttemptRecord, ReliableSendLoop, SendAction, SendError, SendOutcome,
    SendState, SenderConfig,
};
pub use transport::{TransmitStatus, Transport, TransportError, TransportEvent};
pub use window::{select_window, ContentionWindow, DensityBand, Regime, SpeedBand};
