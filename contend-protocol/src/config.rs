//! Configuration validation errors
//!
//! Every parameter struct in this crate validates itself at construction and
//! reports the first offending field as a [`ConfigError`]. Nothing is coerced
//! silently.

use thiserror::Error;

/// Invalid configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Contention window needs at least one slot")]
    ZeroSlots,

    #[error("Contention window is inverted (min {min} > max {max})")]
    InvertedWindow { min: u32, max: u32 },

    #[error("Slot time must be non-zero")]
    ZeroSlotTime,

    #[error("{name} must be a finite non-negative number (got {value})")]
    InvalidRegime { name: &'static str, value: f64 },

    #[error("Initial RTO must be positive and finite (got {0}s)")]
    InvalidInitialRto(f64),

    #[error("RTO floor must be positive and finite (got {0}s)")]
    InvalidRtoFloor(f64),

    #[error("Energy cost must be finite and non-negative (got {0}J)")]
    InvalidEnergyCost(f64),
}
