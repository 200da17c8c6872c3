//! Retransmission timeout estimation
//!
//! Jacobson/Karn smoothed RTT with gains 1/8 (SRTT) and 1/4 (MDEV):
//!
//! ```text
//! first sample:  SRTT = rtt,            MDEV = rtt / 2
//! later samples: err  = rtt - SRTT
//!                SRTT = SRTT + err / 8
//!                MDEV = MDEV + (|err| - MDEV) / 4
//! RTO = SRTT + 4 * MDEV
//! ```
//!
//! The estimator state is an explicit [`RtoState`] value owned by one sender,
//! so independent senders never share RTT history.

use crate::config::ConfigError;
use crate::random::RandomSource;
use std::time::Duration;

const SRTT_GAIN: f64 = 0.125;
const MDEV_GAIN: f64 = 0.25;

/// Smallest RTO `adjust` will ever return, in seconds
pub const MIN_RTO_SECS: f64 = 0.001;

/// RTO above which the adjustment may clip it, in seconds
pub const ADJUST_RTO_THRESHOLD_SECS: f64 = 15.0;

/// Retransmissions that must be exceeded before the adjustment applies
pub const ADJUST_RETRANSMISSION_THRESHOLD: u32 = 2;

/// Smoothed RTT state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RtoState {
    /// Smoothed RTT (seconds)
    pub srtt: f64,
    /// Smoothed mean deviation (seconds)
    pub mdev: f64,
    /// Whether a sample has been seen
    pub initialized: bool,
}

impl RtoState {
    /// `SRTT + 4 * MDEV`, or `None` before the first sample
    pub fn rto(&self) -> Option<f64> {
        self.initialized.then(|| self.srtt + 4.0 * self.mdev)
    }
}

/// RTO parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtoConfig {
    /// Timeout used until the first RTT sample
    pub initial_rto: Duration,
    /// Floor applied by `adjust`
    pub min_rto: Duration,
}

impl RtoConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let initial = self.initial_rto.as_secs_f64();
        if initial <= 0.0 {
            return Err(ConfigError::InvalidInitialRto(initial));
        }
        let floor = self.min_rto.as_secs_f64();
        if floor <= 0.0 {
            return Err(ConfigError::InvalidRtoFloor(floor));
        }
        Ok(())
    }
}

impl Default for RtoConfig {
    fn default() -> Self {
        RtoConfig {
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_secs_f64(MIN_RTO_SECS),
        }
    }
}

/// Per-sender RTO estimator
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    state: RtoState,
    config: RtoConfig,
    sample_count: u64,
}

impl RtoEstimator {
    /// Create an estimator with no RTT history
    pub fn new(config: RtoConfig) -> Result<Self, ConfigError> {
        Self::with_state(config, RtoState::default())
    }

    /// Resume from a previously saved state
    pub fn with_state(config: RtoConfig, state: RtoState) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(RtoEstimator {
            state,
            config,
            sample_count: 0,
        })
    }

    /// Feed an RTT sample (seconds) and return the new RTO (seconds)
    ///
    /// Negative samples count as zero. Non-finite samples are discarded and
    /// leave the state untouched.
    pub fn sample(&mut self, rtt: f64) -> f64 {
        if !rtt.is_finite() {
            tracing::debug!("Discarding non-finite RTT sample {}", rtt);
            return self.rto();
        }
        let rtt = rtt.max(0.0);

        if !self.state.initialized {
            self.state.srtt = rtt;
            self.state.mdev = rtt / 2.0;
            self.state.initialized = true;
        } else {
            let err = rtt - self.state.srtt;
            self.state.srtt += SRTT_GAIN * err;
            self.state.mdev += MDEV_GAIN * (err.abs() - self.state.mdev);
        }
        self.sample_count += 1;

        let rto = self.state.srtt + 4.0 * self.state.mdev;
        tracing::debug!(
            "RTT sample {:.6}s: srtt={:.6}s mdev={:.6}s rto={:.6}s",
            rtt,
            self.state.srtt,
            self.state.mdev,
            rto
        );
        rto
    }

    /// Feed an RTT sample given as a duration
    pub fn sample_duration(&mut self, rtt: Duration) -> Duration {
        secs_to_duration(self.sample(rtt.as_secs_f64()))
    }

    /// Probabilistically clip a large RTO after repeated retransmission
    ///
    /// Applies only when `retransmissions > 2` and `rto > 15s`: one uniform
    /// `r` in `[0, 1)` is drawn and, if `r < 0.5`, subtracted from `rto`. No
    /// draw happens otherwise. The result never exceeds `rto` and never falls
    /// below the configured floor.
    pub fn adjust<R: RandomSource + ?Sized>(
        &self,
        rto: f64,
        retransmissions: u32,
        rng: &mut R,
    ) -> f64 {
        let floor = self.config.min_rto.as_secs_f64();
        let mut adjusted = rto;

        if retransmissions > ADJUST_RETRANSMISSION_THRESHOLD && rto > ADJUST_RTO_THRESHOLD_SECS {
            let r = rng.uniform_float();
            if r < 0.5 {
                adjusted = rto - r;
                tracing::debug!(
                    "Clipped RTO {:.3}s -> {:.3}s after {} retransmissions",
                    rto,
                    adjusted,
                    retransmissions
                );
            }
        }

        adjusted.max(floor).min(rto)
    }

    /// Current RTO in seconds
    ///
    /// Falls back to the configured initial RTO before the first sample.
    pub fn rto(&self) -> f64 {
        self.state
            .rto()
            .unwrap_or_else(|| self.config.initial_rto.as_secs_f64())
    }

    /// Current RTO as a duration
    pub fn rto_duration(&self) -> Duration {
        secs_to_duration(self.rto())
    }

    /// Snapshot of the smoothed state
    pub fn state(&self) -> RtoState {
        self.state
    }

    /// Smoothed RTT in seconds (0 before the first sample)
    pub fn srtt(&self) -> f64 {
        self.state.srtt
    }

    /// Smoothed deviation in seconds (0 before the first sample)
    pub fn mdev(&self) -> f64 {
        self.state.mdev
    }

    /// Samples fed since construction
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Parameters in use
    pub fn config(&self) -> &RtoConfig {
        &self.config
    }
}

/// Convert seconds to a duration, saturating instead of panicking
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
