//! Slotted backoff controller
//!
//! Draws a random number of slots from the contention window and converts it
//! to a delay. Tracks retries of the current message against a ceiling; the
//! controller only reports the ceiling, the caller decides what a lost
//! message means.

use crate::config::ConfigError;
use crate::random::RandomSource;
use crate::window::ContentionWindow;
use std::time::Duration;

/// How the drawn slot range evolves with retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffMode {
    /// Always draw from the full window
    #[default]
    Uniform,
    /// Binary exponential growth: the upper bound is `2^min(retries, ceiling) - 1`,
    /// clamped into the window
    Exponential { ceiling: u32 },
}

/// Backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Duration of one slot
    pub slot_time: Duration,
    /// Slot range
    pub window: ContentionWindow,
    /// Retries after which a message is abandoned
    pub max_retries: u32,
    /// Draw mode
    pub mode: BackoffMode,
}

impl BackoffConfig {
    /// Check the parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_time.is_zero() {
            return Err(ConfigError::ZeroSlotTime);
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            slot_time: Duration::from_micros(1),
            window: ContentionWindow::default(),
            max_retries: 5,
            mode: BackoffMode::Uniform,
        }
    }
}

/// Backoff state for one sender
#[derive(Debug, Clone)]
pub struct BackoffController {
    slot_time: Duration,
    window: ContentionWindow,
    mode: BackoffMode,
    retry_count: u32,
    max_retries: u32,
}

impl BackoffController {
    /// Create a controller from validated parameters
    pub fn new(config: BackoffConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(BackoffController {
            slot_time: config.slot_time,
            window: config.window,
            mode: config.mode,
            retry_count: 0,
            max_retries: config.max_retries,
        })
    }

    /// Draw the next backoff delay
    ///
    /// Consumes exactly one integer draw from `rng`. The result always lies in
    /// `[min_slots * slot_time, max_slots * slot_time]`.
    pub fn next_backoff_delay<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Duration {
        let slots = rng.uniform_int(self.window.min_slots(), self.upper_slots());
        let delay = self
            .slot_time
            .checked_mul(slots)
            .unwrap_or(Duration::MAX);

        tracing::debug!(
            "Backoff draw: {} slots ({:?}) at retry {}/{}",
            slots,
            delay,
            self.retry_count,
            self.max_retries
        );
        delay
    }

    /// Upper slot bound for the current retry
    fn upper_slots(&self) -> u32 {
        match self.mode {
            BackoffMode::Uniform => self.window.max_slots(),
            BackoffMode::Exponential { ceiling } => {
                let exponent = self.retry_count.min(ceiling).min(32);
                let grown = (1u64 << exponent) - 1;
                grown.clamp(
                    self.window.min_slots() as u64,
                    self.window.max_slots() as u64,
                ) as u32
            }
        }
    }

    /// Count one more retry of the current message
    pub fn increment_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Check if the retry ceiling has been hit
    pub fn max_retries_reached(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Start a new message
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Swap the contention window, e.g. after a regime change
    ///
    /// The retry counter is left alone.
    pub fn set_window(&mut self, window: ContentionWindow) {
        self.window = window;
    }

    /// Retries of the current message
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry ceiling
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Current contention window
    pub fn window(&self) -> ContentionWindow {
        self.window
    }

    /// Slot duration
    pub fn slot_time(&self) -> Duration {
        self.slot_time
    }
}
