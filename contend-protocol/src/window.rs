//! Contention window selection
//!
//! Denser or faster topologies draw backoff from wider windows. The regime
//! table crosses three density bands with three speed bands; every
//! non-negative `(density, speed)` pair lands in exactly one cell.

use crate::config::ConfigError;
use std::fmt;

/// Backoff slot range `[min_slots, max_slots]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentionWindow {
    min_slots: u32,
    max_slots: u32,
}

impl ContentionWindow {
    /// Create a window, rejecting empty or inverted ranges
    pub fn new(min_slots: u32, max_slots: u32) -> Result<Self, ConfigError> {
        if min_slots == 0 || max_slots == 0 {
            return Err(ConfigError::ZeroSlots);
        }
        if min_slots > max_slots {
            return Err(ConfigError::InvertedWindow {
                min: min_slots,
                max: max_slots,
            });
        }
        Ok(ContentionWindow {
            min_slots,
            max_slots,
        })
    }

    /// Smallest slot count a backoff may draw
    #[inline]
    pub fn min_slots(&self) -> u32 {
        self.min_slots
    }

    /// Largest slot count a backoff may draw
    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Number of distinct slot counts in the window
    pub fn width(&self) -> u32 {
        self.max_slots - self.min_slots + 1
    }

    /// Check if a slot count lies inside the window
    pub fn contains(&self, slots: u32) -> bool {
        slots >= self.min_slots && slots <= self.max_slots
    }
}

impl Default for ContentionWindow {
    fn default() -> Self {
        ContentionWindow {
            min_slots: 1,
            max_slots: 16,
        }
    }
}

impl fmt::Display for ContentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min_slots, self.max_slots)
    }
}

/// Node density bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DensityBand {
    /// density ≤ 50
    Sparse,
    /// 50 < density ≤ 75
    Moderate,
    /// density > 75
    Dense,
}

impl DensityBand {
    fn classify(density: f64) -> Self {
        if density <= 50.0 {
            DensityBand::Sparse
        } else if density <= 75.0 {
            DensityBand::Moderate
        } else {
            DensityBand::Dense
        }
    }

    fn index(self) -> usize {
        match self {
            DensityBand::Sparse => 0,
            DensityBand::Moderate => 1,
            DensityBand::Dense => 2,
        }
    }
}

/// Node speed bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedBand {
    /// speed ≤ 10
    Slow,
    /// 10 < speed ≤ 15
    Medium,
    /// speed > 15
    Fast,
}

impl SpeedBand {
    fn classify(speed: f64) -> Self {
        if speed <= 10.0 {
            SpeedBand::Slow
        } else if speed <= 15.0 {
            SpeedBand::Medium
        } else {
            SpeedBand::Fast
        }
    }

    fn index(self) -> usize {
        match self {
            SpeedBand::Slow => 0,
            SpeedBand::Medium => 1,
            SpeedBand::Fast => 2,
        }
    }
}

/// `(min, max)` slots per `[density][speed]` cell
const REGIME_TABLE: [[(u32, u32); 3]; 3] = [
    [(32, 64), (64, 128), (128, 256)],
    [(64, 128), (128, 256), (256, 384)],
    [(256, 384), (384, 512), (512, 1024)],
];

/// Environment regime: one cell of the density × speed table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Regime {
    pub density: DensityBand,
    pub speed: SpeedBand,
}

impl Regime {
    /// Classify a `(density, speed)` observation
    ///
    /// Negative, NaN and infinite inputs are configuration errors.
    pub fn classify(density: f64, speed: f64) -> Result<Self, ConfigError> {
        check_regime_input("density", density)?;
        check_regime_input("speed", speed)?;

        Ok(Regime {
            density: DensityBand::classify(density),
            speed: SpeedBand::classify(speed),
        })
    }

    /// Preset window for this regime
    pub fn window(&self) -> ContentionWindow {
        let (min_slots, max_slots) = REGIME_TABLE[self.density.index()][self.speed.index()];
        ContentionWindow {
            min_slots,
            max_slots,
        }
    }
}

fn check_regime_input(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRegime { name, value })
    }
}

/// Pick the contention window for a topology's density and speed
pub fn select_window(density: f64, speed: f64) -> Result<ContentionWindow, ConfigError> {
    let regime = Regime::classify(density, speed)?;
    let window = regime.window();
    tracing::debug!(
        "Regime {:?}/{:?} (density={}, speed={}) selects window {}",
        regime.density,
        regime.speed,
        density,
        speed,
        window
    );
    Ok(window)
}
