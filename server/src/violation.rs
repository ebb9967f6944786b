//! Decaying violation level
//!
//! Excess packets are added to the level and the level shrinks by a fixed
//! factor every window, violation or not. A single spike fades to about a
//! third after five clean windows and to nothing after fifteen to twenty.

use serde::{Deserialize, Serialize};
use shared::VIOLATION_DECAY;

/// Levels below this are treated as zero
const NEGLIGIBLE_LEVEL: f64 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationConfig {
    /// Multiplier applied once per window
    pub decay: f64,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            decay: VIOLATION_DECAY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViolationLevelTracker {
    config: ViolationConfig,
}

impl ViolationLevelTracker {
    pub fn new(config: ViolationConfig) -> Self {
        Self { config }
    }

    /// Adds this window's excess. The returned peak is what escalation
    /// thresholds are compared against.
    pub fn accumulate(&self, level: &mut f64, excess: u32) -> f64 {
        *level = level.max(0.0) + f64::from(excess);
        *level
    }

    /// Applies one window of decay
    pub fn decay(&self, level: &mut f64) -> f64 {
        *level = level.max(0.0) * self.config.decay;
        if *level < NEGLIGIBLE_LEVEL {
            *level = 0.0;
        }
        *level
    }

    /// Full per-window update. Skipped windows and windows without excess
    /// only decay.
    pub fn update(&self, level: &mut f64, excess: u32, skip: bool) -> f64 {
        if !skip && excess > 0 {
            self.accumulate(level, excess);
        }
        self.decay(level)
    }
}
