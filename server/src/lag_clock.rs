//! Server lag measurement in "in-game seconds"
//!
//! The host calls [`LagClock::tick`] once per simulation step. Every
//! `ticks_per_window` steps the clock closes a window, records how much wall
//! time those steps really took and bumps the window id. Checks compare the
//! id against the last window they processed to detect a boundary.
//!
//! A window that took far longer than nominal means the server was busy and
//! client packets piled up in the socket. Those packets are drained during the
//! following window(s), so the clock raises a skip flag for a configurable
//! number of windows after a busy one. The busy window itself is not skipped:
//! its longer duration already scales the packet limit.

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::{BUSY_WINDOW_MS, MAX_WINDOW_MS, NOMINAL_WINDOW_MS, TICKS_PER_WINDOW};
use std::time::Instant;

/// Anything able to tell the checks which window we are in and how long the
/// last one took.
pub trait ClockSource: Send + Sync {
    fn snapshot(&self) -> WindowSnapshot;

    fn current_window_id(&self) -> u64 {
        self.snapshot().id
    }

    fn window_duration(&self) -> u64 {
        self.snapshot().duration_ms
    }

    fn should_skip(&self) -> bool {
        self.snapshot().skip
    }
}

/// Consistent view of the three clock values at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub id: u64,
    pub duration_ms: u64,
    pub skip: bool,
}

impl Default for WindowSnapshot {
    fn default() -> Self {
        Self {
            id: 0,
            duration_ms: NOMINAL_WINDOW_MS,
            skip: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LagClockConfig {
    /// Simulation steps per window
    pub ticks_per_window: u32,
    /// Windows slower than this are considered "busy"
    pub busy_threshold_ms: u64,
    /// How many windows to skip after a busy one
    pub skip_windows: u32,
}

impl Default for LagClockConfig {
    fn default() -> Self {
        Self {
            ticks_per_window: TICKS_PER_WINDOW,
            busy_threshold_ms: BUSY_WINDOW_MS,
            skip_windows: 1,
        }
    }
}

#[derive(Debug)]
struct ClockState {
    ticks: u32,
    window_id: u64,
    window_started: Option<Instant>,
    last_duration_ms: u64,
    skip_current: bool,
    skip_remaining: u32,
}

#[derive(Debug)]
pub struct LagClock {
    config: LagClockConfig,
    state: Mutex<ClockState>,
}

impl LagClock {
    pub fn new(config: LagClockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ClockState {
                ticks: 0,
                window_id: 0,
                window_started: None,
                last_duration_ms: NOMINAL_WINDOW_MS,
                skip_current: false,
                skip_remaining: 0,
            }),
        }
    }

    pub fn config(&self) -> &LagClockConfig {
        &self.config
    }

    /// Records one simulation step. Returns the snapshot when this step closed
    /// a window.
    pub fn tick(&self, now: Instant) -> Option<WindowSnapshot> {
        let mut state = self.state.lock();

        let started = match state.window_started {
            Some(started) => started,
            None => {
                // First tick only anchors the measurement
                state.window_started = Some(now);
                return None;
            }
        };

        state.ticks += 1;
        if state.ticks < self.config.ticks_per_window.max(1) {
            return None;
        }

        let raw_ms = now.saturating_duration_since(started).as_millis();
        let raw_ms = u64::try_from(raw_ms).unwrap_or(u64::MAX);

        // The skip decision applies to the windows *after* a busy one
        state.skip_current = state.skip_remaining > 0;
        if state.skip_current {
            state.skip_remaining -= 1;
        }
        if raw_ms > self.config.busy_threshold_ms {
            warn!(
                "Window {} took {}ms, skipping rate checks for {} window(s)",
                state.window_id + 1,
                raw_ms,
                self.config.skip_windows
            );
            state.skip_remaining = state.skip_remaining.max(self.config.skip_windows);
        }

        state.last_duration_ms = raw_ms.clamp(NOMINAL_WINDOW_MS, MAX_WINDOW_MS);
        state.window_id += 1;
        state.ticks = 0;
        state.window_started = Some(now);

        debug!(
            "Window {} closed after {}ms (skip: {})",
            state.window_id, raw_ms, state.skip_current
        );

        Some(Self::snapshot_of(&state))
    }

    fn snapshot_of(state: &ClockState) -> WindowSnapshot {
        WindowSnapshot {
            id: state.window_id,
            duration_ms: state.last_duration_ms,
            skip: state.skip_current,
        }
    }
}

impl Default for LagClock {
    fn default() -> Self {
        Self::new(LagClockConfig::default())
    }
}

impl ClockSource for LagClock {
    fn snapshot(&self) -> WindowSnapshot {
        Self::snapshot_of(&self.state.lock())
    }
}

/// Clock pinned to fixed values. Used when the host has no timing data or
/// wants to drive windows by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    snapshot: Mutex<WindowSnapshot>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: WindowSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    /// Moves to the next window with the given duration and skip flag
    pub fn advance(&self, duration_ms: u64, skip: bool) -> WindowSnapshot {
        let mut current = self.snapshot.lock();
        current.id += 1;
        current.duration_ms = duration_ms;
        current.skip = skip;
        *current
    }
}

impl ClockSource for ManualClock {
    fn snapshot(&self) -> WindowSnapshot {
        *self.snapshot.lock()
    }
}
