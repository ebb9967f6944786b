//! Per-window packet counting with a carry-over buffer
//!
//! An unmodified client sends one movement update per tick, i.e. about 20 per
//! window. Latency makes that uneven: a client may send 10 updates in one
//! second and 30 in the next. Unused allowance is therefore carried forward in
//! a bounded buffer, and a deficit is first paid out of that buffer before
//! anything is reported as excess.
//!
//! The allowance of a window is scaled by how long the window actually took on
//! the server, so a slow server raises the limit instead of flagging clients.

use serde::{Deserialize, Serialize};
use shared::{Position, ALLOWED_PACKETS_PER_SECOND, BUFFER_LIMIT};

use crate::setback::SetbackManager;

/// Packet bookkeeping for the window currently being counted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateWindow {
    /// Updates received since the last finalize
    pub packet_counter: u32,
    /// Unused allowance carried over from earlier windows
    pub buffer: u32,
    /// Id of the last window that was finalized
    pub last_window_id: u64,
}

/// Outcome of finalizing one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationResult {
    pub window_id: u64,
    /// Updates counted in the closed window
    pub packets: u32,
    /// Allowance for the closed window after duration scaling
    pub limit: u32,
    /// Updates beyond limit plus buffer, zero when within allowance
    pub excess: u32,
}

impl EvaluationResult {
    /// Packets sent above the plain limit, ignoring the buffer. This is the
    /// number reported in log messages.
    pub fn over_limit(&self) -> i64 {
        i64::from(self.packets) - i64::from(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub allowed_rate_per_second: u32,
    pub buffer_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            allowed_rate_per_second: ALLOWED_PACKETS_PER_SECOND,
            buffer_limit: BUFFER_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PacketRateMonitor {
    config: RateLimitConfig,
}

impl PacketRateMonitor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one update and seeds the setback point with the position the
    /// entity moved away from.
    pub fn on_packet(&self, window: &mut RateWindow, setback: &mut Option<Position>, from: Position) {
        window.packet_counter = window.packet_counter.saturating_add(1);
        SetbackManager::ensure_initialized(setback, from);
    }

    /// Allowance for a window of the given duration, truncated
    pub fn limit_for(&self, window_duration_ms: u64) -> u32 {
        let scaled = u64::from(self.config.allowed_rate_per_second).saturating_mul(window_duration_ms) / 1000;
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }

    /// Closes the counted window. Returns `None` when `window_id` was already
    /// finalized or is older than the last finalized window, so calling this
    /// repeatedly or with a stale id is harmless.
    pub fn on_window_elapsed(
        &self,
        window: &mut RateWindow,
        window_id: u64,
        window_duration_ms: u64,
    ) -> Option<EvaluationResult> {
        if window_id <= window.last_window_id {
            return None;
        }

        let limit = self.limit_for(window_duration_ms);
        let packets = window.packet_counter;

        let difference = i64::from(limit) - i64::from(packets);
        let raw_buffer = i64::from(window.buffer) + difference;

        // Excess is whatever the buffer could not absorb
        let excess = u32::try_from((-raw_buffer).max(0)).unwrap_or(u32::MAX);
        let buffer = raw_buffer.clamp(0, i64::from(self.config.buffer_limit));
        window.buffer = u32::try_from(buffer).unwrap_or(self.config.buffer_limit);

        window.packet_counter = 0;
        window.last_window_id = window_id;

        Some(EvaluationResult {
            window_id,
            packets,
            limit,
            excess,
        })
    }
}
