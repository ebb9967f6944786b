use shared::{EntityId, Position};
use std::time::Instant;

use crate::escalation::ExecutionHistory;
use crate::packet_rate::RateWindow;

/// State owned by the excess-packet check
#[derive(Debug, Clone, Default)]
pub struct MorePacketsData {
    pub window: RateWindow,
    pub violation_level: f64,
    pub setback: Option<Position>,
    pub history: ExecutionHistory,
}

impl MorePacketsData {
    /// Forgets counters, buffer, level and history. The setback point and the
    /// id of the last finalized window survive, so the current window is
    /// still judged as a whole.
    pub fn clear_violations(&mut self) {
        let setback = self.setback.take();
        let last_window_id = self.window.last_window_id;
        *self = Self {
            setback,
            ..Self::default()
        };
        self.window.last_window_id = last_window_id;
    }
}

/// Everything the engine remembers about one monitored player
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub world: String,
    pub last_seen: Instant,
    pub more_packets: MorePacketsData,
    /// Set when the registry dropped this record; holders of a stale handle
    /// must look the entity up again
    pub retired: bool,
}

impl TrackedEntity {
    pub fn new(id: EntityId, now: Instant) -> Self {
        Self {
            id,
            world: String::new(),
            last_seen: now,
            more_packets: MorePacketsData::default(),
            retired: false,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = self.last_seen.max(now);
    }

    pub fn is_idle(&self, max_idle: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > max_idle
    }

    /// Resets everything a check accumulated, including setback points
    pub fn clear_critical_data(&mut self) {
        self.more_packets = MorePacketsData::default();
    }
}
