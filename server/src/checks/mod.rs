//! Plausibility checks
//!
//! Every check reacts to individual events and to window boundaries, and
//! shares the one [`EscalationPolicy`] with all other checks. What differs
//! between checks is the rule they encode and the configuration section they
//! read.

mod more_packets;

pub use more_packets::MorePacketsCheck;

use shared::Position;
use std::time::Instant;

use crate::config::WorldConfig;
use crate::entity::TrackedEntity;
use crate::escalation::{Decision, EscalationPolicy};
use crate::lag_clock::WindowSnapshot;
use crate::packet_rate::EvaluationResult;

/// One movement update as reported by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    /// Where the entity was before this update
    pub from: Position,
    /// Where the update wants to put it
    pub to: Position,
    pub now: Instant,
}

/// Inputs shared by all checks for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub world_name: &'a str,
    pub config: &'a WorldConfig,
    pub window: WindowSnapshot,
    pub policy: &'a EscalationPolicy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    /// Finalized window, if this call closed one
    pub result: Option<EvaluationResult>,
    pub decision: Option<Decision>,
    /// Where the host should put the entity instead of `movement.to`
    pub setback: Option<Position>,
}

pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_enabled(&self, config: &WorldConfig) -> bool;

    fn on_event(&self, entity: &mut TrackedEntity, movement: &Movement, config: &WorldConfig);

    /// Called after every event. Implementations must treat an already
    /// processed window as a no-op.
    fn on_window_elapsed(
        &self,
        entity: &mut TrackedEntity,
        movement: &Movement,
        ctx: &CheckContext<'_>,
    ) -> CheckOutcome;
}

/// Checks enabled by default
pub fn default_checks() -> Vec<Box<dyn Check>> {
    vec![Box::new(MorePacketsCheck::new())]
}
