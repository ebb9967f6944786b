//! Excess movement packets ("more packets")
//!
//! A modified client can move faster than the simulation allows by sending
//! more movement updates than one per tick. This check counts updates per
//! window and escalates once the carry-over buffer can no longer absorb them.

use log::debug;

use super::{Check, CheckContext, CheckOutcome, Movement};
use crate::config::WorldConfig;
use crate::entity::TrackedEntity;
use crate::escalation::LogRecord;
use crate::packet_rate::PacketRateMonitor;
use crate::setback::SetbackManager;
use crate::violation::ViolationLevelTracker;

pub const NAME: &str = "moving/morepackets";

#[derive(Debug, Clone, Copy, Default)]
pub struct MorePacketsCheck;

impl MorePacketsCheck {
    pub fn new() -> Self {
        Self
    }
}

impl Check for MorePacketsCheck {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_enabled(&self, config: &WorldConfig) -> bool {
        config.more_packets.enabled
    }

    fn on_event(&self, entity: &mut TrackedEntity, movement: &Movement, config: &WorldConfig) {
        let monitor = PacketRateMonitor::new(config.more_packets.rate.clone());
        let data = &mut entity.more_packets;
        monitor.on_packet(&mut data.window, &mut data.setback, movement.from);
    }

    fn on_window_elapsed(
        &self,
        entity: &mut TrackedEntity,
        movement: &Movement,
        ctx: &CheckContext<'_>,
    ) -> CheckOutcome {
        let config = &ctx.config.more_packets;
        let monitor = PacketRateMonitor::new(config.rate.clone());
        let tracker = ViolationLevelTracker::new(config.violation.clone());
        let data = &mut entity.more_packets;

        let Some(result) = monitor.on_window_elapsed(&mut data.window, ctx.window.id, ctx.window.duration_ms)
        else {
            return CheckOutcome::default();
        };

        debug!(
            "{}: window {} closed with {}/{} packets, buffer {}, excess {}",
            entity.id, result.window_id, result.packets, result.limit, data.window.buffer, result.excess
        );

        let mut outcome = CheckOutcome {
            result: Some(result),
            ..CheckOutcome::default()
        };

        if ctx.window.skip || result.excess == 0 {
            tracker.update(&mut data.violation_level, result.excess, ctx.window.skip);
            SetbackManager::advance(&mut data.setback, movement.from);
            return outcome;
        }

        // Thresholds compare against the level including this window's excess
        let peak = tracker.accumulate(&mut data.violation_level, result.excess);
        let record = LogRecord {
            check: NAME.to_string(),
            entity: entity.id.clone(),
            world: ctx.world_name.to_string(),
            violation_level: peak,
            packets: result.over_limit(),
            limit: result.limit,
        };
        let decision = ctx
            .policy
            .evaluate(peak, &config.actions, &mut data.history, record, movement.now);

        if decision.cancel {
            outcome.setback = SetbackManager::current_setback(&data.setback);
        }
        if outcome.setback.is_none() {
            SetbackManager::advance(&mut data.setback, movement.from);
        }

        tracker.decay(&mut data.violation_level);
        outcome.decision = Some(decision);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::{Action, ActionList, ActionThreshold, EscalationPolicy, LogLevel};
    use crate::lag_clock::WindowSnapshot;
    use assert_approx_eq::assert_approx_eq;
    use shared::{EntityId, Position};
    use std::time::Instant;

    fn movement(from: Position) -> Movement {
        Movement {
            from,
            to: from.offset(0.2, 0.0, 0.0),
            now: Instant::now(),
        }
    }

    fn window(id: u64, duration_ms: u64, skip: bool) -> WindowSnapshot {
        WindowSnapshot { id, duration_ms, skip }
    }

    fn send(check: &MorePacketsCheck, entity: &mut TrackedEntity, config: &WorldConfig, count: u32, from: Position) {
        for _ in 0..count {
            check.on_event(entity, &movement(from), config);
        }
    }

    fn close(
        check: &MorePacketsCheck,
        entity: &mut TrackedEntity,
        config: &WorldConfig,
        snapshot: WindowSnapshot,
        from: Position,
    ) -> CheckOutcome {
        let policy = EscalationPolicy::new();
        let ctx = CheckContext {
            world_name: "world",
            config,
            window: snapshot,
            policy: &policy,
        };
        check.on_window_elapsed(entity, &movement(from), &ctx)
    }

    fn entity() -> TrackedEntity {
        TrackedEntity::new(EntityId::new("Steve"), Instant::now())
    }

    #[test]
    fn test_flood_is_cancelled_back_to_setback() {
        let check = MorePacketsCheck::new();
        let config = WorldConfig::default();
        let mut entity = entity();
        let start = Position::new(0.0, 64.0, 0.0);

        send(&check, &mut entity, &config, 40, start);
        let outcome = close(&check, &mut entity, &config, window(1, 1000, false), Position::new(9.0, 64.0, 0.0));

        let result = outcome.result.unwrap();
        assert_eq!(result.excess, 18);
        let decision = outcome.decision.unwrap();
        assert!(decision.cancel);
        assert_eq!(decision.report.unwrap().violation_level, 18.0);
        assert_eq!(outcome.setback, Some(start));
        // Rollback keeps the setback point where it was
        assert_eq!(entity.more_packets.setback, Some(start));
        assert_approx_eq!(entity.more_packets.violation_level, 14.4);
    }

    #[test]
    fn test_clean_window_advances_setback() {
        let check = MorePacketsCheck::new();
        let config = WorldConfig::default();
        let mut entity = entity();
        let current = Position::new(3.0, 64.0, 3.0);

        send(&check, &mut entity, &config, 20, Position::default());
        let outcome = close(&check, &mut entity, &config, window(1, 1000, false), current);

        assert!(outcome.decision.is_none());
        assert!(outcome.setback.is_none());
        assert_eq!(entity.more_packets.setback, Some(current));
        assert_eq!(entity.more_packets.window.buffer, 2);
    }

    #[test]
    fn test_skipped_window_only_decays() {
        let check = MorePacketsCheck::new();
        let config = WorldConfig::default();
        let mut entity = entity();
        entity.more_packets.violation_level = 10.0;

        send(&check, &mut entity, &config, 80, Position::default());
        let outcome = close(&check, &mut entity, &config, window(1, 1000, true), Position::default());

        assert_eq!(outcome.result.unwrap().excess, 58);
        assert!(outcome.decision.is_none());
        assert!(outcome.setback.is_none());
        assert_approx_eq!(entity.more_packets.violation_level, 8.0);
    }

    #[test]
    fn test_same_window_is_not_reprocessed() {
        let check = MorePacketsCheck::new();
        let config = WorldConfig::default();
        let mut entity = entity();

        send(&check, &mut entity, &config, 40, Position::default());
        let first = close(&check, &mut entity, &config, window(1, 1000, false), Position::default());
        let level = entity.more_packets.violation_level;

        send(&check, &mut entity, &config, 40, Position::default());
        let second = close(&check, &mut entity, &config, window(1, 1000, false), Position::default());

        assert!(first.result.is_some());
        assert_eq!(second, CheckOutcome::default());
        assert_eq!(entity.more_packets.violation_level, level);
        assert_eq!(entity.more_packets.window.packet_counter, 40);
    }

    #[test]
    fn test_log_only_configuration_does_not_cancel() {
        let check = MorePacketsCheck::new();
        let mut config = WorldConfig::default();
        config.more_packets.actions = ActionList::new(vec![ActionThreshold {
            threshold: 0,
            actions: vec![Action::log("log", LogLevel::Low, "[player] [packets]")],
        }]);
        let mut entity = entity();
        let current = Position::new(7.0, 64.0, 7.0);

        send(&check, &mut entity, &config, 30, Position::default());
        let outcome = close(&check, &mut entity, &config, window(1, 1000, false), current);

        let decision = outcome.decision.unwrap();
        assert!(!decision.cancel);
        assert_eq!(decision.report.unwrap().packets, 8);
        assert!(outcome.setback.is_none());
        assert_eq!(entity.more_packets.setback, Some(current));
    }

    #[test]
    fn test_is_enabled_follows_config() {
        let check = MorePacketsCheck::new();
        let mut config = WorldConfig::default();
        assert!(check.is_enabled(&config));

        config.more_packets.enabled = false;
        assert!(!check.is_enabled(&config));
        assert_eq!(check.name(), "moving/morepackets");
    }
}
