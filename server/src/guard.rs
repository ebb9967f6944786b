//! Host-facing entry point of the engine
//!
//! The [`Guard`] ties the clock, configuration, entity registry and checks
//! together. Hosts feed it movement events and lifecycle notifications; it
//! answers with effects pushed into an [`ActionSink`] and, when a rollback is
//! required, the position the entity has to be put back to.

use log::{info, warn};
use parking_lot::RwLock;
use shared::{EntityId, Position};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checks::{default_checks, Check, CheckContext, Movement};
use crate::config::EngineConfig;
use crate::escalation::{Decision, EscalationPolicy};
use crate::lag_clock::ClockSource;
use crate::registry::EntityRegistry;
use crate::sink::ActionSink;

pub struct Guard {
    clock: Arc<dyn ClockSource>,
    config: RwLock<Arc<EngineConfig>>,
    registry: EntityRegistry,
    checks: Vec<Box<dyn Check>>,
    policy: EscalationPolicy,
}

impl Guard {
    pub fn new(clock: Arc<dyn ClockSource>, config: EngineConfig) -> Self {
        Self::with_checks(clock, config, default_checks())
    }

    pub fn with_checks(clock: Arc<dyn ClockSource>, config: EngineConfig, checks: Vec<Box<dyn Check>>) -> Self {
        info!(
            "Guard started with checks: {}",
            checks.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        Self {
            clock,
            config: RwLock::new(Arc::new(config)),
            registry: EntityRegistry::new(),
            checks,
            policy: EscalationPolicy::new(),
        }
    }

    /// Configuration currently in effect. Evaluations keep the `Arc` they
    /// started with, so a reload never changes settings mid-evaluation.
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config.read())
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// A (re)joining player starts with a clean slate
    pub fn on_join(&self, id: &EntityId, now: Instant) {
        self.registry.with_entity(id, now, |entity| {
            entity.clear_critical_data();
            entity.touch(now);
        });
    }

    /// Runs every enabled check for one movement update.
    ///
    /// Effects are dispatched to `sink` after the entity lock is released.
    /// Returns the rollback target when a check cancelled the movement; the
    /// target has already been offered to `sink.set_back`.
    pub fn on_move(
        &self,
        id: &EntityId,
        world: &str,
        from: Position,
        to: Position,
        now: Instant,
        sink: &mut dyn ActionSink,
    ) -> Option<Position> {
        let config = self.config();
        let world_config = config.for_world(world);
        let movement = Movement { from, to, now };

        let mut decisions: Vec<Decision> = Vec::new();
        let mut setback = None;

        self.registry.with_entity(id, now, |entity| {
            // Read under the entity lock so updates of one entity observe
            // window ids in the order they finalize them
            let ctx = CheckContext {
                world_name: world,
                config: world_config,
                window: self.clock.snapshot(),
                policy: &self.policy,
            };

            entity.touch(now);
            if entity.world != world {
                entity.world = world.to_string();
            }

            for check in &self.checks {
                if !check.is_enabled(world_config) {
                    continue;
                }
                check.on_event(entity, &movement, world_config);
                let outcome = check.on_window_elapsed(entity, &movement, &ctx);

                if let Some(decision) = outcome.decision {
                    decisions.push(decision);
                }
                if setback.is_none() {
                    setback = outcome.setback;
                }
            }
        });

        for effect in decisions.iter().flat_map(|d| d.effects.iter()) {
            sink.apply(id, effect);
        }

        if let Some(target) = setback {
            if !sink.set_back(id, target) {
                warn!("Setback of {} to {} was not applied by the host", id, target);
            }
        }

        setback
    }

    /// Forgets a disconnected entity. Unknown ids are ignored.
    pub fn on_disconnect(&self, id: &EntityId) -> bool {
        self.registry.remove(id)
    }

    /// Administrative reset of a single entity
    pub fn reset(&self, id: &EntityId) -> bool {
        self.registry.remove(id)
    }

    /// Swaps in `config` (if given) and applies the reload policy of the
    /// configuration now in effect.
    pub fn on_reload(&self, config: Option<EngineConfig>) {
        if let Some(config) = config {
            *self.config.write() = Arc::new(config);
            info!("Configuration reloaded");
        }
        let policy = self.config().reload_policy;
        self.registry.reload(policy);
    }

    /// Drops entities idle for longer than `max_idle`
    pub fn sweep(&self, max_idle: Duration, now: Instant) -> usize {
        self.registry.sweep(max_idle, now).len()
    }

    pub fn violation_level(&self, id: &EntityId) -> Option<f64> {
        self.registry.get(id).map(|handle| handle.lock().more_packets.violation_level)
    }

    pub fn setback(&self, id: &EntityId) -> Option<Position> {
        self.registry.get(id).and_then(|handle| handle.lock().more_packets.setback)
    }

    pub fn tracked(&self) -> usize {
        self.registry.len()
    }
}
